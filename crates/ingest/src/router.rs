//! Inbound message router.
//!
//! For every delivered message: dedupe on the canonical id, skip
//! non-individual chats and self-originated messages, then run the
//! best-effort bookkeeping chain — contact cache, chat record, lead,
//! agenda, ad event — and hand accepted media to the receipt pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use cobro_ads::{AdEventClient, ConversionEvent, EventKind, PixelConfig};
use cobro_core::{digits, is_accepted_mimetype, InboundMessage, LineRegistry, SeenMessages};
use cobro_persistence::models::{ChatRow, LeadRow};
use cobro_persistence::queries::{agenda, chats, contacts, leads, pages, sessions};
use cobro_persistence::SupabaseClient;
use cobro_session::MessageHandler;

use crate::pipeline::{ReceiptCandidate, ReceiptPipeline};

/// Spanish discount-code lead trigger. A match records the message as the
/// lead's first message even when the lead row already exists.
static LEAD_TRIGGER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*hola\s+mi\s+c[oó]digo\s+de\s+descuento\s+es\s*[:\-]?\s*\S+").unwrap()
});

pub struct InboundRouter {
    registry: Arc<LineRegistry>,
    seen: Arc<SeenMessages>,
    store: SupabaseClient,
    ads: AdEventClient,
    pipeline: Arc<ReceiptPipeline>,
}

impl InboundRouter {
    pub fn new(
        registry: Arc<LineRegistry>,
        seen: Arc<SeenMessages>,
        store: SupabaseClient,
        ads: AdEventClient,
        pipeline: Arc<ReceiptPipeline>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            seen,
            store,
            ads,
            pipeline,
        })
    }

    async fn resolve_project(&self, line_id: &str) -> Option<String> {
        if let Some(project) = self.registry.project_of(line_id) {
            return Some(project);
        }
        match sessions::project_of_line(&self.store, line_id).await {
            Ok(Some(project)) => {
                self.registry.set_project(line_id, &project);
                Some(project)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(line_id, error = %e, "project lookup failed");
                None
            }
        }
    }

    async fn route(&self, line_id: &str, msg: InboundMessage) {
        // Intra-process dedupe: `message` and `message_create` both fire
        // for the same delivery.
        if !self.seen.insert(&msg.id) {
            tracing::debug!(message_id = %msg.id, "duplicate delivery skipped");
            return;
        }
        if !msg.is_individual() || msg.from_me {
            return;
        }

        let Some(project_id) = self.resolve_project(line_id).await else {
            tracing::warn!(line_id, "message for line without project; dropped");
            return;
        };

        let contact = digits(&msg.from);
        let wa_phone = self
            .registry
            .get(line_id)
            .and_then(|s| s.phone)
            .map(|p| digits(&p));

        if msg.sender_name.is_some() || msg.avatar_url.is_some() {
            if let Err(e) = contacts::upsert_contact_name(
                &self.store,
                &project_id,
                &contact,
                msg.sender_name.as_deref(),
                msg.avatar_url.as_deref(),
            )
            .await
            {
                tracing::warn!(contact = %contact, error = %e, "contact name upsert failed");
            }
        }

        let chat = ChatRow {
            project_id: project_id.clone(),
            page_id: None,
            slug: None,
            line_id: Some(line_id.to_string()),
            wa_phone: wa_phone.clone(),
            contact: contact.clone(),
            message: (!msg.body.is_empty()).then(|| msg.body.clone()),
            created_at: Utc::now(),
        };
        if let Err(e) = chats::insert_chat(&self.store, &chat).await {
            tracing::warn!(contact = %contact, error = %e, "chat insert failed");
        }

        // One deterministic lead upsert: the trigger text overwrites
        // first_message, a plain message only fills the first gap.
        let triggered = LEAD_TRIGGER_RE.is_match(&msg.body);
        let lead = LeadRow {
            project_id: project_id.clone(),
            contact: contact.clone(),
            wa_phone: wa_phone.clone(),
            source_slug: None,
            source_page_id: None,
            page_id: None,
            slug: None,
            first_message: (!msg.body.is_empty()).then(|| msg.body.clone()),
            created_at: Utc::now(),
        };
        if let Err(e) = leads::upsert_lead(&self.store, &lead, triggered).await {
            tracing::warn!(contact = %contact, error = %e, "lead upsert failed");
        }

        match agenda::touch_agenda(&self.store, &project_id, &contact, wa_phone.as_deref(), None, None)
            .await
        {
            Ok(()) => {}
            Err(e) => tracing::warn!(contact = %contact, error = %e, "agenda touch failed"),
        }

        // First-contact Lead event: emitted when the contact had no
        // agenda row before this message.
        if self.is_first_contact(&project_id, &contact).await {
            self.emit_lead_event(&project_id, &contact).await;
        }

        // Receipt pipeline for accepted media.
        if let Some(media) = msg.media {
            if is_accepted_mimetype(&media.mimetype) {
                self.pipeline
                    .process(ReceiptCandidate {
                        project_id,
                        line_id: line_id.to_string(),
                        contact,
                        wa_phone,
                        caption: msg.body,
                        media,
                    })
                    .await;
            } else {
                tracing::debug!(mimetype = %media.mimetype, "media skipped: unsupported type");
            }
        }
    }

    /// A contact is "first seen" when their chat history holds exactly
    /// the row just written.
    async fn is_first_contact(&self, project_id: &str, contact: &str) -> bool {
        match self
            .store
            .select(
                "analytics_chats",
                &[("project_id", project_id), ("contact", contact)],
                "contact",
            )
            .await
        {
            Ok(rows) => rows.len() <= 1,
            Err(e) => {
                tracing::debug!(contact, error = %e, "first-contact check failed");
                false
            }
        }
    }

    async fn emit_lead_event(&self, project_id: &str, contact: &str) {
        match pages::find_page(&self.store, project_id, None, None).await {
            Ok(Some(page)) => {
                if let (Some(pixel_id), Some(token)) = (page.fb_pixel_id, page.fb_access_token) {
                    self.ads.emit(
                        PixelConfig {
                            pixel_id,
                            access_token: token,
                            test_event_code: page.fb_test_event_code,
                        },
                        ConversionEvent {
                            kind: EventKind::Lead,
                            contact: contact.to_string(),
                            value: None,
                            event_source_url: None,
                        },
                    );
                }
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(project_id, error = %e, "page lookup failed"),
        }
    }
}

#[async_trait]
impl MessageHandler for InboundRouter {
    async fn handle(&self, line_id: &str, message: InboundMessage) {
        self.route(line_id, message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobro_core::MediaPayload;

    fn test_router() -> (Arc<InboundRouter>, Arc<SeenMessages>) {
        let registry = Arc::new(LineRegistry::new());
        let seen = Arc::new(SeenMessages::new());
        // Unroutable store: every persistence call fails fast and is
        // logged; the router's control flow must not care.
        let store = SupabaseClient::new("http://127.0.0.1:1", "test-key");
        let storage = store.storage("receipts");
        let pipeline = ReceiptPipeline::new(store.clone(), storage, AdEventClient::new(), true);
        let router = InboundRouter::new(
            registry,
            Arc::clone(&seen),
            store,
            AdEventClient::new(),
            pipeline,
        );
        (router, seen)
    }

    fn message(id: &str, chat_id: &str, from_me: bool) -> InboundMessage {
        InboundMessage {
            id: id.into(),
            chat_id: chat_id.into(),
            from: chat_id.into(),
            body: "hola".into(),
            timestamp: 0,
            from_me,
            sender_name: None,
            avatar_url: None,
            media: None,
        }
    }

    #[test]
    fn lead_trigger_regex_accepts_common_shapes() {
        for text in [
            "hola mi codigo de descuento es PROMO10",
            "Hola mi código de descuento es: VERANO-22",
            "  hola  mi codigo de descuento es - X1",
        ] {
            assert!(LEAD_TRIGGER_RE.is_match(text), "{text}");
        }
        for text in [
            "mi codigo de descuento es PROMO10",
            "hola mi codigo de descuento es",
            "hola, mi codigo de descuento es X",
        ] {
            assert!(!LEAD_TRIGGER_RE.is_match(text), "{text}");
        }
    }

    #[tokio::test]
    async fn replayed_message_id_is_processed_once() {
        let (router, seen) = test_router();
        let msg = message("m1", "549115550001@c.us", false);
        router.handle("l1", msg.clone()).await;
        router.handle("l1", msg).await;
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn group_and_self_messages_are_skipped_after_dedupe() {
        let (router, seen) = test_router();
        router
            .handle("l1", message("g1", "12036555555@g.us", false))
            .await;
        router
            .handle("l1", message("s1", "549115550001@c.us", true))
            .await;
        // Both ids land in the seen set but neither progresses further
        // (no project lookup can succeed against the unroutable store,
        // and the skip happens before it is consulted for these).
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn media_message_with_unsupported_type_is_not_piped() {
        let (router, _) = test_router();
        let mut msg = message("v1", "549115550001@c.us", false);
        msg.media = Some(MediaPayload {
            mimetype: "video/mp4".into(),
            bytes: vec![0; 16],
        });
        // Must complete without panicking; the pipeline is never invoked
        // for a rejected mimetype (the project guard drops the message
        // first against the unroutable store anyway).
        router.handle("l1", msg).await;
    }
}
