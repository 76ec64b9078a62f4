//! HTTP endpoints: line control, QR provisioning page, SSE status stream,
//! chat intake and the dev simulation hook.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::stream::Stream;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use cobro_core::{digits, InboundMessage, LineStatus};
use cobro_persistence::models::{ChatRow, LeadRow};
use cobro_persistence::queries::{agenda, chats, leads, sessions};

use crate::state::AppState;

/// SSE poll interval for line state changes.
const EVENTS_POLL: Duration = Duration::from_millis(700);
/// How long `POST /lines/:id/qr` waits for a QR to appear.
const QR_WAIT: Duration = Duration::from_secs(30);
const QR_POLL: Duration = Duration::from_millis(250);

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/qr", get(qr_page))
        .route("/lines/:id/events", get(line_events))
        .route("/lines/:id/qr", post(line_qr))
        .route("/lines/:id/status", get(line_status))
        .route("/lines/:id/qr.png", get(line_qr_png))
        .route("/lines/:id/restart", post(line_restart))
        .route("/lines/:id/start", post(line_start))
        .route("/api/chats/new", post(chats_new))
        .route("/dev/incoming", post(dev_incoming))
        .route("/pricing", get(pricing))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
struct QrPageQuery {
    line_id: Option<String>,
}

/// Minimal HTML page hosting the SSE-driven QR display.
async fn qr_page(Query(query): Query<QrPageQuery>) -> Html<String> {
    let line_id = query.line_id.unwrap_or_default();
    Html(QR_PAGE_TEMPLATE.replace("{{LINE_ID}}", &line_id))
}

const QR_PAGE_TEMPLATE: &str = r#"<!doctype html>
<html lang="es">
<head>
<meta charset="utf-8">
<title>Vincular WhatsApp</title>
<style>
  body { font-family: system-ui, sans-serif; display: flex; flex-direction: column;
         align-items: center; margin-top: 4rem; }
  #qr img { width: 300px; height: 300px; image-rendering: pixelated; }
  #msg { color: #555; margin-top: 1rem; }
</style>
</head>
<body>
<h2>Escane&aacute; el c&oacute;digo con WhatsApp</h2>
<div id="qr"></div>
<p id="msg">Generando QR&hellip;</p>
<script>
  const lineId = "{{LINE_ID}}";
  const qr = document.getElementById("qr");
  const msg = document.getElementById("msg");
  const source = new EventSource(`/lines/${lineId}/events`);
  source.onmessage = (e) => {
    const state = JSON.parse(e.data);
    if (state.qr) {
      qr.innerHTML = `<img src="${state.qr}" alt="QR">`;
      msg.textContent = "Esperando escaneo…";
    } else if (state.status === "ready") {
      qr.innerHTML = "";
      msg.textContent = `Conectado: ${state.phone ?? ""}`;
    } else {
      msg.textContent = "Generando QR…";
    }
  };
  source.onerror = () => { msg.textContent = "Reconectando…"; };
</script>
</body>
</html>
"#;

fn line_snapshot(state: &AppState, line_id: &str) -> serde_json::Value {
    match state.registry.get(line_id) {
        Some(line) => serde_json::json!({
            "status": line.status.as_str(),
            "phone": line.phone,
            "qr": line.last_qr.as_ref().map(|q| q.data_url.clone()),
        }),
        None => serde_json::json!({
            "status": "not_initialized",
            "phone": null,
            "qr": null,
        }),
    }
}

/// SSE stream of `{status, phone, qr}`, emitted on change.
async fn line_events(
    State(state): State<AppState>,
    Path(line_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    state.sessions.ensure_line(&line_id).await;

    struct Ctx {
        state: AppState,
        line_id: String,
        last: Option<String>,
    }
    let ctx = Ctx {
        state,
        line_id,
        last: None,
    };

    let stream = futures::stream::unfold(ctx, |mut ctx| async move {
        loop {
            let snapshot = line_snapshot(&ctx.state, &ctx.line_id);
            let rendered = snapshot.to_string();
            if ctx.last.as_deref() != Some(&rendered) {
                ctx.last = Some(rendered.clone());
                return Some((Ok(Event::default().data(rendered)), ctx));
            }
            tokio::time::sleep(EVENTS_POLL).await;
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Provision a line and wait for its QR.
async fn line_qr(
    State(state): State<AppState>,
    Path(line_id): Path<String>,
) -> Response {
    state.sessions.ensure_line(&line_id).await;

    let deadline = tokio::time::Instant::now() + QR_WAIT;
    loop {
        match state.registry.get(&line_id) {
            Some(line) if line.status == LineStatus::Error => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "qr_failed" })),
                )
                    .into_response();
            }
            Some(line) => {
                if line.last_qr.is_some() || line.status == LineStatus::Ready {
                    return Json(serde_json::json!({
                        "status": line.status.as_str(),
                        "qr": line.last_qr.as_ref().map(|q| q.data_url.clone()),
                    }))
                    .into_response();
                }
            }
            None => {}
        }
        if tokio::time::Instant::now() >= deadline {
            let status = state
                .registry
                .get(&line_id)
                .map(|l| l.status.as_str())
                .unwrap_or("not_initialized");
            return Json(serde_json::json!({ "status": status, "qr": null })).into_response();
        }
        tokio::time::sleep(QR_POLL).await;
    }
}

async fn line_status(
    State(state): State<AppState>,
    Path(line_id): Path<String>,
) -> Json<serde_json::Value> {
    match state.registry.get(&line_id) {
        Some(line) => Json(serde_json::json!({
            "status": line.status.as_str(),
            "phone": line.phone,
        })),
        None => Json(serde_json::json!({ "status": "not_initialized" })),
    }
}

async fn line_qr_png(
    State(state): State<AppState>,
    Path(line_id): Path<String>,
) -> Response {
    match state.registry.get(&line_id).and_then(|l| l.last_qr) {
        Some(qr) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "image/png")],
            qr.png,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn line_restart(
    State(state): State<AppState>,
    Path(line_id): Path<String>,
) -> Json<serde_json::Value> {
    state.sessions.restart_line(&line_id).await;
    Json(serde_json::json!({ "ok": true }))
}

/// Mark the line row as awaiting provisioning. No client action.
async fn line_start(
    State(state): State<AppState>,
    Path(line_id): Path<String>,
) -> Response {
    match sessions::mark_line_status(&state.store, &line_id, "qr_ready").await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => {
            tracing::warn!(line_id = %line_id, error = %e, "line start failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "status_failed" })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct NewChatBody {
    project_id: Option<String>,
    page_id: Option<String>,
    slug: Option<String>,
    line_id: Option<String>,
    wa_phone: Option<String>,
    contact: Option<String>,
    message: Option<String>,
    #[allow(dead_code)]
    name: Option<String>,
}

/// Web-originated chat intake: records the chat plus the lead/agenda rows
/// that carry the landing-page attribution.
async fn chats_new(
    State(state): State<AppState>,
    Json(body): Json<NewChatBody>,
) -> Response {
    let Some(project_id) = body.project_id.filter(|p| !p.is_empty()) else {
        return bad_request("missing_project_id");
    };
    let Some(contact) = body.contact.filter(|c| !c.is_empty()) else {
        return bad_request("missing_contact");
    };
    let contact = digits(&contact);

    let now = Utc::now();
    let chat = ChatRow {
        project_id: project_id.clone(),
        page_id: body.page_id.clone(),
        slug: body.slug.clone(),
        line_id: body.line_id.clone(),
        wa_phone: body.wa_phone.clone(),
        contact: contact.clone(),
        message: body.message.clone(),
        created_at: now,
    };
    if let Err(e) = chats::insert_chat(&state.store, &chat).await {
        tracing::warn!(contact = %contact, error = %e, "chat insert failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "insert_failed" })),
        )
            .into_response();
    }

    // Attribution rows are best-effort; the endpoint's contract is the
    // chat insert.
    let lead = LeadRow {
        project_id: project_id.clone(),
        contact: contact.clone(),
        wa_phone: body.wa_phone.clone(),
        source_slug: body.slug.clone(),
        source_page_id: body.page_id.clone(),
        page_id: body.page_id.clone(),
        slug: body.slug.clone(),
        first_message: body.message.clone(),
        created_at: now,
    };
    if let Err(e) = leads::upsert_lead(&state.store, &lead, false).await {
        tracing::warn!(contact = %contact, error = %e, "lead upsert failed");
    }
    if let Err(e) = agenda::touch_agenda(
        &state.store,
        &project_id,
        &contact,
        body.wa_phone.as_deref(),
        body.slug.as_deref(),
        body.page_id.as_deref(),
    )
    .await
    {
        tracing::warn!(contact = %contact, error = %e, "agenda touch failed");
    }

    Json(serde_json::json!({ "ok": true })).into_response()
}

fn bad_request(tag: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": tag })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct DevIncomingBody {
    line_id: String,
    #[serde(flatten)]
    message: InboundMessage,
}

/// Simulate an inbound message without a live client.
async fn dev_incoming(
    State(state): State<AppState>,
    Json(body): Json<DevIncomingBody>,
) -> Json<serde_json::Value> {
    use cobro_session::MessageHandler;
    state.router.handle(&body.line_id, body.message).await;
    Json(serde_json::json!({ "ok": true }))
}

async fn pricing(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "unit_usd": state.settings.pricing.unit_usd,
        "min_credits": state.settings.pricing.min_credits,
        "currency": "USD",
    }))
}
