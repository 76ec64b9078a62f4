//! Receipt scoring.
//!
//! The score accumulates independent boolean signals over the combined
//! caption + OCR text; the pipeline accepts a candidate at `score >= 4`
//! with a positive amount. Signals only ever add, so the score is
//! monotonic in them.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::amount::find_amount;
use crate::templates::{detect_provider, parse_with_templates};
use crate::text::{normalize_text, GROUPED_THOUSANDS_RE};

/// Scorer output: the integer score plus the chosen amount/provider pair.
#[derive(Debug, Clone, Default)]
pub struct ScoreResult {
    pub score: u32,
    pub amount: Option<f64>,
    pub provider: Option<String>,
}

static LABELLED_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:operaci[oó]n|transacci[oó]n|c[oó]digo|identificaci[oó]n)\s*:\s*\S+")
        .unwrap()
});

/// Weaker one-point markers. Accent-stripped variants included: the OCR
/// whitelist strips accents, captions keep them.
const WEAK_MARKERS: [&str; 7] = [
    "pagaste",
    "recibo",
    "pago realizado",
    "número de operación",
    "numero de operacion",
    "código de identificación",
    "codigo de identificacion",
];

const ID_MARKERS: [&str; 4] = ["cuit", "cvu", "cbu", "beneficiario"];

const BANK_NAMES: [&str; 16] = [
    "mercado pago",
    "mercadopago",
    "ualá",
    "uala",
    "santander",
    "galicia",
    "bbva",
    "macro",
    "hsbc",
    "icbc",
    "nación",
    "nacion",
    "patagonia",
    "credicoop",
    "brubank",
    "naranja x",
];

/// Score the combined text and settle the amount/provider pair.
pub fn score_text(raw: &str) -> ScoreResult {
    let text = normalize_text(raw);
    let lower = text.to_lowercase();

    let template = parse_with_templates(&text);
    let finder_amount = find_amount(&text);

    // Prefer the template amount when the template matched; upgrade a
    // sub-1000 pick when the template holds a four-digit candidate.
    let mut amount = match &template {
        Some(t) => Some(t.amount),
        None => finder_amount,
    };
    if let (Some(a), Some(t)) = (amount, &template) {
        if a < 1000.0 && t.amount > 1000.0 {
            amount = Some(t.amount);
        }
    }

    let mut score = 0u32;
    let mut add = |cond: bool, weight: u32| {
        if cond {
            score += weight;
        }
    };

    add(lower.contains("comprobante de transferencia"), 2);
    add(lower.contains("enviaste"), 1);
    add(lower.contains("comprobante"), 2);
    add(lower.contains("transferencia"), 2);
    add(lower.contains("mercado pago"), 2);
    add(WEAK_MARKERS.iter().any(|m| lower.contains(m)), 1);
    add(BANK_NAMES.iter().any(|b| lower.contains(b)), 1);
    add(amount.is_some(), 3);
    add(LABELLED_ID_RE.is_match(&text), 1);
    add(ID_MARKERS.iter().any(|m| lower.contains(m)), 1);
    add(lower.contains('$'), 1);
    add(
        GROUPED_THOUSANDS_RE.is_match(&text) && amount.map(|a| a >= 1000.0).unwrap_or(false),
        2,
    );
    add(template.is_some() && amount.is_some(), 3);

    // Provider identification survives a failed amount parse so the
    // downstream Mercado Pago escalations still know who they are
    // dealing with.
    let provider = template
        .map(|t| t.provider)
        .or_else(|| detect_provider(&text).map(str::to_string));

    ScoreResult {
        score,
        amount,
        provider,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mercado_pago_screenshot_scores_high() {
        let r = score_text("Mercado Pago\nPagaste\n$ 15.000,00\nReferencia: AB-12");
        assert_eq!(r.provider.as_deref(), Some("Mercado Pago"));
        assert_eq!(r.amount, Some(15_000.0));
        assert!(r.score >= 11, "score was {}", r.score);
    }

    #[test]
    fn galicia_transfer_scores_high() {
        let r = score_text("Comprobante de transferencia\nBanco Galicia\nMonto $ 7.500");
        assert_eq!(r.provider.as_deref(), Some("Galicia"));
        assert_eq!(r.amount, Some(7_500.0));
        assert!(r.score >= 9, "score was {}", r.score);
    }

    #[test]
    fn plain_chat_text_scores_low() {
        let r = score_text("hola, te mando el finde la plata");
        assert!(r.score < 4, "score was {}", r.score);
        assert_eq!(r.amount, None);
    }

    #[test]
    fn score_is_monotonic_in_signals() {
        let base = score_text("transferencia $ 5.000");
        let more = score_text("comprobante de transferencia $ 5.000 CUIT beneficiario");
        assert!(more.score >= base.score);
    }

    #[test]
    fn template_amount_preferred_over_small_finder_pick() {
        // Finder alone would keep 350 (lone sub-1000 `$` value on a
        // bad-context-free line); the Galicia template's grouped amount
        // must win.
        let r = score_text("Galicia\nImporte 12.500\ncargo $ 350");
        assert_eq!(r.amount, Some(12_500.0));
    }

    #[test]
    fn amount_signal_requires_positive_parse() {
        let r = score_text("comprobante transferencia sin monto");
        // comprobante 2 + transferencia 2, no amount signals.
        assert_eq!(r.amount, None);
        assert_eq!(r.score, 4);
    }
}
