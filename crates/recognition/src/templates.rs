//! Provider fingerprints and the template-driven parse.
//!
//! Each registry entry pairs a provider test with an amount-line
//! heuristic. Order matters: Mercado Pago sits first because its
//! screenshots are the noisiest and would otherwise be swallowed by the
//! generic bank matchers further down.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::numeric::normalize_numeric_token;
use crate::text::{grouped_tokens, normalize_text, DOLLAR_AMOUNT_RE};

/// A provider fingerprint.
pub struct TemplateEntry {
    pub provider: &'static str,
    /// Matches somewhere in the normalised text when the receipt belongs
    /// to this provider.
    pub test: Regex,
    /// Marks the line(s) that carry the headline amount.
    pub amount_line: Regex,
    /// Optional counterparty captures.
    pub name_from: Option<Regex>,
    pub name_to: Option<Regex>,
}

/// Successful template parse.
#[derive(Debug, Clone, Default)]
pub struct TemplateMatch {
    pub provider: String,
    pub amount: f64,
    pub cuit: Option<String>,
    pub account: Option<String>,
    pub name_from: Option<String>,
    pub name_to: Option<String>,
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

/// Ordered provider registry.
pub static TEMPLATES: Lazy<Vec<TemplateEntry>> = Lazy::new(|| {
    vec![
        TemplateEntry {
            provider: "Mercado Pago",
            test: re(r"(?i)mercado\s*pago|mercadopago"),
            amount_line: re(r"(?i)pagaste|enviaste|recibiste|total|monto"),
            name_from: Some(re(r"(?i)\bde\s*:?\s+([A-Za-zÁÉÍÓÚÑáéíóúñ][A-Za-zÁÉÍÓÚÑáéíóúñ .'-]{2,60})")),
            name_to: Some(re(r"(?i)\bpara\s*:?\s+([A-Za-zÁÉÍÓÚÑáéíóúñ][A-Za-zÁÉÍÓÚÑáéíóúñ .'-]{2,60})")),
        },
        TemplateEntry {
            provider: "Naranja X",
            test: re(r"(?i)naranja\s*x?\b"),
            amount_line: re(r"(?i)monto|total|enviaste"),
            name_from: None,
            name_to: Some(re(r"(?i)\bpara\s*:?\s+([A-Za-zÁÉÍÓÚÑáéíóúñ][A-Za-zÁÉÍÓÚÑáéíóúñ .'-]{2,60})")),
        },
        TemplateEntry {
            provider: "Prex",
            test: re(r"(?i)\bprex\b"),
            amount_line: re(r"(?i)monto|importe|total"),
            name_from: None,
            name_to: None,
        },
        TemplateEntry {
            provider: "Ualá",
            test: re(r"(?i)ual[aá]|\buala\b"),
            amount_line: re(r"(?i)monto|importe|enviaste|total"),
            name_from: None,
            name_to: None,
        },
        TemplateEntry {
            provider: "Banco Nación",
            test: re(r"(?i)banco\s+de\s+la\s+naci[oó]n|banco\s+naci[oó]n|\bbna\b"),
            amount_line: re(r"(?i)importe|monto|total"),
            name_from: Some(re(r"(?i)ordenante\s*:?\s+([A-Za-zÁÉÍÓÚÑáéíóúñ][A-Za-zÁÉÍÓÚÑáéíóúñ .'-]{2,60})")),
            name_to: Some(re(r"(?i)beneficiario\s*:?\s+([A-Za-zÁÉÍÓÚÑáéíóúñ][A-Za-zÁÉÍÓÚÑáéíóúñ .'-]{2,60})")),
        },
        TemplateEntry {
            provider: "Santander",
            test: re(r"(?i)santander"),
            amount_line: re(r"(?i)importe|monto|total"),
            name_from: None,
            name_to: Some(re(r"(?i)beneficiario\s*:?\s+([A-Za-zÁÉÍÓÚÑáéíóúñ][A-Za-zÁÉÍÓÚÑáéíóúñ .'-]{2,60})")),
        },
        TemplateEntry {
            provider: "Galicia",
            test: re(r"(?i)galicia"),
            amount_line: re(r"(?i)importe|monto|total"),
            name_from: None,
            name_to: None,
        },
    ]
});

static CUIT_RE: Lazy<Regex> = Lazy::new(|| re(r"\b(\d{2})-?(\d{8})-?(\d)\b"));
static ACCOUNT_RE: Lazy<Regex> = Lazy::new(|| re(r"\b\d{22}\b"));

/// Provider identification alone: the first entry whose fingerprint
/// matches, regardless of whether an amount can be read. The visual
/// fallback keys off this when the textual parse comes back empty.
pub fn detect_provider(raw: &str) -> Option<&'static str> {
    let text = normalize_text(raw);
    TEMPLATES
        .iter()
        .find(|entry| entry.test.is_match(&text))
        .map(|entry| entry.provider)
}

/// Run the registry over raw text. The first entry that both matches and
/// yields a positive amount wins.
pub fn parse_with_templates(raw: &str) -> Option<TemplateMatch> {
    let text = normalize_text(raw);
    let lines: Vec<&str> = text.lines().map(|l| l.trim()).collect();

    for entry in TEMPLATES.iter() {
        if !entry.test.is_match(&text) {
            continue;
        }

        let mut best: Option<f64> = None;
        for line in &lines {
            if !entry.amount_line.is_match(line) && !line.contains('$') {
                continue;
            }
            for value in line_amounts(line) {
                if value > 0.0 {
                    best = Some(best.map_or(value, |b: f64| b.max(value)));
                }
            }
        }
        if best.is_none() {
            // Fall back to every `$`-led numeric anywhere in the text.
            for cap in DOLLAR_AMOUNT_RE.captures_iter(&text) {
                if let Some(value) = normalize_numeric_token(&cap[1]) {
                    if value > 0.0 {
                        best = Some(best.map_or(value, |b: f64| b.max(value)));
                    }
                }
            }
        }

        if let Some(amount) = best {
            return Some(TemplateMatch {
                provider: entry.provider.to_string(),
                amount,
                cuit: CUIT_RE
                    .captures(&text)
                    .map(|c| format!("{}{}{}", &c[1], &c[2], &c[3])),
                account: ACCOUNT_RE.find(&text).map(|m| m.as_str().to_string()),
                name_from: capture_name(entry.name_from.as_ref(), &text),
                name_to: capture_name(entry.name_to.as_ref(), &text),
            });
        }
    }
    None
}

/// All numeric candidates on a single line: `$`-led tokens plus grouped or
/// long bare numerics.
fn line_amounts(line: &str) -> Vec<f64> {
    let mut values = Vec::new();
    for cap in DOLLAR_AMOUNT_RE.captures_iter(line) {
        if let Some(v) = normalize_numeric_token(&cap[1]) {
            values.push(v);
        }
    }
    if values.is_empty() {
        for token in grouped_tokens(line) {
            if let Some(v) = normalize_numeric_token(token) {
                values.push(v);
            }
        }
    }
    values
}

fn capture_name(pattern: Option<&Regex>, text: &str) -> Option<String> {
    let name = pattern?
        .captures(text)?
        .get(1)?
        .as_str()
        .trim()
        .trim_end_matches(['.', ','])
        .to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mercado_pago_screenshot() {
        let text = "Mercado Pago\nPagaste\n$ 15.000,00\nReferencia: AB-12";
        let m = parse_with_templates(text).unwrap();
        assert_eq!(m.provider, "Mercado Pago");
        assert_eq!(m.amount, 15_000.0);
    }

    #[test]
    fn galicia_transfer() {
        let text = "Comprobante de transferencia\nBanco Galicia\nMonto $ 7.500";
        let m = parse_with_templates(text).unwrap();
        assert_eq!(m.provider, "Galicia");
        assert_eq!(m.amount, 7_500.0);
    }

    #[test]
    fn mercado_pago_precedes_banks() {
        // MP screenshot that also mentions Galicia as the destination
        // bank: MP must win on registry order.
        let text = "Mercado Pago\nEnviaste $ 5.000\nBanco destino: Galicia";
        let m = parse_with_templates(text).unwrap();
        assert_eq!(m.provider, "Mercado Pago");
    }

    #[test]
    fn cuit_and_account_are_captured() {
        let text = "Santander\nImporte $ 20.000\nCUIT 20-12345678-9\nCBU 0720001188000012345678";
        let m = parse_with_templates(text).unwrap();
        assert_eq!(m.cuit.as_deref(), Some("20123456789"));
        assert_eq!(m.account.as_deref(), Some("0720001188000012345678"));
    }

    #[test]
    fn no_provider_no_match() {
        assert!(parse_with_templates("transferencia $ 1.000").is_none());
    }

    #[test]
    fn provider_without_amount_is_not_a_match() {
        let text = "Mercado Pago te da la bienvenida";
        assert!(parse_with_templates(text).is_none());
        // Identification alone still works, for the visual fallback.
        assert_eq!(detect_provider(text), Some("Mercado Pago"));
    }

    #[test]
    fn dollar_fallback_scans_whole_text() {
        // Amount line keywords absent; the `$` token elsewhere still
        // resolves the amount.
        let text = "Ualá\ncomprobante adjunto\n$ 3.200";
        let m = parse_with_templates(text).unwrap();
        assert_eq!(m.provider, "Ualá");
        assert_eq!(m.amount, 3_200.0);
    }
}
