//! Origin/destination party extraction plus concept and operation ids.
//!
//! Receipts lay the two parties out as labelled sections. The extractor
//! carves each section by keyword, pulls name / CUIT / account / bank out
//! of the block, then fills remaining gaps from global matches and the
//! provider template.

use once_cell::sync::Lazy;
use regex::Regex;

use cobro_core::{ParsedReceipt, Party};

use crate::amount::find_amount;
use crate::templates::parse_with_templates;
use crate::text::normalize_text;

static ORIGIN_START_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(origen|de|desde|emisor|remitente)\b").unwrap());
static ORIGIN_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(destino|para|archivo|adjunto|comprobante)\b").unwrap());
static DEST_START_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(destino|para|a|beneficiario|receptor)\b").unwrap());
static DEST_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(archivo|adjunto|comprobante)\b").unwrap());

static NAME_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)\b(?:nombre|titular|beneficiario)\s*:\s*(.+)$").unwrap());
static NAME_PREP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)\b(?:de|para|a)\s*:\s*(.+)$").unwrap());
static LONG_DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{5,}").unwrap());

static CUIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{2})-?(\d{8})-?(\d)\b").unwrap());
static ACCOUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{22}\b").unwrap());
static ALIAS_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)\b(?:alias|cvu|cbu)\s*:?\s*([A-Za-z0-9][A-Za-z0-9._-]{5,})").unwrap()
});
static ALIAS_FREE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9]+(?:[._-][A-Za-z0-9]+)+\b").unwrap());
static TEN_DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{10,}").unwrap());

static BANCO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bbanco\s+([a-záéíóúñA-ZÁÉÍÓÚÑ]{3,30})").unwrap());

static CONCEPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)\bconcepto\s*:\s*(.{1,120})").unwrap());
static OPERATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:operaci[oó]n|transacci[oó]n|nro\.?\s*op\.?)\s*:?\s*#?\s*([A-Za-z0-9-]{2,40})")
        .unwrap()
});
static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:referencia|ref|c[oó]digo|cod)\s*\.?\s*:?\s*([A-Za-z0-9-]{2,40})").unwrap()
});

/// Known bank / wallet names. Lookup keys are lowercase substrings, values
/// the canonical label recorded on the conversion.
const BANKS: [(&str, &str); 17] = [
    ("mercado pago", "Mercado Pago"),
    ("mercadopago", "Mercado Pago"),
    ("ualá", "Ualá"),
    ("uala", "Ualá"),
    ("santander", "Santander"),
    ("galicia", "Galicia"),
    ("bbva", "BBVA"),
    ("macro", "Macro"),
    ("hsbc", "HSBC"),
    ("icbc", "ICBC"),
    ("nación", "Banco Nación"),
    ("nacion", "Banco Nación"),
    ("bna", "Banco Nación"),
    ("patagonia", "Patagonia"),
    ("credicoop", "Credicoop"),
    ("brubank", "Brubank"),
    ("prex", "Prex"),
];

/// Naranja X is looked up separately so the bare word "naranja" in a
/// concept line does not misfire as a bank.
const NARANJA: (&str, &str) = ("naranja x", "Naranja X");

/// Run the full field extraction over raw text (caption + OCR output).
/// The score is left at zero; the scorer owns it.
pub fn extract_receipt(raw: &str) -> ParsedReceipt {
    let text = normalize_text(raw);
    let template = parse_with_templates(&text);

    let (amount, provider) = match &template {
        Some(t) => (Some(t.amount), Some(t.provider.clone())),
        None => (find_amount(&text), None),
    };

    let origin_block = carve(&text, &ORIGIN_START_RE, &ORIGIN_END_RE);
    let dest_block = carve(&text, &DEST_START_RE, &DEST_END_RE);

    let mut origin = extract_party(origin_block.as_deref());
    let mut destination = extract_party(dest_block.as_deref());

    apply_global_fallbacks(&text, &mut origin, &mut destination);
    if let Some(t) = &template {
        if origin.name.is_none() {
            origin.name = t.name_from.clone();
        }
        if destination.name.is_none() {
            destination.name = t.name_to.clone();
        }
    }

    ParsedReceipt {
        amount,
        provider,
        score: 0,
        concept: CONCEPT_RE
            .captures(&text)
            .map(|c| c[1].trim().to_string())
            .filter(|s| !s.is_empty()),
        transaction: OPERATION_RE.captures(&text).map(|c| c[1].to_string()),
        reference: REFERENCE_RE.captures(&text).map(|c| c[1].to_string()),
        origin,
        destination,
    }
}

/// Cut the substring from the first start-keyword to the next boundary
/// keyword after it (or the end of the text).
fn carve(text: &str, start_re: &Regex, end_re: &Regex) -> Option<String> {
    let start = start_re.find(text)?.start();
    let tail = &text[start..];
    // The boundary search skips the start keyword itself.
    let keyword_end = start_re.find(tail).map(|m| m.end()).unwrap_or(0);
    let end = end_re
        .find_at(tail, keyword_end)
        .map(|m| m.start())
        .unwrap_or(tail.len());
    Some(tail[..end].to_string())
}

fn extract_party(block: Option<&str>) -> Party {
    let Some(block) = block else {
        return Party::default();
    };
    Party {
        name: extract_name(block),
        cuit: CUIT_RE
            .captures(block)
            .map(|c| format!("{}{}{}", &c[1], &c[2], &c[3])),
        account: extract_account(block),
        bank: lookup_bank(block),
    }
}

fn extract_name(block: &str) -> Option<String> {
    if let Some(c) = NAME_LABEL_RE.captures(block) {
        return clean_name(&c[1]);
    }
    if let Some(c) = NAME_PREP_RE.captures(block) {
        return clean_name(&c[1]);
    }
    // First line that looks like a person: has letters, no long digit run
    // and is not receipt boilerplate.
    block
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .find(|l| {
            l.chars().any(|c| c.is_alphabetic())
                && !LONG_DIGITS_RE.is_match(l)
                && !is_boilerplate_line(l)
        })
        .and_then(clean_name)
}

fn is_boilerplate_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    [
        "transferencia",
        "comprobante",
        "banco",
        "monto",
        "importe",
        "total",
        "pagaste",
        "enviaste",
        "archivo",
        "adjunto",
    ]
    .iter()
    .any(|kw| lower.contains(kw))
}

fn clean_name(raw: &str) -> Option<String> {
    let mut name = raw.trim().trim_end_matches(['.', ',', ':']).to_string();
    // Drop a leading section keyword left over from carving.
    for prefix in ["origen", "destino", "de ", "para ", "desde "] {
        let lower = name.to_lowercase();
        if let Some(rest) = lower.strip_prefix(prefix) {
            let cut = name.len() - rest.len();
            name = name[cut..].trim().to_string();
        }
    }
    if name.len() > 80 {
        name.truncate(80);
    }
    if name.chars().any(|c| c.is_alphabetic()) {
        Some(name)
    } else {
        None
    }
}

fn extract_account(block: &str) -> Option<String> {
    if let Some(m) = ACCOUNT_RE.find(block) {
        return Some(m.as_str().to_string());
    }
    if let Some(c) = ALIAS_LABEL_RE.captures(block) {
        return Some(c[1].to_string());
    }
    // Free-floating alias: dotted/dashed token with at least one letter
    // and no long digit run (which would be an id, not an alias).
    ALIAS_FREE_RE
        .find_iter(block)
        .map(|m| m.as_str())
        .find(|t| {
            t.len() >= 6
                && t.chars().any(|c| c.is_alphabetic())
                && !TEN_DIGITS_RE.is_match(t)
        })
        .map(|t| t.to_string())
}

fn lookup_bank(block: &str) -> Option<String> {
    let lower = block.to_lowercase();
    if lower.contains(NARANJA.0) {
        return Some(NARANJA.1.to_string());
    }
    for (needle, label) in BANKS {
        if lower.contains(needle) {
            return Some(label.to_string());
        }
    }
    BANCO_RE.captures(block).map(|c| {
        let raw = c[1].trim();
        format!("Banco {raw}")
    })
}

/// Fill remaining gaps from matches over the whole text: first CUIT and
/// account go to the origin, last ones to the destination; a globally
/// guessed bank fills any block still missing one.
fn apply_global_fallbacks(text: &str, origin: &mut Party, destination: &mut Party) {
    let cuits: Vec<String> = CUIT_RE
        .captures_iter(text)
        .map(|c| format!("{}{}{}", &c[1], &c[2], &c[3]))
        .collect();
    if origin.cuit.is_none() {
        origin.cuit = cuits.first().cloned();
    }
    if destination.cuit.is_none() {
        destination.cuit = cuits.last().cloned();
    }

    let accounts: Vec<String> = ACCOUNT_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();
    if origin.account.is_none() {
        origin.account = accounts.first().cloned();
    }
    if destination.account.is_none() {
        destination.account = accounts.last().cloned();
    }

    if origin.bank.is_none() || destination.bank.is_none() {
        let global_bank = lookup_bank(text);
        if origin.bank.is_none() {
            origin.bank = global_bank.clone();
        }
        if destination.bank.is_none() {
            destination.bank = global_bank;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labelled_blocks_extract_both_parties() {
        let text = "De: Juan Perez\nCUIT 20-12345678-9\nCVU 0000003100012345678901\n\
                    Para: Maria Lopez\nCUIT: 27-87654321-3\nBanco Galicia";
        let r = extract_receipt(text);
        assert_eq!(r.origin.name.as_deref(), Some("Juan Perez"));
        assert_eq!(r.origin.cuit.as_deref(), Some("20123456789"));
        assert_eq!(
            r.origin.account.as_deref(),
            Some("0000003100012345678901")
        );
        assert_eq!(r.destination.name.as_deref(), Some("Maria Lopez"));
        assert_eq!(r.destination.cuit.as_deref(), Some("27876543213"));
        assert_eq!(r.destination.bank.as_deref(), Some("Galicia"));
    }

    #[test]
    fn global_cuit_falls_back_to_origin() {
        let text = "CUIT 20-12345678-9\nCVU 0000003100012345678901\n$ 2.345.678,90";
        let r = extract_receipt(text);
        assert_eq!(r.origin.cuit.as_deref(), Some("20123456789"));
        // The 22-digit token is an account, never an amount.
        assert_eq!(r.amount, Some(2_345_678.9));
    }

    #[test]
    fn concept_operation_and_reference() {
        let text = "Concepto: Varios\nOperación: 123456\nReferencia: AB-12";
        let r = extract_receipt(text);
        assert_eq!(r.concept.as_deref(), Some("Varios"));
        assert_eq!(r.transaction.as_deref(), Some("123456"));
        assert_eq!(r.reference.as_deref(), Some("AB-12"));
    }

    #[test]
    fn reference_from_mercado_pago_receipt() {
        let text = "Mercado Pago\nPagaste\n$ 15.000,00\nReferencia: AB-12";
        let r = extract_receipt(text);
        assert_eq!(r.provider.as_deref(), Some("Mercado Pago"));
        assert_eq!(r.amount, Some(15_000.0));
        assert_eq!(r.reference.as_deref(), Some("AB-12"));
    }

    #[test]
    fn labelled_alias_is_an_account() {
        let text = "Para: Maria\nAlias: maria.lopez.mp";
        let r = extract_receipt(text);
        assert_eq!(r.destination.account.as_deref(), Some("maria.lopez.mp"));
    }

    #[test]
    fn free_floating_alias_needs_letters_and_short_digit_runs() {
        let text = "Para: Maria\njuan.perez.galicia enviado";
        let r = extract_receipt(text);
        assert_eq!(
            r.destination.account.as_deref(),
            Some("juan.perez.galicia")
        );

        // A dashed id with a long digit run is not an alias.
        let text = "Para: Maria\nid 1234567890-99";
        let r = extract_receipt(text);
        assert_eq!(r.destination.account, None);
    }

    #[test]
    fn banco_regex_fallback() {
        let text = "Para: Maria\nBanco Provincia";
        let r = extract_receipt(text);
        assert_eq!(r.destination.bank.as_deref(), Some("Banco Provincia"));
    }

    #[test]
    fn amount_falls_back_to_finder_without_template() {
        let text = "Comprobante de transferencia\nMonto $ 9.000";
        let r = extract_receipt(text);
        assert_eq!(r.provider, None);
        assert_eq!(r.amount, Some(9_000.0));
    }
}
