//! Shared text normalisation and the keyword/regex vocabulary used across
//! the recognition modules.
//!
//! OCR output from payment screenshots is noisy in predictable ways:
//! exotic Unicode spaces from the original layout, curly quotes, and a
//! `$` glyph frequently misread as `S`. Everything downstream works on the
//! normalised form.

use once_cell::sync::Lazy;
use regex::Regex;

/// Replace exotic spaces, unify quotes and restore `$` from its common
/// OCR misreadings, then collapse runs of blanks inside each line.
pub fn normalize_text(raw: &str) -> String {
    let mut s = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\u{00A0}' | '\u{202F}' | '\u{2007}' | '\u{2009}' => s.push(' '),
            '\u{2018}' | '\u{2019}' | '\u{00B4}' | '`' => s.push('\''),
            '\u{201C}' | '\u{201D}' => s.push('"'),
            _ => s.push(c),
        }
    }
    // `$` misread as `S` before the digits, and the `ARS` prefix.
    let s = s.replace("S$", "$");
    let s = S_ZERO_RE.replace_all(&s, regex::NoExpand("$ ")).into_owned();
    let s = ARS_RE.replace_all(&s, regex::NoExpand("$")).into_owned();
    COLLAPSE_RE.replace_all(&s, " ").into_owned()
}

/// Normalised, trimmed, non-empty lines.
pub fn lines(text: &str) -> Vec<String> {
    normalize_text(text)
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

static S_ZERO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bS 0(?:\s|$)").unwrap());
static ARS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bARS ").unwrap());
static COLLAPSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());

/// Labels that precede long digit runs which are NOT money (tax ids,
/// account numbers, operation ids). A line carrying one of these never
/// yields an amount candidate. Accent-stripped spellings are included
/// because the OCR character whitelist cannot emit accented glyphs.
const BAD_CONTEXT: [&str; 16] = [
    "cuit",
    "cuil",
    "cvu",
    "cbu",
    "coelsa",
    "operación",
    "operacion",
    "transacción",
    "transaccion",
    "identificación",
    "identificacion",
    "código",
    "codigo",
    "número",
    "numero",
    "referencia",
];

pub fn is_bad_context_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    BAD_CONTEXT.iter().any(|kw| lower.contains(kw))
}

/// Keywords that mark a line as money-adjacent; candidates within three
/// lines of one get a priority boost.
static KEY_NEAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(comprobante|transferencia|motivo|mercado\s*pago|pagaste|enviaste|de|para|monto|importe|total)\b",
    )
    .unwrap()
});

pub fn is_key_near_line(line: &str) -> bool {
    KEY_NEAR_RE.is_match(line)
}

/// `$`-led numeric token, including the separators OCR tends to inject.
/// Horizontal whitespace only: a token never continues past a line break.
pub static DOLLAR_AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$[ \t]*([0-9][0-9., \t\x{00A0}\x{202F}]*)").unwrap());

/// Grouped-thousands numeric (`1.234.567`, `12 345`, `1,234,567.89`) or a
/// long bare run of five-plus digits, with an optional short decimal tail.
pub static GROUPED_OR_LONG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[1-9]\d{0,2}(?:[.,\s\x{00A0}\x{202F}]\d{3})+(?:[.,]\d{1,2})?|[1-9]\d{4,}(?:[.,]\d{1,2})?",
    )
    .unwrap()
});

/// Grouped-thousands shape only (used as a scoring signal).
pub static GROUPED_THOUSANDS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[1-9]\d{0,2}(?:[.,]\d{3})+").unwrap());

/// Find grouped-or-long tokens on a line, skipping matches that start in
/// the middle of a longer digit run (a sub-slice of a 22-digit CBU is not
/// a candidate).
pub fn grouped_tokens(line: &str) -> Vec<&str> {
    GROUPED_OR_LONG_RE
        .find_iter(line)
        .filter(|m| {
            !line[..m.start()]
                .chars()
                .next_back()
                .map(|c| c.is_ascii_digit() || c == ',' || c == '.')
                .unwrap_or(false)
        })
        .map(|m| m.as_str())
        .collect()
}

/// Count of ASCII digits in a token.
pub fn digit_count(token: &str) -> usize {
    token.chars().filter(|c| c.is_ascii_digit()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_ocr_currency_misreads() {
        assert_eq!(normalize_text("S$ 1.500"), "$ 1.500");
        assert_eq!(normalize_text("ARS 1.500"), "$1.500");
        assert!(normalize_text("S 0 1.500").starts_with("$ "));
    }

    #[test]
    fn normalizes_exotic_spaces() {
        let s = normalize_text("1\u{00A0}500 y 2\u{202F}000");
        assert_eq!(s, "1 500 y 2 000");
    }

    #[test]
    fn bad_context_matches_with_and_without_accents() {
        assert!(is_bad_context_line("Número de operación: 12345678"));
        assert!(is_bad_context_line("numero de operacion: 12345678"));
        assert!(is_bad_context_line("CVU 0000003100012345678901"));
        assert!(!is_bad_context_line("Monto $ 7.500"));
    }

    #[test]
    fn key_near_uses_word_boundaries() {
        assert!(is_key_near_line("Total a pagar"));
        assert!(is_key_near_line("de Juan Perez"));
        // "de" inside another word must not count.
        assert!(!is_key_near_line("saldo pendiente"));
    }

    #[test]
    fn grouped_tokens_skip_mid_run_matches() {
        let toks = grouped_tokens("0000003100012345678901");
        // Any match inside the 22-digit run starts after a digit and is
        // dropped; the run itself starts with 0 so it never matches.
        assert!(toks.is_empty());

        let toks = grouped_tokens("pagaste 15.000,00 hoy");
        assert_eq!(toks, vec!["15.000,00"]);
    }
}
