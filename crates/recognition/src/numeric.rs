//! Argentine numeric token normalisation under OCR corruption.
//!
//! Receipts mix `.` thousands separators with `,` decimals, and OCR adds
//! its own damage: zeros read as `o`, stray spaces inside groups, currency
//! glyphs glued to the digits. The rules here resolve the common cases to
//! unambiguous values and escalate the one genuinely ambiguous shape
//! (`150.000` read as `150.0 00`) via the triple-zero hint.

use once_cell::sync::Lazy;
use regex::Regex;

static COMMA_GROUPED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(,\d{3})+(,\d{1,2})?$").unwrap());
static DOT_GROUPED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(\.\d{3})+(\.\d{1,2})?$").unwrap());
static DOT_ZEROS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.0{3,}").unwrap());

/// Parse a raw numeric token lifted from OCR text. Returns `None` when no
/// plausible non-negative value can be recovered.
pub fn normalize_numeric_token(raw: &str) -> Option<f64> {
    let triple_zero = has_triple_zero_hint(raw);

    // Exotic spaces to plain ones, `o`/`O` between digits back to zero,
    // then keep only digits and separators.
    let spaced: String = raw
        .chars()
        .map(|c| match c {
            '\u{00A0}' | '\u{202F}' => ' ',
            _ => c,
        })
        .collect();
    let repaired = repair_ocr_zeros(&spaced);
    let cleaned: String = repaired
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ',');
    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let has_dot = cleaned.contains('.');
    let has_comma = cleaned.contains(',');

    let value = if has_dot && has_comma {
        // `.` thousands, `,` decimal.
        cleaned.replace('.', "").replace(',', ".").parse().ok()?
    } else if has_comma {
        parse_comma_only(cleaned)?
    } else if has_dot {
        parse_dot_only(cleaned, triple_zero)?
    } else {
        cleaned.parse().ok()?
    };

    if value.is_finite() && value >= 0.0 {
        Some(value)
    } else {
        None
    }
}

/// True when the original token carries one of the OCR-corrupted
/// triple-zero shapes (`.000`, `.00o`, `.0o0`, `.oo0`) not followed by a
/// further digit. The hand-rolled scan stands in for a lookahead the
/// `regex` crate does not support.
pub fn has_triple_zero_hint(raw: &str) -> bool {
    let lower = raw.to_lowercase();
    let bytes = lower.as_bytes();
    for pat in [".000", ".00o", ".0o0", ".oo0"] {
        for (start, _) in lower.match_indices(pat) {
            let end = start + pat.len();
            let followed_by_digit = bytes.get(end).map(|b| b.is_ascii_digit()).unwrap_or(false);
            if !followed_by_digit {
                return true;
            }
        }
    }
    false
}

/// Replace `o`/`O` sandwiched between digits with `0`. Runs to a fixed
/// point so `1o0o5` resolves fully.
fn repair_ocr_zeros(s: &str) -> String {
    let mut current = s.to_string();
    loop {
        let bytes: Vec<char> = current.chars().collect();
        let mut next = String::with_capacity(current.len());
        let mut changed = false;
        for (i, c) in bytes.iter().enumerate() {
            if (*c == 'o' || *c == 'O')
                && i > 0
                && bytes[i - 1].is_ascii_digit()
                && bytes.get(i + 1).map(|n| n.is_ascii_digit()).unwrap_or(false)
            {
                next.push('0');
                changed = true;
            } else {
                next.push(*c);
            }
        }
        if !changed {
            return next;
        }
        current = next;
    }
}

fn parse_comma_only(cleaned: &str) -> Option<f64> {
    if COMMA_GROUPED_RE.is_match(cleaned) {
        let parts: Vec<&str> = cleaned.split(',').collect();
        let last = parts[parts.len() - 1];
        if last.len() <= 2 {
            let int_part = parts[..parts.len() - 1].concat();
            format!("{int_part}.{last}").parse().ok()
        } else {
            parts.concat().parse().ok()
        }
    } else {
        // Decimal comma; with several commas the last one wins.
        let parts: Vec<&str> = cleaned.split(',').collect();
        let (int_parts, dec) = parts.split_at(parts.len() - 1);
        format!("{}.{}", int_parts.concat(), dec[0]).parse().ok()
    }
}

fn parse_dot_only(cleaned: &str, triple_zero: bool) -> Option<f64> {
    if triple_zero {
        // Integer with OCR-mangled thousands groups.
        return cleaned.replace('.', "").parse().ok();
    }
    if DOT_GROUPED_RE.is_match(cleaned) {
        let parts: Vec<&str> = cleaned.split('.').collect();
        let last = parts[parts.len() - 1];
        return if last.len() <= 2 {
            let int_part = parts[..parts.len() - 1].concat();
            format!("{int_part}.{last}").parse().ok()
        } else {
            parts.concat().parse().ok()
        };
    }
    let last = cleaned.rsplit('.').next().unwrap_or("");
    if last.len() == 3 && last.chars().all(|c| c.is_ascii_digit()) {
        // Trailing group of exactly three digits reads as thousands.
        return cleaned.replace('.', "").parse().ok();
    }
    // Parse literally; a sub-1000 value whose source carried a run of
    // three-plus zeros after a dot was a mangled thousands group.
    let value: f64 = cleaned.parse().ok()?;
    if value < 1000.0 && DOT_ZEROS_RE.is_match(cleaned) {
        Some(value * 1000.0)
    } else {
        Some(value)
    }
}
