//! Best-amount selection from noisy multiline text.
//!
//! Two passes: `$`-led numbers win outright; only when none exist do
//! grouped or long bare numerics compete, ranked by how close they sit to
//! a money-adjacent keyword line.

use crate::numeric::normalize_numeric_token;
use crate::text::{
    digit_count, grouped_tokens, is_bad_context_line, is_key_near_line, normalize_text,
    DOLLAR_AMOUNT_RE,
};

/// Bounds outside which a candidate is never an amount.
pub const MIN_AMOUNT: f64 = 50.0;
pub const MAX_AMOUNT: f64 = 10_000_000.0;

const DOLLAR_PRIORITY: u32 = 6;
const KEY_NEAR_WINDOW: i64 = 3;

#[derive(Debug, Clone, Copy)]
struct Candidate {
    value: f64,
    priority: u32,
}

/// Pick the most plausible monetary amount from free text, or `None`.
pub fn find_amount(text: &str) -> Option<f64> {
    // Blank lines stay in place: the keyword-proximity window is measured
    // in physical lines.
    let normalized = normalize_text(text);
    let lines: Vec<&str> = normalized.lines().map(|l| l.trim()).collect();
    let key_near: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| is_key_near_line(l))
        .map(|(i, _)| i)
        .collect();

    let mut candidates: Vec<Candidate> = Vec::new();

    // Pass A: every `$`-led number on a non-excluded line.
    for line in &lines {
        if is_bad_context_line(line) {
            continue;
        }
        for cap in DOLLAR_AMOUNT_RE.captures_iter(line) {
            if let Some(value) = normalize_numeric_token(&cap[1]) {
                push_bounded(&mut candidates, value, DOLLAR_PRIORITY);
            }
        }
    }

    // Pass B: grouped or long bare numerics, only when no `$` candidate
    // survived.
    if candidates.is_empty() {
        for (idx, line) in lines.iter().enumerate() {
            if is_bad_context_line(line) {
                continue;
            }
            for token in grouped_tokens(line) {
                if is_year_token(token) {
                    continue;
                }
                let Some(value) = normalize_numeric_token(token) else {
                    continue;
                };
                let priority = 2 + proximity_boost(idx, &key_near);
                push_bounded(&mut candidates, value, priority);
            }
        }
    }

    // A receipt with any four-digit-plus amount makes sub-1000 noise
    // (cents fragments, quantities) irrelevant.
    if candidates.iter().any(|c| c.value >= 1000.0) {
        candidates.retain(|c| c.value >= 1000.0);
    }

    candidates
        .into_iter()
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.value.partial_cmp(&b.value).unwrap_or(std::cmp::Ordering::Equal))
        })
        .map(|c| c.value)
}

fn push_bounded(candidates: &mut Vec<Candidate>, value: f64, priority: u32) {
    if (MIN_AMOUNT..=MAX_AMOUNT).contains(&value) {
        candidates.push(Candidate { value, priority });
    }
}

/// 0..=3 boost by distance to the nearest keyword line.
fn proximity_boost(idx: usize, key_near: &[usize]) -> u32 {
    let min_dist = key_near
        .iter()
        .map(|&k| (idx as i64 - k as i64).abs())
        .min()
        .unwrap_or(i64::MAX);
    if min_dist > KEY_NEAR_WINDOW {
        0
    } else {
        (KEY_NEAR_WINDOW - min_dist).max(0) as u32
    }
}

/// Bare four-digit tokens in the calendar range are years, not money.
fn is_year_token(token: &str) -> bool {
    if digit_count(token) != 4 {
        return false;
    }
    let digits: String = token.chars().filter(|c| c.is_ascii_digit()).collect();
    digits
        .parse::<u32>()
        .map(|y| (1900..=2099).contains(&y))
        .unwrap_or(false)
}
