//! Ordered amount-normalization rules.
//!
//! The order is load-bearing: the safety sweep runs before the hint and
//! provider escalations so a recovered grouped amount is never multiplied
//! a second time. Each rule is a pure function over (text, provider,
//! current amount); the pipeline applies them in sequence and bumps the
//! score whenever one fires.

use cobro_recognition::numeric::{has_triple_zero_hint, normalize_numeric_token};
use cobro_recognition::text::{digit_count, grouped_tokens, is_bad_context_line, is_key_near_line};

pub const MERCADO_PAGO: &str = "Mercado Pago";

/// Floor applied to the score when any rule fires.
pub const RULE_SCORE_FLOOR: u32 = 10;

/// Safety-sweep bounds: a grouped amount recovered here must be a
/// plausible transfer.
const SWEEP_MIN: f64 = 1000.0;
const SWEEP_MAX: f64 = 10_000_000.0;

/// Tokens with this many digit characters are ids, not money (a CVU/CBU
/// carries 22).
const MAX_AMOUNT_DIGITS: usize = 15;

/// Inputs shared by every rule.
pub struct RuleContext<'a> {
    pub text: &'a str,
    pub provider: Option<&'a str>,
    pub mp_force_x1000: bool,
}

/// A rule returns `Some(new_amount)` when it fires, `None` otherwise.
pub type AmountRule = fn(&RuleContext<'_>, Option<f64>) -> Option<f64>;

/// The textual rules, in application order. The visual fallback and the
/// Mercado Pago repeat live in the pipeline because they need media
/// access and rule-history respectively.
pub fn textual_rules() -> [(&'static str, AmountRule); 3] {
    [
        ("largest_grouped_amount", largest_grouped_amount),
        ("triple_zero_hint", triple_zero_hint),
        ("mp_x1000", mp_x1000),
    ]
}

/// Recover the largest grouped amount from money-adjacent lines when the
/// scorer came back empty-handed or with a sub-1000 value.
pub fn largest_grouped_amount(ctx: &RuleContext<'_>, amount: Option<f64>) -> Option<f64> {
    if amount.map(|a| a >= 1000.0).unwrap_or(false) {
        return None;
    }
    let mut best: Option<f64> = None;
    for line in ctx.text.lines() {
        if is_bad_context_line(line) {
            continue;
        }
        if !line.contains('$') && !is_key_near_line(line) {
            continue;
        }
        for token in grouped_tokens(line) {
            if digit_count(token) >= MAX_AMOUNT_DIGITS {
                continue;
            }
            let Some(value) = normalize_numeric_token(token) else {
                continue;
            };
            if (SWEEP_MIN..=SWEEP_MAX).contains(&value) {
                best = Some(best.map_or(value, |b: f64| b.max(value)));
            }
        }
    }
    best
}

/// A sub-1000 amount next to a corrupted `.000` group lost its thousands.
pub fn triple_zero_hint(ctx: &RuleContext<'_>, amount: Option<f64>) -> Option<f64> {
    let a = amount?;
    if a > 0.0 && a < 1000.0 && has_triple_zero_hint(ctx.text) {
        Some(a * 1000.0)
    } else {
        None
    }
}

/// Mercado Pago headline amounts under 1000 are OCR-truncated thousands.
/// Capped: when the product would leave the plausible range the original
/// value is kept.
pub fn mp_x1000(ctx: &RuleContext<'_>, amount: Option<f64>) -> Option<f64> {
    if !ctx.mp_force_x1000 || ctx.provider != Some(MERCADO_PAGO) {
        return None;
    }
    let a = amount?;
    if a > 0.0 && a < 1000.0 {
        let scaled = a * 1000.0;
        if scaled <= SWEEP_MAX {
            return Some(scaled);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(text: &'a str, provider: Option<&'a str>) -> RuleContext<'a> {
        RuleContext {
            text,
            provider,
            mp_force_x1000: true,
        }
    }

    #[test]
    fn sweep_recovers_grouped_amount_from_keyword_line() {
        let c = ctx("Monto 12.500\nCVU 0000003100012345678901", None);
        assert_eq!(largest_grouped_amount(&c, None), Some(12_500.0));
        // Present four-digit amount: the sweep stays quiet.
        assert_eq!(largest_grouped_amount(&c, Some(9_000.0)), None);
    }

    #[test]
    fn sweep_ignores_id_lines_and_long_digit_runs() {
        // The CVU line is bad context; the bare 22-digit run elsewhere
        // exceeds the digit budget.
        let c = ctx("total 0000003100012345678901", None);
        assert_eq!(largest_grouped_amount(&c, None), None);
    }

    #[test]
    fn sweep_respects_bounds() {
        let c = ctx("monto 99.000.000", None);
        assert_eq!(largest_grouped_amount(&c, None), None);
        let c = ctx("monto 950", None);
        assert_eq!(largest_grouped_amount(&c, None), None);
    }

    #[test]
    fn hint_multiplies_small_amounts_only() {
        let c = ctx("Transferencia $150 .000", None);
        assert_eq!(triple_zero_hint(&c, Some(150.0)), Some(150_000.0));
        assert_eq!(triple_zero_hint(&c, Some(1_500.0)), None);
        assert_eq!(triple_zero_hint(&c, None), None);

        let no_hint = ctx("Transferencia $150", None);
        assert_eq!(triple_zero_hint(&no_hint, Some(150.0)), None);
    }

    #[test]
    fn mp_rule_requires_provider_and_flag() {
        let c = ctx("Mercado Pago", Some(MERCADO_PAGO));
        assert_eq!(mp_x1000(&c, Some(999.99)), Some(999_990.0));
        assert_eq!(mp_x1000(&c, Some(1_000.0)), None);

        let other = ctx("Galicia", Some("Galicia"));
        assert_eq!(mp_x1000(&other, Some(500.0)), None);

        let off = RuleContext {
            text: "Mercado Pago",
            provider: Some(MERCADO_PAGO),
            mp_force_x1000: false,
        };
        assert_eq!(mp_x1000(&off, Some(500.0)), None);
    }

    #[test]
    fn mp_rule_caps_at_upper_bound() {
        // 999.99 × 1000 stays inside; a value whose product would cross
        // the ceiling keeps its original.
        let c = ctx("Mercado Pago", Some(MERCADO_PAGO));
        let scaled = mp_x1000(&c, Some(999.99)).unwrap();
        assert!(scaled <= 10_000_000.0);

        // Synthetic: pretend a 999.99-style value already scaled once;
        // re-application must not fire above 1000.
        assert_eq!(mp_x1000(&c, Some(999_990.0)), None);
    }

    #[test]
    fn rule_order_is_stable() {
        let names: Vec<&str> = textual_rules().iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec!["largest_grouped_amount", "triple_zero_hint", "mp_x1000"]
        );
    }
}
