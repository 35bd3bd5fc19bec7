use crate::error::PricingError;
use crate::pricing::models::{PriceCalculation, PriceStrategy, PricingRule};
use tracing::debug;

/// Pure strategy evaluation. No clock, no I/O, no randomness: the same
/// rule and reference price always produce the same calculation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceRuleEvaluator;

impl PriceRuleEvaluator {
    /// Derives a recommended price for `rule` given an optional observed
    /// reference price, then forces it through the rule's bounds.
    ///
    /// Clamp order: raise to `min_price`, cap at `max_price`, then raise
    /// to `map_price`. MAP wins last, so a MAP floor above `max_price`
    /// yields a price outside the band and `within_rules == false`.
    pub fn evaluate(
        &self,
        rule: &PricingRule,
        current_price: Option<f64>,
    ) -> Result<PriceCalculation, PricingError> {
        rule.validate()?;

        let mut warnings = Vec::new();
        let current = match current_price {
            Some(observed) if observed.is_finite() && observed > 0.0 => Some(observed),
            Some(_) => {
                warnings.push("ignoring non-positive reference price".to_string());
                None
            }
            None => None,
        };

        let candidate = candidate_price(rule, current, &mut warnings);

        let mut price = candidate;
        if price < rule.min_price {
            price = rule.min_price;
            warnings.push(format!(
                "candidate {candidate:.2} raised to min price {:.2}",
                rule.min_price
            ));
        } else if price > rule.max_price {
            price = rule.max_price;
            warnings.push(format!(
                "candidate {candidate:.2} capped at max price {:.2}",
                rule.max_price
            ));
        }
        if let Some(map) = rule.map_price {
            if price < map {
                price = map;
                warnings.push(format!("price raised to {map:.2} to respect MAP"));
            }
        }
        let price = round_cents(price);

        let within_rules = price >= rule.min_price
            && price <= rule.max_price
            && rule.map_price.is_none_or(|map| price >= map);
        if !within_rules {
            warnings.push(format!(
                "no price satisfies the configured bounds; {price:.2} left outside"
            ));
        }

        let price_change = match current {
            Some(observed) => round_cents(price - observed),
            None => 0.0,
        };

        debug!(
            target = "repricer.pricing",
            sku = %rule.sku,
            strategy = ?rule.strategy,
            recommended = price,
            change = price_change,
            within_rules = within_rules,
            "rule_evaluated"
        );

        Ok(PriceCalculation {
            rule_id: rule.id,
            sku: rule.sku.clone(),
            marketplace_id: rule.marketplace_id.clone(),
            strategy: rule.strategy,
            current_price: current,
            recommended_price: price,
            price_change,
            within_rules,
            warnings,
        })
    }
}

fn candidate_price(rule: &PricingRule, current: Option<f64>, warnings: &mut Vec<String>) -> f64 {
    match rule.strategy {
        PriceStrategy::MarginTarget => {
            if let (Some(cost), Some(target)) = (rule.cost_price, rule.margin_target_pct) {
                return cost * (1.0 + target / 100.0);
            }
            warnings.push("margin data incomplete; falling back to reference price".to_string());
            reference_or_midpoint(rule, current, warnings)
        }
        PriceStrategy::FixedVariance => match current {
            Some(observed) => observed * (1.0 - rule.variance_pct / 100.0),
            None => band_midpoint(rule, warnings),
        },
        PriceStrategy::Competitive => reference_or_midpoint(rule, current, warnings),
    }
}

fn reference_or_midpoint(
    rule: &PricingRule,
    current: Option<f64>,
    warnings: &mut Vec<String>,
) -> f64 {
    match current {
        Some(observed) => observed,
        None => band_midpoint(rule, warnings),
    }
}

fn band_midpoint(rule: &PricingRule, warnings: &mut Vec<String>) -> f64 {
    warnings.push("no reference price available; using band midpoint".to_string());
    (rule.min_price + rule.max_price) / 2.0
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
