pub mod evaluator;
pub mod models;

pub use evaluator::{PriceRuleEvaluator, round_cents};
pub use models::{
    DEFAULT_UPDATE_FREQUENCY_SECS, PriceCalculation, PriceStrategy, PricingRule, RuleStatus,
};
