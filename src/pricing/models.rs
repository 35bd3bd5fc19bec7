use crate::error::PricingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

pub const DEFAULT_UPDATE_FREQUENCY_SECS: u64 = 3_600;

/// How a recommended price is derived before clamping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriceStrategy {
    /// Match the reference price.
    Competitive,
    /// Cost basis plus a target margin percentage.
    MarginTarget,
    /// Undercut the reference price by `variance_pct`.
    FixedVariance,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    #[default]
    Active,
    Paused,
}

/// Per-SKU pricing configuration owned by one user for one marketplace.
///
/// `min_price`/`max_price` bound every recommendation; `map_price` is a
/// floor that wins over the strategy output. The clamp order lives in
/// the evaluator.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRule {
    pub id: Uuid,
    pub user_id: Uuid,
    pub sku: String,
    pub marketplace_id: String,
    pub strategy: PriceStrategy,
    pub min_price: f64,
    pub max_price: f64,
    #[serde(default)]
    pub variance_pct: f64,
    pub map_price: Option<f64>,
    pub margin_target_pct: Option<f64>,
    pub cost_price: Option<f64>,
    #[serde(default)]
    pub auto_update: bool,
    #[serde(default = "default_update_frequency")]
    pub update_frequency_secs: u64,
    #[serde(default)]
    pub status: RuleStatus,
    pub last_applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn default_update_frequency() -> u64 {
    DEFAULT_UPDATE_FREQUENCY_SECS
}

impl PricingRule {
    pub fn new(
        user_id: Uuid,
        sku: impl Into<String>,
        marketplace_id: impl Into<String>,
        strategy: PriceStrategy,
        min_price: f64,
        max_price: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            sku: sku.into(),
            marketplace_id: marketplace_id.into(),
            strategy,
            min_price,
            max_price,
            variance_pct: 0.0,
            map_price: None,
            margin_target_pct: None,
            cost_price: None,
            auto_update: false,
            update_frequency_secs: DEFAULT_UPDATE_FREQUENCY_SECS,
            status: RuleStatus::Active,
            last_applied_at: None,
            created_at: Utc::now(),
        }
    }

    /// Structural checks every stored rule must pass. NaN and infinite
    /// inputs fail the range tests and are rejected with the rest.
    pub fn validate(&self) -> Result<(), PricingError> {
        if self.sku.trim().is_empty() {
            return Err(PricingError::validation("sku must not be empty"));
        }
        if !self.min_price.is_finite() || self.min_price <= 0.0 {
            return Err(PricingError::validation("min_price must be positive"));
        }
        if !self.max_price.is_finite() || self.max_price <= self.min_price {
            return Err(PricingError::validation("max_price must exceed min_price"));
        }
        if !(0.0..=100.0).contains(&self.variance_pct) {
            return Err(PricingError::validation("variance_pct must be within 0..=100"));
        }
        if let Some(target) = self.margin_target_pct {
            if !(0.0..=100.0).contains(&target) {
                return Err(PricingError::validation(
                    "margin_target_pct must be within 0..=100",
                ));
            }
        }
        if let Some(map) = self.map_price {
            if !map.is_finite() || map <= 0.0 {
                return Err(PricingError::validation("map_price must be positive"));
            }
        }
        if let Some(cost) = self.cost_price {
            if !cost.is_finite() || cost <= 0.0 {
                return Err(PricingError::validation("cost_price must be positive"));
            }
        }
        Ok(())
    }

    /// Whether an auto-updating rule is due for another pass at `now`.
    /// Paused or manual rules are never due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.auto_update || self.status != RuleStatus::Active {
            return false;
        }
        match self.last_applied_at {
            Some(applied) => {
                now.signed_duration_since(applied).num_seconds()
                    >= self.update_frequency_secs as i64
            }
            None => true,
        }
    }
}

/// Output of one evaluation pass. Ephemeral on its own; persisted only
/// as part of a history entry.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceCalculation {
    pub rule_id: Uuid,
    pub sku: String,
    pub marketplace_id: String,
    pub strategy: PriceStrategy,
    pub current_price: Option<f64>,
    pub recommended_price: f64,
    /// `recommended - current`, or zero when no reference price exists.
    pub price_change: f64,
    pub within_rules: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
