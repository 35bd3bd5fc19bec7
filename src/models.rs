use crate::error::PricingError;
use crate::pricing::{PriceCalculation, PricingRule};
use crate::publisher::PublishOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn label(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

/// What happened to one SKU inside a batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkuAction {
    Published,
    Skipped,
    Simulated,
    Failed,
}

impl SkuAction {
    pub fn label(&self) -> &'static str {
        match self {
            SkuAction::Published => "published",
            SkuAction::Skipped => "skipped",
            SkuAction::Simulated => "simulated",
            SkuAction::Failed => "failed",
        }
    }
}

/// One per-SKU result entry. Skips and simulations count as successes;
/// only genuine failures (no rule, store trouble, rejected publish)
/// set `success == false`.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkuOutcome {
    pub sku: String,
    pub success: bool,
    pub action: SkuAction,
    #[serde(default)]
    pub simulation: bool,
    pub recommended_price: Option<f64>,
    pub price_change: Option<f64>,
    pub submission_id: Option<String>,
    pub feed_id: Option<String>,
    pub reason: Option<String>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl SkuOutcome {
    pub fn from_publish(
        sku: &str,
        calculation: &PriceCalculation,
        publish: &PublishOutcome,
    ) -> Self {
        let action = if publish.success {
            SkuAction::Published
        } else {
            SkuAction::Failed
        };
        Self {
            sku: sku.to_string(),
            success: publish.success,
            action,
            simulation: false,
            recommended_price: Some(calculation.recommended_price),
            price_change: Some(calculation.price_change),
            submission_id: publish.submission_id.clone(),
            feed_id: publish.feed_id.clone(),
            reason: None,
            error: (!publish.errors.is_empty()).then(|| publish.errors.join("; ")),
            warnings: calculation.warnings.clone(),
        }
    }

    pub fn skipped(sku: &str, calculation: Option<&PriceCalculation>, reason: &str) -> Self {
        Self {
            sku: sku.to_string(),
            success: true,
            action: SkuAction::Skipped,
            simulation: false,
            recommended_price: calculation.map(|calc| calc.recommended_price),
            price_change: calculation.map(|calc| calc.price_change),
            submission_id: None,
            feed_id: None,
            reason: Some(reason.to_string()),
            error: None,
            warnings: calculation.map(|calc| calc.warnings.clone()).unwrap_or_default(),
        }
    }

    pub fn simulated(sku: &str, calculation: &PriceCalculation) -> Self {
        Self {
            sku: sku.to_string(),
            success: true,
            action: SkuAction::Simulated,
            simulation: true,
            recommended_price: Some(calculation.recommended_price),
            price_change: Some(calculation.price_change),
            submission_id: None,
            feed_id: None,
            reason: None,
            error: None,
            warnings: calculation.warnings.clone(),
        }
    }

    pub fn failed(sku: &str, error: impl Into<String>) -> Self {
        Self {
            sku: sku.to_string(),
            success: false,
            action: SkuAction::Failed,
            simulation: false,
            recommended_price: None,
            price_change: None,
            submission_id: None,
            feed_id: None,
            reason: None,
            error: Some(error.into()),
            warnings: Vec::new(),
        }
    }
}

/// One batch run over a user's SKUs on one marketplace. Lifecycle:
/// pending until a worker picks it up, processing while the loop runs,
/// then completed or failed for good.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingBatch {
    pub id: Uuid,
    pub user_id: Uuid,
    pub marketplace_id: String,
    pub skus: Vec<String>,
    #[serde(default)]
    pub force_update: bool,
    #[serde(default)]
    pub dry_run: bool,
    pub status: BatchStatus,
    pub total_skus: u32,
    pub processed_skus: u32,
    pub successful_updates: u32,
    pub failed_updates: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<SkuOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PricingBatch {
    pub fn new(
        user_id: Uuid,
        marketplace_id: impl Into<String>,
        skus: Vec<String>,
        force_update: bool,
        dry_run: bool,
    ) -> Result<Self, PricingError> {
        if skus.is_empty() {
            return Err(PricingError::validation("batch requires at least one SKU"));
        }
        if skus.iter().any(|sku| sku.trim().is_empty()) {
            return Err(PricingError::validation("batch contains an empty SKU"));
        }
        let total = skus.len() as u32;
        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            marketplace_id: marketplace_id.into(),
            skus,
            force_update,
            dry_run,
            status: BatchStatus::Pending,
            total_skus: total,
            processed_skus: 0,
            successful_updates: 0,
            failed_updates: 0,
            results: Vec::new(),
            errors: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        })
    }

    /// Single mutation point for progress, so
    /// `successful + failed == processed <= total` holds at every
    /// observation.
    pub fn record(&mut self, outcome: SkuOutcome) {
        if outcome.success {
            self.successful_updates += 1;
        } else {
            self.failed_updates += 1;
        }
        self.processed_skus += 1;
        self.results.push(outcome);
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, BatchStatus::Completed | BatchStatus::Failed)
    }
}

/// Immutable record of one publish attempt, simulation runs excluded.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingHistory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub rule_id: Uuid,
    pub sku: String,
    pub marketplace_id: String,
    pub calculation: PriceCalculation,
    pub success: bool,
    pub submission_id: Option<String>,
    pub feed_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

impl PricingHistory {
    pub fn from_publish(
        rule: &PricingRule,
        calculation: &PriceCalculation,
        publish: &PublishOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: rule.user_id,
            rule_id: rule.id,
            sku: rule.sku.clone(),
            marketplace_id: rule.marketplace_id.clone(),
            calculation: calculation.clone(),
            success: publish.success,
            submission_id: publish.submission_id.clone(),
            feed_id: publish.feed_id.clone(),
            errors: publish.errors.clone(),
            recorded_at: Utc::now(),
        }
    }
}
