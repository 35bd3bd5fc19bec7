//! Amazon repricer pipeline: rule storage, price evaluation, and
//! rate-limit aware publication to the Selling Partner API.
//!
//! The flow is `PricingRule` -> `PriceRuleEvaluator` -> `PricePublisher`
//! -> one `SkuOutcome` per SKU recorded on a `PricingBatch`.
//! `PricingPipeline` drives a batch one SKU at a time with a constant
//! pause between items, and `BatchQueue` runs batches on a background
//! worker. The embedding service owns the web surface; this crate stops
//! at the job boundary.

pub mod batch;
pub mod error;
pub mod http;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod pricing;
pub mod publisher;
pub mod retry;
pub mod spapi;
pub mod store;

pub use batch::PricingPipeline;
pub use error::PricingError;
pub use jobs::{BatchQueue, JobInfo, JobState};
pub use models::{BatchStatus, PricingBatch, PricingHistory, SkuAction, SkuOutcome};
pub use pricing::{PriceCalculation, PriceRuleEvaluator, PriceStrategy, PricingRule, RuleStatus};
pub use publisher::{PricePublisher, PublishOutcome};
pub use retry::{Classify, Disposition, RetryExecutor, RetryPolicy};
pub use spapi::{MarketplaceApi, PriceUpdate, SpApiClient, SpApiError, SubmissionAck, UpdateMethod};
pub use store::{MemoryStore, PricingStore, RedisStore};
