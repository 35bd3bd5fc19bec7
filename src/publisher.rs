use crate::retry::RetryExecutor;
use crate::spapi::{MarketplaceApi, PriceUpdate};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::sync::Arc;
use tracing::{info, warn};

/// Normalized result of one publication attempt series. Failure is a
/// value here, never an `Err`: batches must outlive bad SKUs.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub success: bool,
    pub submission_id: Option<String>,
    pub feed_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Pushes price updates to the marketplace, retrying transient refusals
/// per the executor's schedule.
#[derive(Clone)]
pub struct PricePublisher {
    api: Arc<dyn MarketplaceApi>,
    retry: RetryExecutor,
}

impl PricePublisher {
    pub fn new(api: Arc<dyn MarketplaceApi>, retry: RetryExecutor) -> Self {
        Self { api, retry }
    }

    pub async fn publish(&self, update: &PriceUpdate) -> PublishOutcome {
        let api = self.api.clone();
        let attempt_update = update.clone();
        let result = self
            .retry
            .run(move || {
                let api = api.clone();
                let update = attempt_update.clone();
                async move { api.submit_price_update(&update).await }
            })
            .await;

        match result {
            Ok(ack) => {
                info!(
                    target = "repricer.publish",
                    sku = %update.sku,
                    marketplace = %update.marketplace_id,
                    price = update.price,
                    submission_id = ?ack.submission_id,
                    feed_id = ?ack.feed_id,
                    "price_update_accepted"
                );
                PublishOutcome {
                    success: true,
                    submission_id: ack.submission_id,
                    feed_id: ack.feed_id,
                    errors: Vec::new(),
                }
            }
            Err(err) => {
                warn!(
                    target = "repricer.publish",
                    sku = %update.sku,
                    marketplace = %update.marketplace_id,
                    error = %err,
                    "price_update_failed"
                );
                PublishOutcome {
                    success: false,
                    submission_id: None,
                    feed_id: None,
                    errors: err.messages(),
                }
            }
        }
    }
}
