use crate::error::PricingError;
use crate::metrics;
use crate::models::{BatchStatus, PricingBatch, PricingHistory, SkuOutcome};
use crate::pricing::{PriceCalculation, PriceRuleEvaluator, RuleStatus};
use crate::publisher::PricePublisher;
use crate::spapi::{PriceUpdate, UpdateMethod};
use crate::store::PricingStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

const DEFAULT_ITEM_PAUSE_MS: u64 = 1_000;

/// Sequential batch driver: one SKU at a time, a constant pause between
/// items, progress persisted after every one.
///
/// Failure handling is two-tier. Anything that goes wrong for a single
/// SKU (no rule, store hiccup during lookup, rejected publish) becomes
/// a failure entry in the results and the loop moves on. Only the
/// orchestration itself failing, which here means losing the ability to
/// persist progress, marks the whole batch failed.
#[derive(Clone)]
pub struct PricingPipeline {
    store: Arc<dyn PricingStore>,
    evaluator: PriceRuleEvaluator,
    publisher: PricePublisher,
    method: UpdateMethod,
    pause: Duration,
}

impl PricingPipeline {
    pub fn new(store: Arc<dyn PricingStore>, publisher: PricePublisher) -> Self {
        Self {
            store,
            evaluator: PriceRuleEvaluator,
            publisher,
            method: UpdateMethod::default(),
            pause: item_pause_from_env(),
        }
    }

    pub fn with_update_method(mut self, method: UpdateMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_item_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Drives one batch start to finish and returns its final state.
    /// Re-running a terminal batch is a no-op read; a batch reloaded
    /// mid-run resumes after its recorded outcomes instead of repeating
    /// them. `Err` is reserved for batches that cannot be loaded or
    /// persisted at all.
    pub async fn run_batch(
        &self,
        batch_id: Uuid,
        user_id: Uuid,
    ) -> Result<PricingBatch, PricingError> {
        let mut batch = self
            .store
            .load_batch(batch_id)
            .await?
            .filter(|found| found.user_id == user_id)
            .ok_or_else(|| PricingError::not_found(format!("batch {batch_id}")))?;
        if batch.is_terminal() {
            return Ok(batch);
        }

        batch.status = BatchStatus::Processing;
        batch.started_at.get_or_insert_with(Utc::now);
        self.store.save_batch(&batch).await?;
        info!(
            target = "repricer.batch",
            batch_id = %batch.id,
            skus = batch.total_skus,
            dry_run = batch.dry_run,
            force_update = batch.force_update,
            "batch_started"
        );

        match self.process_batch(&mut batch).await {
            Ok(()) => {
                batch.status = BatchStatus::Completed;
            }
            Err(err) => {
                error!(
                    target = "repricer.batch",
                    batch_id = %batch.id,
                    error = %err,
                    "batch_aborted"
                );
                batch.status = BatchStatus::Failed;
                batch.errors.push(err.to_string());
            }
        }
        batch.completed_at = Some(Utc::now());
        self.store.save_batch(&batch).await?;

        metrics::batch_finished(batch.status.label(), batch.processed_skus);
        info!(
            target = "repricer.batch",
            batch_id = %batch.id,
            status = batch.status.label(),
            processed = batch.processed_skus,
            successful = batch.successful_updates,
            failed = batch.failed_updates,
            "batch_finished"
        );
        Ok(batch)
    }

    /// What the batch loop would decide for one SKU right now, minus
    /// the publish. `NotFound` when the user has no rule for it.
    pub async fn evaluate_sku(
        &self,
        user_id: Uuid,
        sku: &str,
        marketplace_id: &str,
    ) -> Result<PriceCalculation, PricingError> {
        let rule = self
            .store
            .find_rule(user_id, sku, marketplace_id)
            .await?
            .ok_or_else(|| PricingError::not_found(format!("no pricing rule for sku {sku}")))?;
        let current = self
            .store
            .latest_published_price(user_id, sku, marketplace_id)
            .await?;
        self.evaluator.evaluate(&rule, current)
    }

    async fn process_batch(&self, batch: &mut PricingBatch) -> Result<(), PricingError> {
        let skus = batch.skus.clone();
        let total = skus.len();
        // A batch reloaded mid-run already holds one outcome per
        // finished SKU; the loop starts after them so nothing is
        // recorded or published twice.
        let done = batch.results.len();
        for (index, sku) in skus.iter().enumerate().skip(done) {
            let mut outcome = self.process_sku(batch, sku).await;
            if batch.dry_run {
                outcome.simulation = true;
            }
            metrics::sku_processed(outcome.action.label());
            batch.record(outcome);
            self.store.save_batch(batch).await?;
            if index + 1 < total {
                sleep(self.pause).await;
            }
        }
        Ok(())
    }

    async fn process_sku(&self, batch: &PricingBatch, sku: &str) -> SkuOutcome {
        let rule = match self
            .store
            .find_rule(batch.user_id, sku, &batch.marketplace_id)
            .await
        {
            Ok(Some(rule)) => rule,
            Ok(None) => return SkuOutcome::failed(sku, "no pricing rule found"),
            Err(err) => {
                warn!(
                    target = "repricer.batch",
                    sku = sku,
                    error = %err,
                    "rule_lookup_failed"
                );
                return SkuOutcome::failed(sku, err.to_string());
            }
        };
        if rule.status == RuleStatus::Paused {
            return SkuOutcome::skipped(sku, None, "pricing rule is paused");
        }

        let current = match self
            .store
            .latest_published_price(batch.user_id, sku, &batch.marketplace_id)
            .await
        {
            Ok(price) => price,
            Err(err) => {
                warn!(
                    target = "repricer.batch",
                    sku = sku,
                    error = %err,
                    "reference_price_lookup_failed"
                );
                return SkuOutcome::failed(sku, err.to_string());
            }
        };

        let calculation = match self.evaluator.evaluate(&rule, current) {
            Ok(calculation) => calculation,
            Err(err) => return SkuOutcome::failed(sku, err.to_string()),
        };

        if batch.dry_run {
            return SkuOutcome::simulated(sku, &calculation);
        }
        if !calculation.within_rules {
            return SkuOutcome::skipped(
                sku,
                Some(&calculation),
                "recommended price outside configured bounds",
            );
        }
        if !batch.force_update && calculation.price_change == 0.0 {
            return SkuOutcome::skipped(sku, Some(&calculation), "no price change needed");
        }

        let update = PriceUpdate::new(
            sku,
            &batch.marketplace_id,
            calculation.recommended_price,
            self.method,
        );
        let publish = self.publisher.publish(&update).await;

        // Bookkeeping after the marketplace call is best effort: the
        // publish already happened, so a failed write must not flip the
        // outcome to a failure that never reached Amazon.
        let entry = PricingHistory::from_publish(&rule, &calculation, &publish);
        if let Err(err) = self.store.append_history(entry).await {
            warn!(
                target = "repricer.batch",
                sku = sku,
                error = %err,
                "history_append_failed"
            );
        }
        if publish.success {
            let mut touched = rule;
            touched.last_applied_at = Some(Utc::now());
            if let Err(err) = self.store.upsert_rule(touched).await {
                warn!(
                    target = "repricer.batch",
                    sku = sku,
                    error = %err,
                    "rule_touch_failed"
                );
            }
        }

        SkuOutcome::from_publish(sku, &calculation, &publish)
    }
}

fn item_pause_from_env() -> Duration {
    std::env::var("REPRICER_ITEM_PAUSE_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(DEFAULT_ITEM_PAUSE_MS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SkuAction;
    use crate::pricing::{PriceStrategy, PricingRule};
    use crate::publisher::PublishOutcome;
    use crate::retry::RetryExecutor;
    use crate::spapi::{MarketplaceApi, SpApiError, SubmissionAck};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    const MARKETPLACE: &str = "A13V1IB3VIYZZH";

    fn init_tracing() {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }

    #[derive(Default)]
    struct ScriptedApi {
        rejections: HashMap<String, SpApiError>,
        calls: StdMutex<Vec<String>>,
    }

    impl ScriptedApi {
        fn rejecting(sku: &str, error: SpApiError) -> Self {
            let mut api = Self::default();
            api.rejections.insert(sku.to_string(), error);
            api
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MarketplaceApi for ScriptedApi {
        async fn submit_price_update(
            &self,
            update: &PriceUpdate,
        ) -> Result<SubmissionAck, SpApiError> {
            self.calls.lock().unwrap().push(update.sku.clone());
            if let Some(err) = self.rejections.get(&update.sku) {
                return Err(err.clone());
            }
            Ok(SubmissionAck {
                submission_id: Some(format!("sub-{}", update.sku)),
                feed_id: None,
            })
        }
    }

    fn pipeline_with(store: Arc<MemoryStore>, api: Arc<ScriptedApi>) -> PricingPipeline {
        let publisher = PricePublisher::new(api, RetryExecutor::default());
        PricingPipeline::new(store, publisher).with_item_pause(Duration::from_millis(0))
    }

    fn margin_rule(user_id: Uuid, sku: &str) -> PricingRule {
        let mut rule = PricingRule::new(
            user_id,
            sku,
            MARKETPLACE,
            PriceStrategy::MarginTarget,
            10.0,
            20.0,
        );
        rule.cost_price = Some(8.0);
        rule.margin_target_pct = Some(50.0);
        rule
    }

    fn competitive_rule(user_id: Uuid, sku: &str) -> PricingRule {
        PricingRule::new(
            user_id,
            sku,
            MARKETPLACE,
            PriceStrategy::Competitive,
            10.0,
            20.0,
        )
    }

    async fn seed_price(store: &MemoryStore, rule: &PricingRule, price: f64) {
        let calculation = PriceCalculation {
            rule_id: rule.id,
            sku: rule.sku.clone(),
            marketplace_id: rule.marketplace_id.clone(),
            strategy: rule.strategy,
            current_price: None,
            recommended_price: price,
            price_change: 0.0,
            within_rules: true,
            warnings: Vec::new(),
        };
        let publish = PublishOutcome {
            success: true,
            submission_id: Some("seed".to_string()),
            feed_id: None,
            errors: Vec::new(),
        };
        store
            .append_history(PricingHistory::from_publish(rule, &calculation, &publish))
            .await
            .unwrap();
    }

    async fn create_batch(
        store: &MemoryStore,
        user_id: Uuid,
        skus: &[&str],
        force_update: bool,
        dry_run: bool,
    ) -> PricingBatch {
        let batch = PricingBatch::new(
            user_id,
            MARKETPLACE,
            skus.iter().map(|sku| sku.to_string()).collect(),
            force_update,
            dry_run,
        )
        .unwrap();
        store.create_batch(&batch).await.unwrap();
        batch
    }

    #[tokio::test(start_paused = true)]
    async fn mixed_batch_records_every_sku_in_order() {
        init_tracing();
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();

        // SKU-A has no rule at all.
        let rule_b = competitive_rule(user, "SKU-B");
        store.upsert_rule(rule_b.clone()).await.unwrap();
        seed_price(&store, &rule_b, 15.0).await;

        let mut rule_c = competitive_rule(user, "SKU-C");
        rule_c.strategy = PriceStrategy::FixedVariance;
        rule_c.variance_pct = 5.0;
        store.upsert_rule(rule_c.clone()).await.unwrap();
        seed_price(&store, &rule_c, 16.0).await;

        let rule_d = margin_rule(user, "SKU-D");
        store.upsert_rule(rule_d.clone()).await.unwrap();
        seed_price(&store, &rule_d, 10.0).await;

        let api = Arc::new(ScriptedApi::rejecting(
            "SKU-D",
            SpApiError::Status {
                status: 400,
                errors: vec!["InvalidInput: price rejected".to_string()],
            },
        ));
        let pipeline = pipeline_with(store.clone(), api.clone());

        let batch = create_batch(&store, user, &["SKU-A", "SKU-B", "SKU-C", "SKU-D"], false, false)
            .await;
        let finished = pipeline.run_batch(batch.id, user).await.unwrap();

        assert_eq!(finished.status, BatchStatus::Completed);
        assert_eq!(finished.total_skus, 4);
        assert_eq!(finished.processed_skus, 4);
        assert_eq!(finished.successful_updates, 2);
        assert_eq!(finished.failed_updates, 2);
        assert!(finished.started_at.is_some());
        assert!(finished.completed_at.is_some());

        let skus: Vec<&str> = finished
            .results
            .iter()
            .map(|entry| entry.sku.as_str())
            .collect();
        assert_eq!(skus, vec!["SKU-A", "SKU-B", "SKU-C", "SKU-D"]);

        assert_eq!(finished.results[0].action, SkuAction::Failed);
        assert!(
            finished.results[0]
                .error
                .as_deref()
                .unwrap()
                .contains("no pricing rule")
        );

        assert_eq!(finished.results[1].action, SkuAction::Skipped);
        assert_eq!(
            finished.results[1].reason.as_deref(),
            Some("no price change needed")
        );

        assert_eq!(finished.results[2].action, SkuAction::Published);
        assert_eq!(finished.results[2].recommended_price, Some(15.2));
        assert_eq!(finished.results[2].price_change, Some(-0.8));
        assert_eq!(finished.results[2].submission_id.as_deref(), Some("sub-SKU-C"));

        assert_eq!(finished.results[3].action, SkuAction::Failed);
        assert!(
            finished.results[3]
                .error
                .as_deref()
                .unwrap()
                .contains("InvalidInput")
        );

        // Only the two publishable SKUs ever reached the marketplace.
        assert_eq!(api.calls(), vec!["SKU-C".to_string(), "SKU-D".to_string()]);

        // Both attempts were recorded, the rejection included.
        let history_c = store
            .history_for_sku(user, "SKU-C", MARKETPLACE, None, None)
            .await
            .unwrap();
        assert_eq!(history_c.len(), 2, "seed plus one publish");
        assert!(history_c.last().unwrap().success);
        let history_d = store
            .history_for_sku(user, "SKU-D", MARKETPLACE, None, None)
            .await
            .unwrap();
        assert!(!history_d.last().unwrap().success);

        // The persisted copy matches what the caller got back.
        let persisted = store.load_batch(batch.id).await.unwrap().unwrap();
        assert_eq!(persisted.status, BatchStatus::Completed);
        assert_eq!(persisted.processed_skus, 4);
        assert_eq!(persisted.results.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn one_rejected_sku_does_not_stop_the_batch() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        for sku in ["SKU-1", "SKU-2", "SKU-3"] {
            let rule = margin_rule(user, sku);
            store.upsert_rule(rule.clone()).await.unwrap();
            seed_price(&store, &rule, 10.0).await;
        }
        let api = Arc::new(ScriptedApi::rejecting(
            "SKU-2",
            SpApiError::Status {
                status: 500,
                errors: vec!["InternalFailure".to_string()],
            },
        ));
        let pipeline = pipeline_with(store.clone(), api.clone());

        let batch = create_batch(&store, user, &["SKU-1", "SKU-2", "SKU-3"], false, false).await;
        let finished = pipeline.run_batch(batch.id, user).await.unwrap();

        assert_eq!(finished.status, BatchStatus::Completed);
        assert_eq!(finished.processed_skus, 3);
        assert_eq!(finished.successful_updates, 2);
        assert_eq!(finished.failed_updates, 1);
        assert_eq!(
            api.calls(),
            vec![
                "SKU-1".to_string(),
                "SKU-2".to_string(),
                "SKU-3".to_string()
            ],
            "the loop must reach the SKUs after the rejection"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_never_touches_the_marketplace() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        for sku in ["SKU-1", "SKU-2"] {
            let rule = margin_rule(user, sku);
            store.upsert_rule(rule.clone()).await.unwrap();
            seed_price(&store, &rule, 10.0).await;
        }
        // SKU-X has no rule; even its failure entry is part of the simulation.
        let api = Arc::new(ScriptedApi::default());
        let pipeline = pipeline_with(store.clone(), api.clone());

        let batch = create_batch(&store, user, &["SKU-1", "SKU-2", "SKU-X"], false, true).await;
        let finished = pipeline.run_batch(batch.id, user).await.unwrap();

        assert_eq!(finished.status, BatchStatus::Completed);
        assert!(finished.results.iter().all(|entry| entry.simulation));
        assert_eq!(finished.results[0].action, SkuAction::Simulated);
        assert_eq!(finished.results[0].recommended_price, Some(12.0));
        assert_eq!(finished.results[0].price_change, Some(2.0));
        assert_eq!(finished.results[2].action, SkuAction::Failed);
        assert!(api.calls().is_empty(), "dry runs must not publish");

        // Simulations leave no publish history behind.
        let history = store
            .history_for_sku(user, "SKU-1", MARKETPLACE, None, None)
            .await
            .unwrap();
        assert_eq!(history.len(), 1, "only the seeded entry");
    }

    #[tokio::test(start_paused = true)]
    async fn pause_runs_between_items_but_not_after_the_last() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        for sku in ["SKU-1", "SKU-2", "SKU-3"] {
            let rule = competitive_rule(user, sku);
            store.upsert_rule(rule.clone()).await.unwrap();
            seed_price(&store, &rule, 15.0).await;
        }
        let api = Arc::new(ScriptedApi::default());
        let publisher = PricePublisher::new(api, RetryExecutor::default());
        let pipeline = PricingPipeline::new(store.clone(), publisher)
            .with_item_pause(Duration::from_secs(1));

        let batch = create_batch(&store, user, &["SKU-1", "SKU-2", "SKU-3"], false, false).await;
        let started = tokio::time::Instant::now();
        let finished = pipeline.run_batch(batch.id, user).await.unwrap();

        // Every SKU skips, so elapsed time is purely the two gaps.
        assert_eq!(finished.successful_updates, 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn force_update_publishes_unchanged_prices() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        let rule = competitive_rule(user, "SKU-1");
        store.upsert_rule(rule.clone()).await.unwrap();
        seed_price(&store, &rule, 15.0).await;
        let api = Arc::new(ScriptedApi::default());
        let pipeline = pipeline_with(store.clone(), api.clone());

        let batch = create_batch(&store, user, &["SKU-1"], true, false).await;
        let finished = pipeline.run_batch(batch.id, user).await.unwrap();

        assert_eq!(finished.results[0].action, SkuAction::Published);
        assert_eq!(finished.results[0].price_change, Some(0.0));
        assert_eq!(api.calls(), vec!["SKU-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn first_time_skus_skip_without_force() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        store
            .upsert_rule(competitive_rule(user, "SKU-1"))
            .await
            .unwrap();
        let api = Arc::new(ScriptedApi::default());
        let pipeline = pipeline_with(store.clone(), api.clone());

        let batch = create_batch(&store, user, &["SKU-1"], false, false).await;
        let finished = pipeline.run_batch(batch.id, user).await.unwrap();

        // No reference price yet, so the change is zero and nothing is sent.
        assert_eq!(finished.results[0].action, SkuAction::Skipped);
        assert!(api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn paused_rules_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        let mut rule = margin_rule(user, "SKU-1");
        rule.status = RuleStatus::Paused;
        store.upsert_rule(rule).await.unwrap();
        let api = Arc::new(ScriptedApi::default());
        let pipeline = pipeline_with(store.clone(), api.clone());

        let batch = create_batch(&store, user, &["SKU-1"], true, false).await;
        let finished = pipeline.run_batch(batch.id, user).await.unwrap();

        assert_eq!(finished.results[0].action, SkuAction::Skipped);
        assert_eq!(
            finished.results[0].reason.as_deref(),
            Some("pricing rule is paused")
        );
        assert!(api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_publish_touches_the_rule_timestamp() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        let rule = margin_rule(user, "SKU-1");
        store.upsert_rule(rule.clone()).await.unwrap();
        seed_price(&store, &rule, 10.0).await;
        let api = Arc::new(ScriptedApi::default());
        let pipeline = pipeline_with(store.clone(), api);

        let batch = create_batch(&store, user, &["SKU-1"], false, false).await;
        pipeline.run_batch(batch.id, user).await.unwrap();

        let touched = store
            .find_rule(user, "SKU-1", MARKETPLACE)
            .await
            .unwrap()
            .unwrap();
        assert!(touched.last_applied_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_batches_are_not_found() {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(ScriptedApi::default());
        let pipeline = pipeline_with(store, api);

        let err = pipeline
            .run_batch(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, PricingError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_batches_are_not_found() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let api = Arc::new(ScriptedApi::default());
        let pipeline = pipeline_with(store.clone(), api);

        let batch = create_batch(&store, owner, &["SKU-1"], false, false).await;
        let err = pipeline
            .run_batch(batch.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, PricingError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_batches_are_returned_untouched() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        let rule = margin_rule(user, "SKU-1");
        store.upsert_rule(rule.clone()).await.unwrap();
        seed_price(&store, &rule, 10.0).await;
        let api = Arc::new(ScriptedApi::default());
        let pipeline = pipeline_with(store.clone(), api.clone());

        let batch = create_batch(&store, user, &["SKU-1"], false, false).await;
        let first = pipeline.run_batch(batch.id, user).await.unwrap();
        let second = pipeline.run_batch(batch.id, user).await.unwrap();

        assert_eq!(second.status, BatchStatus::Completed);
        assert_eq!(second.completed_at, first.completed_at);
        assert_eq!(second.processed_skus, first.processed_skus);
        assert_eq!(api.calls().len(), 1, "the rerun must not publish again");
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_batches_resume_after_the_last_recorded_sku() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        let rule_1 = margin_rule(user, "SKU-1");
        store.upsert_rule(rule_1.clone()).await.unwrap();
        store.upsert_rule(margin_rule(user, "SKU-2")).await.unwrap();
        let api = Arc::new(ScriptedApi::default());
        let pipeline = pipeline_with(store.clone(), api.clone());

        // A restart finds the batch persisted mid-run: SKU-1 already
        // published and recorded, SKU-2 still waiting.
        let mut batch = create_batch(&store, user, &["SKU-1", "SKU-2"], true, false).await;
        batch.status = BatchStatus::Processing;
        batch.started_at = Some(Utc::now() - chrono::Duration::minutes(5));
        let calculation = PriceCalculation {
            rule_id: rule_1.id,
            sku: "SKU-1".to_string(),
            marketplace_id: MARKETPLACE.to_string(),
            strategy: rule_1.strategy,
            current_price: None,
            recommended_price: 12.0,
            price_change: 0.0,
            within_rules: true,
            warnings: Vec::new(),
        };
        let publish = PublishOutcome {
            success: true,
            submission_id: Some("sub-before-restart".to_string()),
            feed_id: None,
            errors: Vec::new(),
        };
        batch.record(SkuOutcome::from_publish("SKU-1", &calculation, &publish));
        store.save_batch(&batch).await.unwrap();

        let finished = pipeline.run_batch(batch.id, user).await.unwrap();

        assert_eq!(finished.status, BatchStatus::Completed);
        assert_eq!(finished.total_skus, 2);
        assert_eq!(finished.processed_skus, 2);
        assert_eq!(finished.successful_updates, 2);
        assert_eq!(finished.failed_updates, 0);
        assert_eq!(finished.results.len(), 2);
        assert_eq!(
            finished.results[0].submission_id.as_deref(),
            Some("sub-before-restart"),
            "the recorded outcome must survive the restart"
        );
        assert_eq!(finished.results[1].sku, "SKU-2");
        assert_eq!(finished.results[1].action, SkuAction::Published);
        assert_eq!(
            api.calls(),
            vec!["SKU-2".to_string()],
            "SKU-1 must not publish twice"
        );
        assert_eq!(finished.started_at, batch.started_at);
    }

    #[tokio::test(start_paused = true)]
    async fn fully_recorded_batches_only_finalize_on_rerun() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        store.upsert_rule(competitive_rule(user, "SKU-1")).await.unwrap();
        let api = Arc::new(ScriptedApi::default());
        let pipeline = pipeline_with(store.clone(), api.clone());

        // Interrupted after the last SKU was saved but before the batch
        // itself went terminal.
        let mut batch = create_batch(&store, user, &["SKU-1"], false, false).await;
        batch.status = BatchStatus::Processing;
        batch.started_at = Some(Utc::now());
        batch.record(SkuOutcome::skipped("SKU-1", None, "no price change needed"));
        store.save_batch(&batch).await.unwrap();

        let finished = pipeline.run_batch(batch.id, user).await.unwrap();

        assert_eq!(finished.status, BatchStatus::Completed);
        assert_eq!(finished.processed_skus, 1);
        assert_eq!(finished.results.len(), 1);
        assert!(finished.completed_at.is_some());
        assert!(api.calls().is_empty(), "nothing left to publish");

        let persisted = store.load_batch(batch.id).await.unwrap().unwrap();
        assert_eq!(persisted.status, BatchStatus::Completed);
        assert_eq!(persisted.processed_skus, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn evaluate_sku_reports_without_publishing() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        let rule = margin_rule(user, "SKU-1");
        store.upsert_rule(rule.clone()).await.unwrap();
        seed_price(&store, &rule, 10.0).await;
        let api = Arc::new(ScriptedApi::default());
        let pipeline = pipeline_with(store.clone(), api.clone());

        let calc = pipeline
            .evaluate_sku(user, "SKU-1", MARKETPLACE)
            .await
            .unwrap();
        assert_eq!(calc.recommended_price, 12.0);
        assert_eq!(calc.current_price, Some(10.0));
        assert!(api.calls().is_empty());

        let err = pipeline
            .evaluate_sku(user, "SKU-404", MARKETPLACE)
            .await
            .unwrap_err();
        assert!(matches!(err, PricingError::NotFound(_)));
    }

    /// Store wrapper that fails `save_batch` on one scripted call.
    struct FlakyStore {
        inner: MemoryStore,
        save_calls: AtomicU32,
        fail_on_call: u32,
    }

    impl FlakyStore {
        fn failing_on(fail_on_call: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                save_calls: AtomicU32::new(0),
                fail_on_call,
            }
        }
    }

    #[async_trait]
    impl PricingStore for FlakyStore {
        async fn upsert_rule(&self, rule: PricingRule) -> Result<(), PricingError> {
            self.inner.upsert_rule(rule).await
        }

        async fn find_rule(
            &self,
            user_id: Uuid,
            sku: &str,
            marketplace_id: &str,
        ) -> Result<Option<PricingRule>, PricingError> {
            self.inner.find_rule(user_id, sku, marketplace_id).await
        }

        async fn create_batch(&self, batch: &PricingBatch) -> Result<(), PricingError> {
            self.inner.create_batch(batch).await
        }

        async fn load_batch(&self, batch_id: Uuid) -> Result<Option<PricingBatch>, PricingError> {
            self.inner.load_batch(batch_id).await
        }

        async fn save_batch(&self, batch: &PricingBatch) -> Result<(), PricingError> {
            let call = self.save_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_on_call {
                return Err(PricingError::store("connection refused"));
            }
            self.inner.save_batch(batch).await
        }

        async fn append_history(&self, entry: PricingHistory) -> Result<(), PricingError> {
            self.inner.append_history(entry).await
        }

        async fn history_for_sku(
            &self,
            user_id: Uuid,
            sku: &str,
            marketplace_id: &str,
            since: Option<DateTime<Utc>>,
            until: Option<DateTime<Utc>>,
        ) -> Result<Vec<PricingHistory>, PricingError> {
            self.inner
                .history_for_sku(user_id, sku, marketplace_id, since, until)
                .await
        }

        async fn latest_published_price(
            &self,
            user_id: Uuid,
            sku: &str,
            marketplace_id: &str,
        ) -> Result<Option<f64>, PricingError> {
            self.inner
                .latest_published_price(user_id, sku, marketplace_id)
                .await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn losing_progress_persistence_fails_the_whole_batch() {
        // Call 1 is the pending->processing save, call 2 the save after
        // the first SKU. Failing call 2 aborts the loop; the terminal
        // save (call 3) still goes through.
        let store = Arc::new(FlakyStore::failing_on(2));
        let user = Uuid::new_v4();
        for sku in ["SKU-1", "SKU-2"] {
            let rule = margin_rule(user, sku);
            store.upsert_rule(rule.clone()).await.unwrap();
        }
        let api = Arc::new(ScriptedApi::default());
        let publisher = PricePublisher::new(api.clone(), RetryExecutor::default());
        let pipeline = PricingPipeline::new(store.clone(), publisher)
            .with_item_pause(Duration::from_millis(0));

        let batch = PricingBatch::new(
            user,
            MARKETPLACE,
            vec!["SKU-1".to_string(), "SKU-2".to_string()],
            true,
            false,
        )
        .unwrap();
        store.create_batch(&batch).await.unwrap();

        let finished = pipeline.run_batch(batch.id, user).await.unwrap();

        assert_eq!(finished.status, BatchStatus::Failed);
        assert_eq!(finished.processed_skus, 1, "only the first SKU was recorded");
        assert!(finished.errors[0].contains("connection refused"));
        assert!(finished.completed_at.is_some());

        let persisted = store.load_batch(batch.id).await.unwrap().unwrap();
        assert_eq!(persisted.status, BatchStatus::Failed);
    }
}
