use crate::error::PricingError;
use crate::models::{PricingBatch, PricingHistory};
use crate::pricing::PricingRule;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Persistence seam for rules, batches, and history. Batch progress is
/// saved through `save_batch` after every SKU, so an observer reading
/// mid-run sees consistent counters.
#[async_trait]
pub trait PricingStore: Send + Sync {
    /// Validates and writes a rule, replacing any previous rule for the
    /// same `(user, marketplace, sku)`.
    async fn upsert_rule(&self, rule: PricingRule) -> Result<(), PricingError>;

    async fn find_rule(
        &self,
        user_id: Uuid,
        sku: &str,
        marketplace_id: &str,
    ) -> Result<Option<PricingRule>, PricingError>;

    async fn create_batch(&self, batch: &PricingBatch) -> Result<(), PricingError>;

    async fn load_batch(&self, batch_id: Uuid) -> Result<Option<PricingBatch>, PricingError>;

    async fn save_batch(&self, batch: &PricingBatch) -> Result<(), PricingError>;

    async fn append_history(&self, entry: PricingHistory) -> Result<(), PricingError>;

    /// History entries for one SKU, oldest first, optionally bounded by
    /// `since`/`until` on `recorded_at`.
    async fn history_for_sku(
        &self,
        user_id: Uuid,
        sku: &str,
        marketplace_id: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<PricingHistory>, PricingError>;

    /// The recommended price of the most recent successful publish for
    /// the SKU. This is the reference price the evaluator diffs against.
    async fn latest_published_price(
        &self,
        user_id: Uuid,
        sku: &str,
        marketplace_id: &str,
    ) -> Result<Option<f64>, PricingError>;
}

fn in_window(
    entry: &PricingHistory,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> bool {
    since.is_none_or(|bound| entry.recorded_at >= bound)
        && until.is_none_or(|bound| entry.recorded_at <= bound)
}

type RuleKey = (Uuid, String, String);

/// In-process store for tests and single-node runs.
#[derive(Default)]
pub struct MemoryStore {
    rules: Mutex<HashMap<RuleKey, PricingRule>>,
    batches: Mutex<HashMap<Uuid, PricingBatch>>,
    history: Mutex<Vec<PricingHistory>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rule_key(user_id: Uuid, sku: &str, marketplace_id: &str) -> RuleKey {
        (user_id, marketplace_id.to_string(), sku.to_string())
    }
}

#[async_trait]
impl PricingStore for MemoryStore {
    async fn upsert_rule(&self, rule: PricingRule) -> Result<(), PricingError> {
        rule.validate()?;
        let key = Self::rule_key(rule.user_id, &rule.sku, &rule.marketplace_id);
        let mut rules = self.rules.lock().await;
        rules.insert(key, rule);
        Ok(())
    }

    async fn find_rule(
        &self,
        user_id: Uuid,
        sku: &str,
        marketplace_id: &str,
    ) -> Result<Option<PricingRule>, PricingError> {
        let rules = self.rules.lock().await;
        Ok(rules.get(&Self::rule_key(user_id, sku, marketplace_id)).cloned())
    }

    async fn create_batch(&self, batch: &PricingBatch) -> Result<(), PricingError> {
        let mut batches = self.batches.lock().await;
        batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn load_batch(&self, batch_id: Uuid) -> Result<Option<PricingBatch>, PricingError> {
        let batches = self.batches.lock().await;
        Ok(batches.get(&batch_id).cloned())
    }

    async fn save_batch(&self, batch: &PricingBatch) -> Result<(), PricingError> {
        let mut batches = self.batches.lock().await;
        batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn append_history(&self, entry: PricingHistory) -> Result<(), PricingError> {
        let mut history = self.history.lock().await;
        history.push(entry);
        Ok(())
    }

    async fn history_for_sku(
        &self,
        user_id: Uuid,
        sku: &str,
        marketplace_id: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<PricingHistory>, PricingError> {
        let history = self.history.lock().await;
        Ok(history
            .iter()
            .filter(|entry| {
                entry.user_id == user_id
                    && entry.sku == sku
                    && entry.marketplace_id == marketplace_id
                    && in_window(entry, since, until)
            })
            .cloned()
            .collect())
    }

    async fn latest_published_price(
        &self,
        user_id: Uuid,
        sku: &str,
        marketplace_id: &str,
    ) -> Result<Option<f64>, PricingError> {
        let history = self.history.lock().await;
        Ok(history
            .iter()
            .rev()
            .find(|entry| {
                entry.user_id == user_id
                    && entry.sku == sku
                    && entry.marketplace_id == marketplace_id
                    && entry.success
            })
            .map(|entry| entry.calculation.recommended_price))
    }
}

/// Redis-backed store. Rules and batches live as JSON strings, history
/// as per-SKU lists appended in publish order.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub fn from_env() -> Option<Self> {
        let url = std::env::var("REDIS_URL").ok()?;
        redis::Client::open(url).ok().map(Self::new)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, PricingError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| PricingError::store(err.to_string()))
    }

    fn rule_key(user_id: Uuid, sku: &str, marketplace_id: &str) -> String {
        format!("repricer:rule:{user_id}:{marketplace_id}:{sku}")
    }

    fn batch_key(batch_id: Uuid) -> String {
        format!("repricer:batch:{batch_id}")
    }

    fn history_key(user_id: Uuid, sku: &str, marketplace_id: &str) -> String {
        format!("repricer:history:{user_id}:{marketplace_id}:{sku}")
    }

    async fn write_json<T: serde::Serialize>(
        &self,
        key: String,
        value: &T,
    ) -> Result<(), PricingError> {
        let mut conn = self.connection().await?;
        let json =
            serde_json::to_string(value).map_err(|err| PricingError::store(err.to_string()))?;
        let _: () = conn
            .set(key, json)
            .await
            .map_err(|err| PricingError::store(err.to_string()))?;
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        key: String,
    ) -> Result<Option<T>, PricingError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|err| PricingError::store(err.to_string()))?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|err| PricingError::store(err.to_string())),
            None => Ok(None),
        }
    }

    async fn read_history(
        &self,
        user_id: Uuid,
        sku: &str,
        marketplace_id: &str,
    ) -> Result<Vec<PricingHistory>, PricingError> {
        let mut conn = self.connection().await?;
        let raw: Vec<String> = conn
            .lrange(Self::history_key(user_id, sku, marketplace_id), 0, -1)
            .await
            .map_err(|err| PricingError::store(err.to_string()))?;
        raw.iter()
            .map(|json| {
                serde_json::from_str(json).map_err(|err| PricingError::store(err.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl PricingStore for RedisStore {
    async fn upsert_rule(&self, rule: PricingRule) -> Result<(), PricingError> {
        rule.validate()?;
        let key = Self::rule_key(rule.user_id, &rule.sku, &rule.marketplace_id);
        self.write_json(key, &rule).await
    }

    async fn find_rule(
        &self,
        user_id: Uuid,
        sku: &str,
        marketplace_id: &str,
    ) -> Result<Option<PricingRule>, PricingError> {
        self.read_json(Self::rule_key(user_id, sku, marketplace_id))
            .await
    }

    async fn create_batch(&self, batch: &PricingBatch) -> Result<(), PricingError> {
        self.write_json(Self::batch_key(batch.id), batch).await
    }

    async fn load_batch(&self, batch_id: Uuid) -> Result<Option<PricingBatch>, PricingError> {
        self.read_json(Self::batch_key(batch_id)).await
    }

    async fn save_batch(&self, batch: &PricingBatch) -> Result<(), PricingError> {
        self.write_json(Self::batch_key(batch.id), batch).await
    }

    async fn append_history(&self, entry: PricingHistory) -> Result<(), PricingError> {
        let key = Self::history_key(entry.user_id, &entry.sku, &entry.marketplace_id);
        let mut conn = self.connection().await?;
        let json =
            serde_json::to_string(&entry).map_err(|err| PricingError::store(err.to_string()))?;
        let _: i64 = conn
            .rpush(key, json)
            .await
            .map_err(|err| PricingError::store(err.to_string()))?;
        Ok(())
    }

    async fn history_for_sku(
        &self,
        user_id: Uuid,
        sku: &str,
        marketplace_id: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<PricingHistory>, PricingError> {
        let entries = self.read_history(user_id, sku, marketplace_id).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| in_window(entry, since, until))
            .collect())
    }

    async fn latest_published_price(
        &self,
        user_id: Uuid,
        sku: &str,
        marketplace_id: &str,
    ) -> Result<Option<f64>, PricingError> {
        let entries = self.read_history(user_id, sku, marketplace_id).await?;
        Ok(entries
            .iter()
            .rev()
            .find(|entry| entry.success)
            .map(|entry| entry.calculation.recommended_price))
    }
}
