//! Amazon Selling Partner API surface: LWA token exchange plus the two
//! write paths for price changes (direct listings patch, JSON feed).

pub mod auth;
pub mod config;
pub mod feeds;
pub mod listings;

use crate::retry::{Classify, Disposition, RETRYABLE_STATUS};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SpApiError {
    /// Non-success HTTP answer, with the messages Amazon put in the
    /// `errors` array of the body.
    #[error("HTTP {status}: {}", .errors.join("; "))]
    Status { status: u16, errors: Vec<String> },
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("auth failed: {0}")]
    Auth(String),
}

impl SpApiError {
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SpApiError::Timeout
        } else {
            SpApiError::Transport(err.to_string())
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SpApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Per-error messages suitable for a result entry.
    pub fn messages(&self) -> Vec<String> {
        match self {
            SpApiError::Status { errors, .. } => errors.clone(),
            SpApiError::Timeout => vec!["request timed out".to_string()],
            SpApiError::Transport(message) => vec![message.clone()],
            SpApiError::Auth(message) => vec![format!("auth failed: {message}")],
        }
    }
}

impl Classify for SpApiError {
    fn disposition(&self) -> Disposition {
        match self {
            SpApiError::Status { status, .. } if RETRYABLE_STATUS.contains(status) => {
                Disposition::Retry
            }
            _ => Disposition::Fail,
        }
    }
}

/// What Amazon hands back when it accepts a price change. Both ids are
/// optional because the two submission paths report differently.
#[derive(Debug, Clone)]
pub struct SubmissionAck {
    pub submission_id: Option<String>,
    pub feed_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMethod {
    #[default]
    Listing,
    Feed,
}

/// A single price change ready for submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub sku: String,
    pub marketplace_id: String,
    pub price: f64,
    pub currency: String,
    pub method: UpdateMethod,
}

impl PriceUpdate {
    pub fn new(
        sku: impl Into<String>,
        marketplace_id: impl Into<String>,
        price: f64,
        method: UpdateMethod,
    ) -> Self {
        Self {
            sku: sku.into(),
            marketplace_id: marketplace_id.into(),
            price,
            currency: config::DEFAULT_CURRENCY.clone(),
            method,
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }
}

/// Seam between the pipeline and the marketplace. The real client
/// talks SP-API; tests swap in scripted fakes.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    async fn submit_price_update(&self, update: &PriceUpdate) -> Result<SubmissionAck, SpApiError>;
}

/// SP-API backed implementation. Requires `SPAPI_REFRESH_TOKEN` and the
/// LWA client credentials in env; fetches a fresh access token per
/// submission.
#[derive(Debug, Clone, Default)]
pub struct SpApiClient {
    refresh_token: Option<String>,
}

impl SpApiClient {
    pub fn from_env() -> Self {
        let token = config::SPAPI_REFRESH_TOKEN.clone();
        Self {
            refresh_token: (!token.is_empty()).then_some(token),
        }
    }

    async fn access_token(&self) -> Result<String, SpApiError> {
        let refresh = self
            .refresh_token
            .as_deref()
            .ok_or_else(|| SpApiError::Auth("SPAPI_REFRESH_TOKEN is not set".to_string()))?;
        auth::access_token_from_refresh(refresh)
            .await
            .map_err(|err| SpApiError::Auth(err.to_string()))
    }
}

#[async_trait]
impl MarketplaceApi for SpApiClient {
    async fn submit_price_update(&self, update: &PriceUpdate) -> Result<SubmissionAck, SpApiError> {
        let token = self.access_token().await?;
        match update.method {
            UpdateMethod::Listing => {
                listings::patch_listing_price(
                    &update.sku,
                    &update.marketplace_id,
                    update.price,
                    &update.currency,
                    &token,
                )
                .await
            }
            UpdateMethod::Feed => {
                feeds::submit_price_feed(
                    &update.sku,
                    &update.marketplace_id,
                    update.price,
                    &update.currency,
                    &token,
                )
                .await
            }
        }
    }
}

pub(crate) async fn error_from_response(response: reqwest::Response) -> SpApiError {
    let status = response.status().as_u16();
    let body = response.json::<Value>().await.ok();
    SpApiError::Status {
        status,
        errors: parse_error_body(body.as_ref()),
    }
}

/// Flattens an SP-API error body into `"<code>: <message>"` strings.
/// Bodies without a usable `errors` array yield one generic entry so a
/// failure never surfaces empty-handed.
pub(crate) fn parse_error_body(body: Option<&Value>) -> Vec<String> {
    let parsed: Vec<String> = body
        .and_then(|value| value.get("errors"))
        .and_then(|errors| errors.as_array())
        .map(|entries| {
            entries
                .iter()
                .map(|entry| {
                    let code = entry
                        .get("code")
                        .and_then(|value| value.as_str())
                        .unwrap_or("unknown");
                    let message = entry
                        .get("message")
                        .and_then(|value| value.as_str())
                        .unwrap_or("");
                    if message.is_empty() {
                        code.to_string()
                    } else {
                        format!("{code}: {message}")
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    if parsed.is_empty() {
        vec!["unspecified error".to_string()]
    } else {
        parsed
    }
}
