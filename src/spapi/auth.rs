use crate::http::build_client;
use crate::spapi::config::{LWA_CLIENT_ID, LWA_CLIENT_SECRET, LWA_TOKEN_URL};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LwaError {
    #[error("missing LWA client credentials in env")]
    MissingCredentials,
    #[error("token request failed: {0}")]
    Request(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Exchanges a long-lived refresh token for a short-lived SP-API access
/// token via Login with Amazon.
pub async fn access_token_from_refresh(refresh_token: &str) -> Result<String, LwaError> {
    if LWA_CLIENT_ID.is_empty() || LWA_CLIENT_SECRET.is_empty() {
        return Err(LwaError::MissingCredentials);
    }
    let params = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", LWA_CLIENT_ID.as_str()),
        ("client_secret", LWA_CLIENT_SECRET.as_str()),
    ];

    let client = build_client();
    let response = client
        .post(LWA_TOKEN_URL.as_str())
        .form(&params)
        .send()
        .await
        .map_err(|err| LwaError::Request(err.to_string()))?;

    if !response.status().is_success() {
        return Err(LwaError::Request(format!("HTTP {}", response.status())));
    }

    let payload: TokenResponse = response
        .json()
        .await
        .map_err(|err| LwaError::Request(err.to_string()))?;
    Ok(payload.access_token)
}
