use once_cell::sync::Lazy;
use std::env;

/// Loads `.env` before the first touch of the statics below. Call once
/// from the embedding process; repeated calls are harmless.
pub fn load_env() {
    dotenvy::dotenv().ok();
}

pub static SPAPI_ENV: Lazy<String> =
    Lazy::new(|| env::var("SPAPI_ENV").unwrap_or_else(|_| "SANDBOX".to_string()));

pub static LWA_CLIENT_ID: Lazy<String> =
    Lazy::new(|| env::var("SPAPI_LWA_CLIENT_ID").unwrap_or_default());

pub static LWA_CLIENT_SECRET: Lazy<String> =
    Lazy::new(|| env::var("SPAPI_LWA_CLIENT_SECRET").unwrap_or_default());

pub static SPAPI_REFRESH_TOKEN: Lazy<String> =
    Lazy::new(|| env::var("SPAPI_REFRESH_TOKEN").unwrap_or_default());

pub static SELLER_ID: Lazy<String> =
    Lazy::new(|| env::var("SPAPI_SELLER_ID").unwrap_or_default());

pub static DEFAULT_CURRENCY: Lazy<String> =
    Lazy::new(|| env::var("SPAPI_DEFAULT_CURRENCY").unwrap_or_else(|_| "EUR".to_string()));

pub static ENDPOINT: Lazy<String> = Lazy::new(|| {
    if SPAPI_ENV.as_str().eq_ignore_ascii_case("PROD") {
        "https://sellingpartnerapi-eu.amazon.com".to_string()
    } else {
        "https://sandbox.sellingpartnerapi-eu.amazon.com".to_string()
    }
});

// LWA lives outside the SP-API host and does not follow the env switch.
pub static LWA_TOKEN_URL: Lazy<String> = Lazy::new(|| {
    env::var("SPAPI_LWA_TOKEN_URL")
        .unwrap_or_else(|_| "https://api.amazon.com/auth/o2/token".to_string())
});
