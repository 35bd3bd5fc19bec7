use thiserror::Error;

/// Pipeline-level failures a caller must branch on.
///
/// Publication problems are deliberately absent: they are data, not
/// errors. A failed marketplace submission lands in the per-SKU result
/// entry (and the batch keeps going); only validation, missing records,
/// storage trouble, and job plumbing surface as `Err`.
#[derive(Debug, Error)]
pub enum PricingError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("job error: {0}")]
    Job(String),
}

impl PricingError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn job(message: impl Into<String>) -> Self {
        Self::Job(message.into())
    }
}
