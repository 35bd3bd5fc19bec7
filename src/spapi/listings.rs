use crate::http::build_client;
use crate::spapi::config::{ENDPOINT, SELLER_ID};
use crate::spapi::{SpApiError, SubmissionAck, error_from_response};
use serde::{Deserialize, Serialize};
use urlencoding::encode;

pub const LISTINGS_API_VERSION: &str = "2021-08-01";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingsPatchRequest {
    pub product_type: String,
    pub patches: Vec<PatchOperation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatchOperation {
    pub op: &'static str,
    pub path: &'static str,
    pub value: Vec<PurchasableOffer>,
}

// Attribute payloads keep Amazon's snake_case field names as-is.
#[derive(Debug, Clone, Serialize)]
pub struct PurchasableOffer {
    pub marketplace_id: String,
    pub currency: String,
    pub our_price: Vec<PriceSchedule>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceSchedule {
    pub schedule: Vec<SchedulePoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulePoint {
    pub value_with_tax: f64,
}

/// One `replace` patch on `purchasable_offer`. Shared between the
/// direct listings call and the feed payload.
pub(crate) fn price_patches(
    marketplace_id: &str,
    price: f64,
    currency: &str,
) -> Vec<PatchOperation> {
    vec![PatchOperation {
        op: "replace",
        path: "/attributes/purchasable_offer",
        value: vec![PurchasableOffer {
            marketplace_id: marketplace_id.to_string(),
            currency: currency.to_string(),
            our_price: vec![PriceSchedule {
                schedule: vec![SchedulePoint {
                    value_with_tax: price,
                }],
            }],
        }],
    }]
}

/// Patches the price of one SKU through the Listings Items API. Amazon
/// acknowledges with a submission id; the change itself lands
/// asynchronously on the marketplace.
pub async fn patch_listing_price(
    sku: &str,
    marketplace_id: &str,
    price: f64,
    currency: &str,
    access_token: &str,
) -> Result<SubmissionAck, SpApiError> {
    let client = build_client();
    let url = format!(
        "{}/listings/{LISTINGS_API_VERSION}/items/{}/{}",
        *ENDPOINT,
        *SELLER_ID,
        encode(sku)
    );
    let request = ListingsPatchRequest {
        product_type: "PRODUCT".to_string(),
        patches: price_patches(marketplace_id, price, currency),
    };
    let response = client
        .patch(url)
        .header("x-amz-access-token", access_token)
        .query(&[("marketplaceIds", marketplace_id)])
        .json(&request)
        .send()
        .await
        .map_err(SpApiError::from_transport)?;
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct PatchResponse {
        submission_id: Option<String>,
    }
    let payload: PatchResponse = response.json().await.map_err(SpApiError::from_transport)?;
    Ok(SubmissionAck {
        submission_id: payload.submission_id,
        feed_id: None,
    })
}
