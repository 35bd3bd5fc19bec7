use crate::http::build_client;
use crate::spapi::config::{ENDPOINT, SELLER_ID};
use crate::spapi::listings::price_patches;
use crate::spapi::{SpApiError, SubmissionAck, error_from_response};
use serde::Deserialize;
use serde_json::json;

pub const FEEDS_API_VERSION: &str = "2021-06-30";
const FEED_TYPE: &str = "JSON_LISTINGS_FEED";
const FEED_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDocumentResponse {
    feed_document_id: String,
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateFeedResponse {
    feed_id: String,
}

/// Publishes one SKU's price through the Feeds API: create a feed
/// document, upload the payload to the returned URL, then create the
/// feed referencing it. Amazon answers the final call with 202 and a
/// feed id; processing happens offline.
pub async fn submit_price_feed(
    sku: &str,
    marketplace_id: &str,
    price: f64,
    currency: &str,
    access_token: &str,
) -> Result<SubmissionAck, SpApiError> {
    let client = build_client();

    let url = format!("{}/feeds/{FEEDS_API_VERSION}/documents", *ENDPOINT);
    let response = client
        .post(url)
        .header("x-amz-access-token", access_token)
        .json(&json!({ "contentType": FEED_CONTENT_TYPE }))
        .send()
        .await
        .map_err(SpApiError::from_transport)?;
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    let document: CreateDocumentResponse =
        response.json().await.map_err(SpApiError::from_transport)?;

    // The upload target is a pre-signed URL outside the SP-API host;
    // it takes the raw payload, not an authenticated call.
    let payload = feed_payload(sku, marketplace_id, price, currency);
    let body = serde_json::to_vec(&payload)
        .map_err(|err| SpApiError::Transport(err.to_string()))?;
    let upload = client
        .put(document.url.as_str())
        .header("Content-Type", FEED_CONTENT_TYPE)
        .body(body)
        .send()
        .await
        .map_err(SpApiError::from_transport)?;
    if !upload.status().is_success() {
        return Err(error_from_response(upload).await);
    }

    let url = format!("{}/feeds/{FEEDS_API_VERSION}/feeds", *ENDPOINT);
    let response = client
        .post(url)
        .header("x-amz-access-token", access_token)
        .json(&json!({
            "feedType": FEED_TYPE,
            "marketplaceIds": [marketplace_id],
            "inputFeedDocumentId": document.feed_document_id.clone(),
        }))
        .send()
        .await
        .map_err(SpApiError::from_transport)?;
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    let feed: CreateFeedResponse = response.json().await.map_err(SpApiError::from_transport)?;

    Ok(SubmissionAck {
        submission_id: Some(document.feed_document_id),
        feed_id: Some(feed.feed_id),
    })
}

fn feed_payload(sku: &str, marketplace_id: &str, price: f64, currency: &str) -> serde_json::Value {
    json!({
        "header": { "sellerId": SELLER_ID.as_str(), "version": "2.0" },
        "messages": [{
            "messageId": 1,
            "sku": sku,
            "operationType": "PATCH",
            "productType": "PRODUCT",
            "patches": price_patches(marketplace_id, price, currency),
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_payload_carries_one_patch_message() {
        let payload = feed_payload("SKU-001", "A13V1IB3VIYZZH", 14.5, "EUR");

        assert_eq!(payload["header"]["version"], "2.0");
        let message = &payload["messages"][0];
        assert_eq!(message["messageId"], 1);
        assert_eq!(message["sku"], "SKU-001");
        assert_eq!(message["operationType"], "PATCH");
        assert_eq!(
            message["patches"][0]["path"],
            "/attributes/purchasable_offer"
        );
        assert_eq!(
            message["patches"][0]["value"][0]["our_price"][0]["schedule"][0]["value_with_tax"],
            14.5
        );
    }
}
