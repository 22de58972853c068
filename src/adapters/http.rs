//! HTTP clients for the burn and bridge services

use super::{
    BridgeAdapter, BridgeRef, BurnAdapter, BurnAttestation, FulfillmentStatus, IntentParams,
    RefundParams,
};
use crate::config::CollaboratorConfig;
use crate::coordination::IntentNonce;
use crate::error::{RouterError, RouterResult};
use crate::types::ChainId;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Shared client setup for both services
#[derive(Clone)]
struct ServiceClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl ServiceClient {
    fn new(base_url: &str, config: &CollaboratorConfig) -> RouterResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| RouterError::Config(format!("HTTP client: {}", e)))?;

        let api_key = config.api_key();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> RouterResult<Response> {
        self.authorize(builder)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RouterError::TimeoutExceeded {
                        operation: "collaborator request".to_string(),
                    }
                } else {
                    RouterError::Collaborator(e.to_string())
                }
            })
    }
}

/// Reads an error body for a rejected call
async fn rejection_reason(response: Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) if !body.is_empty() => format!("{}: {}", status, body),
        _ => status.to_string(),
    }
}

/// A 4xx other than 408/429 is a definitive rejection, anything else is transient
fn is_rejection(status: StatusCode) -> bool {
    status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
}

#[derive(Serialize)]
struct BurnRequest<'a> {
    amount: u128,
    destination_chain: ChainId,
    nonce: &'a IntentNonce,
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum BurnResponse {
    Pending,
    Attested {
        #[serde(with = "crate::types::amount")]
        amount: u128,
        attestation: String,
    },
}

/// Burn service client
pub struct HttpBurnAdapter {
    service: ServiceClient,
}

impl HttpBurnAdapter {
    pub fn new(config: &CollaboratorConfig) -> RouterResult<Self> {
        Ok(Self {
            service: ServiceClient::new(&config.burn_url, config)?,
        })
    }
}

#[async_trait]
impl BurnAdapter for HttpBurnAdapter {
    async fn burn(
        &self,
        amount: u128,
        destination_chain: ChainId,
        nonce: &IntentNonce,
    ) -> RouterResult<Option<BurnAttestation>> {
        let request = BurnRequest {
            amount,
            destination_chain,
            nonce,
        };
        let builder = self.service.client.post(self.service.url("/burns")).json(&request);
        let response = self.service.send(builder).await?;

        let status = response.status();
        if is_rejection(status) {
            return Err(RouterError::BurnRejected(rejection_reason(response).await));
        }
        if !status.is_success() {
            return Err(RouterError::Collaborator(rejection_reason(response).await));
        }

        let body: BurnResponse = response
            .json()
            .await
            .map_err(|e| RouterError::Collaborator(format!("Invalid burn response: {}", e)))?;

        debug!("Burn {} for chain {} answered {}", nonce, destination_chain, status);

        Ok(match body {
            BurnResponse::Pending => None,
            BurnResponse::Attested {
                amount,
                attestation,
            } => Some(BurnAttestation {
                nonce: *nonce,
                amount,
                attestation,
            }),
        })
    }
}

#[derive(Deserialize)]
struct SubmitResponse {
    bridge_ref: String,
}

/// Bridge / intent service client
pub struct HttpBridgeAdapter {
    service: ServiceClient,
}

impl HttpBridgeAdapter {
    pub fn new(config: &CollaboratorConfig) -> RouterResult<Self> {
        Ok(Self {
            service: ServiceClient::new(&config.bridge_url, config)?,
        })
    }
}

#[async_trait]
impl BridgeAdapter for HttpBridgeAdapter {
    async fn submit_intent(&self, params: &IntentParams) -> RouterResult<BridgeRef> {
        let builder = self.service.client.post(self.service.url("/intents")).json(params);
        let response = self.service.send(builder).await?;

        let status = response.status();
        if is_rejection(status) {
            return Err(RouterError::SubmissionRejected(rejection_reason(response).await));
        }
        if !status.is_success() {
            return Err(RouterError::Collaborator(rejection_reason(response).await));
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| RouterError::Collaborator(format!("Invalid submit response: {}", e)))?;

        Ok(BridgeRef(body.bridge_ref))
    }

    async fn poll_fulfillment(&self, bridge_ref: &BridgeRef) -> RouterResult<FulfillmentStatus> {
        let url = self.service.url(&format!("/intents/{}", bridge_ref));
        let response = self.service.send(self.service.client.get(url)).await?;

        if !response.status().is_success() {
            return Err(RouterError::Collaborator(rejection_reason(response).await));
        }

        response
            .json()
            .await
            .map_err(|e| RouterError::Collaborator(format!("Invalid fulfillment status: {}", e)))
    }

    async fn refund(&self, params: &RefundParams) -> RouterResult<()> {
        let builder = self.service.client.post(self.service.url("/refunds")).json(params);
        let response = self.service.send(builder).await?;

        let status = response.status();
        if is_rejection(status) {
            return Err(RouterError::RefundRejected(rejection_reason(response).await));
        }
        if !status.is_success() {
            return Err(RouterError::Collaborator(rejection_reason(response).await));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_classification() {
        assert!(is_rejection(StatusCode::CONFLICT));
        assert!(is_rejection(StatusCode::UNPROCESSABLE_ENTITY));
        assert!(!is_rejection(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_rejection(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_rejection(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn test_fulfillment_status_wire_format() {
        let status: FulfillmentStatus =
            serde_json::from_str(r#"{"status":"fulfilled","minted_amount":999}"#).unwrap();
        assert_eq!(status, FulfillmentStatus::Fulfilled { minted_amount: 999 });

        let status: FulfillmentStatus = serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        assert_eq!(status, FulfillmentStatus::Pending);

        let settled = FulfillmentStatus::Settled { minted_amount: 1_000_000 };
        let json = serde_json::to_string(&settled).unwrap();
        assert_eq!(serde_json::from_str::<FulfillmentStatus>(&json).unwrap(), settled);
    }

    #[test]
    fn test_burn_response_wire_format() {
        let response: BurnResponse =
            serde_json::from_str(r#"{"status":"attested","amount":1000,"attestation":"0xab"}"#)
                .unwrap();
        assert!(matches!(
            response,
            BurnResponse::Attested { amount: 1000, ref attestation } if attestation == "0xab"
        ));
    }

    #[test]
    fn test_base_url_is_normalized() {
        let config = CollaboratorConfig {
            burn_url: "http://burn.local/".to_string(),
            bridge_url: "http://bridge.local".to_string(),
            request_timeout_ms: 1_000,
            api_key_env: None,
        };
        let adapter = HttpBurnAdapter::new(&config).unwrap();
        assert_eq!(adapter.service.url("/burns"), "http://burn.local/burns");
    }
}
