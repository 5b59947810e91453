use async_trait::async_trait;
use coachline_core::payment::{GatewayInitiation, GatewaySession, PaymentGatewayPort};
use coachline_core::BoxError;
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use crate::app_config::PaymentGatewayConfig;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateResponse {
    payment_details: PaymentDetails,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentDetails {
    redirect_url: String,
    transaction_id: String,
}

/// JSON client for the hosted payment gateway.
pub struct HttpPaymentGateway {
    client: Client,
    url: String,
    api_key: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &PaymentGatewayConfig) -> Self {
        Self {
            client: Client::new(),
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl PaymentGatewayPort for HttpPaymentGateway {
    async fn initiate(&self, request: &GatewayInitiation) -> Result<GatewaySession, BoxError> {
        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("gateway returned {}: {}", status, body).into());
        }

        let parsed: InitiateResponse = response.json().await?;
        info!(
            "Gateway session {} opened for {}",
            parsed.payment_details.transaction_id, request.system_transaction_id
        );

        Ok(GatewaySession {
            redirect_url: parsed.payment_details.redirect_url,
            gateway_transaction_id: parsed.payment_details.transaction_id,
        })
    }
}
