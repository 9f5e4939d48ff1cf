//! Payment gateway client: turn a chargeable source into a charge.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::json;
use ulid::Ulid;

use crate::observability::GATEWAY_REQUEST_DURATION_SECONDS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub payment_id: Ulid,
    pub reservation_id: Option<Ulid>,
    pub source_id: String,
    pub amount: Decimal,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    Paid,
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charge {
    pub id: String,
    pub status: ChargeStatus,
    pub amount: Decimal,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway rejected the charge (HTTP {status})")]
    Rejected { status: u16, body: String },
    #[error("unexpected gateway response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(&self, req: &ChargeRequest) -> Result<Charge, GatewayError>;
}

/// Decimal amount to the gateway's minor units (centavos).
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    amount.checked_mul(Decimal::ONE_HUNDRED)?.round().to_i64()
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// REST client for the gateway's `POST /v1/payments`.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
    currency: String,
}

#[derive(Deserialize)]
struct ChargeResponse {
    data: ChargeData,
}

#[derive(Deserialize)]
struct ChargeData {
    id: String,
    attributes: ChargeAttributes,
}

#[derive(Deserialize)]
struct ChargeAttributes {
    status: String,
    amount: i64,
}

impl HttpGateway {
    pub fn new(base_url: &str, secret_key: &str, currency: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
            currency: currency.to_string(),
        })
    }

    fn payload(&self, req: &ChargeRequest) -> Result<serde_json::Value, GatewayError> {
        let amount = to_minor_units(req.amount)
            .ok_or_else(|| GatewayError::Decode(format!("amount {} out of range", req.amount)))?;
        let reservation_id = req.reservation_id.map(|id| id.to_string()).unwrap_or_default();
        Ok(json!({
            "data": {
                "attributes": {
                    "amount": amount,
                    "currency": self.currency,
                    "description": req.description,
                    "source": { "id": req.source_id, "type": "source" },
                    "metadata": {
                        "payment_id": req.payment_id.to_string(),
                        "reservation_id": reservation_id,
                    },
                }
            }
        }))
    }
}

fn parse_charge(data: ChargeData) -> Result<Charge, GatewayError> {
    let status = match data.attributes.status.as_str() {
        "paid" => ChargeStatus::Paid,
        "pending" | "processing" => ChargeStatus::Pending,
        "failed" => ChargeStatus::Failed,
        other => return Err(GatewayError::Decode(format!("unknown charge status {other:?}"))),
    };
    Ok(Charge {
        id: data.id,
        status,
        amount: from_minor_units(data.attributes.amount),
    })
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_payment(&self, req: &ChargeRequest) -> Result<Charge, GatewayError> {
        let body = self.payload(req)?;
        let started = std::time::Instant::now();
        let result = self
            .client
            .post(format!("{}/v1/payments", self.base_url))
            .basic_auth(&self.secret_key, None::<&str>)
            .json(&body)
            .send()
            .await;
        metrics::histogram!(GATEWAY_REQUEST_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let resp = result?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(payment_id = %req.payment_id, status = status.as_u16(), %body, "gateway rejected charge");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: ChargeResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        parse_charge(parsed.data)
    }
}
