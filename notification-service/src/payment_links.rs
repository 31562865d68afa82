use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::DispatchError;

const SERVICE: &str = "payment links";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl PaymentLink {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[async_trait]
pub trait PaymentLinkService: Send + Sync {
    /// Creates the checkout link for a reservation. Repeated calls for the
    /// same reservation must not create a second payable link.
    async fn create_payment_link(
        &self,
        reservation_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<PaymentLink, DispatchError>;
}

#[derive(Debug, Serialize)]
struct CreateLinkRequest {
    reservation_id: Uuid,
    expires_at: DateTime<Utc>,
}

pub struct HttpPaymentLinks {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPaymentLinks {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl PaymentLinkService for HttpPaymentLinks {
    async fn create_payment_link(
        &self,
        reservation_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<PaymentLink, DispatchError> {
        let url = format!("{}/payment-links", self.base_url.trim_end_matches('/'));
        self.client
            .post(url)
            .header("Idempotency-Key", reservation_id.to_string())
            .json(&CreateLinkRequest {
                reservation_id,
                expires_at,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DispatchError::from_http(SERVICE, e))?
            .json::<PaymentLink>()
            .await
            .map_err(|e| DispatchError::Permanent {
                service: SERVICE,
                message: format!("unreadable response: {e}"),
            })
    }
}
