use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::ReservationStatus;
use std::time::Duration;
use uuid::Uuid;

use crate::error::DispatchError;

const SERVICE: &str = "mailer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalEmail {
    pub reservation_id: Uuid,
    pub status: ReservationStatus,
    pub approved_bottles: i64,
    pub requested_bottles: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentDueEmail {
    pub reservation_id: Uuid,
    pub payment_url: String,
    pub payment_deadline: DateTime<Utc>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_approval_email(&self, recipient: &str, payload: &ApprovalEmail) -> Result<(), DispatchError>;
    async fn send_payment_due_email(&self, recipient: &str, payload: &PaymentDueEmail) -> Result<(), DispatchError>;
}

#[derive(Debug, Serialize)]
struct OutgoingMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: String,
    text: String,
}

/// Transactional mail API client (`POST {base}/messages`).
pub struct HttpMailer {
    client: reqwest::Client,
    base_url: String,
    from: String,
}

impl HttpMailer {
    pub fn new(base_url: impl Into<String>, from: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            from: from.into(),
        })
    }

    async fn send(&self, to: &str, subject: String, text: String) -> Result<(), DispatchError> {
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        self.client
            .post(url)
            .json(&OutgoingMessage {
                from: &self.from,
                to,
                subject,
                text,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DispatchError::from_http(SERVICE, e))?;
        Ok(())
    }
}

pub fn approval_text(payload: &ApprovalEmail) -> (String, String) {
    let subject = match payload.status {
        ReservationStatus::Declined => "Your reservation was declined".to_string(),
        ReservationStatus::PartlyApproved => "Your reservation was partly approved".to_string(),
        _ => "Your reservation was approved".to_string(),
    };
    let text = format!(
        "Reservation {}: {} of {} bottles approved by the producer.",
        payload.reservation_id, payload.approved_bottles, payload.requested_bottles
    );
    (subject, text)
}

pub fn payment_due_text(payload: &PaymentDueEmail) -> (String, String) {
    let subject = "Your pallet is complete, payment is due".to_string();
    let text = format!(
        "Reservation {} is ready. Please pay before {} at {}",
        payload.reservation_id,
        payload.payment_deadline.format("%Y-%m-%d %H:%M UTC"),
        payload.payment_url
    );
    (subject, text)
}

#[async_trait]
impl Notifier for HttpMailer {
    async fn send_approval_email(&self, recipient: &str, payload: &ApprovalEmail) -> Result<(), DispatchError> {
        let (subject, text) = approval_text(payload);
        self.send(recipient, subject, text).await
    }

    async fn send_payment_due_email(&self, recipient: &str, payload: &PaymentDueEmail) -> Result<(), DispatchError> {
        let (subject, text) = payment_due_text(payload);
        self.send(recipient, subject, text).await
    }
}
