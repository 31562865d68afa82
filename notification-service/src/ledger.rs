//! Durable record of which events were handled and which payment links exist.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{DbPaymentLink, ProcessedEvent};
use crate::payment_links::PaymentLink;
use crate::schema::{payment_links, processed_events};

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Claimed,
    Sent,
    Logged,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::Sent => "sent",
            Self::Logged => "logged",
            Self::Failed => "failed",
        }
    }
}

#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    /// Records the event id. Returns false when it was already claimed,
    /// meaning the event must not be acted on again.
    async fn claim_event(&self, event_id: Uuid, event_type: &str, now: DateTime<Utc>) -> Result<bool, LedgerError>;

    async fn finish_event(&self, event_id: Uuid, status: DeliveryStatus, now: DateTime<Utc>) -> Result<(), LedgerError>;

    /// The stored link for the reservation, if it has not expired yet.
    async fn cached_link(&self, reservation_id: Uuid, now: DateTime<Utc>) -> Result<Option<PaymentLink>, LedgerError>;

    async fn store_link(&self, reservation_id: Uuid, link: &PaymentLink, now: DateTime<Utc>) -> Result<(), LedgerError>;
}

#[derive(Clone)]
pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

macro_rules! conn {
    ($pool:expr) => {
        $pool.get().await.map_err(|e| LedgerError::Pool(e.to_string()))?
    };
}

#[async_trait]
impl DeliveryLedger for PgLedger {
    async fn claim_event(&self, event_id: Uuid, event_type: &str, now: DateTime<Utc>) -> Result<bool, LedgerError> {
        let mut conn = conn!(self.pool);
        let inserted = diesel::insert_into(processed_events::table)
            .values(&ProcessedEvent {
                id: event_id,
                event_type: event_type.to_string(),
                status: DeliveryStatus::Claimed.as_str().to_string(),
                created_at: now,
                finished_at: None,
            })
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(inserted == 1)
    }

    async fn finish_event(&self, event_id: Uuid, status: DeliveryStatus, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let mut conn = conn!(self.pool);
        diesel::update(processed_events::table.find(event_id))
            .set((
                processed_events::status.eq(status.as_str()),
                processed_events::finished_at.eq(Some(now)),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn cached_link(&self, reservation_id: Uuid, now: DateTime<Utc>) -> Result<Option<PaymentLink>, LedgerError> {
        let mut conn = conn!(self.pool);
        let row = payment_links::table
            .find(reservation_id)
            .filter(payment_links::expires_at.gt(now))
            .select(DbPaymentLink::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(PaymentLink::from))
    }

    async fn store_link(&self, reservation_id: Uuid, link: &PaymentLink, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let mut conn = conn!(self.pool);
        diesel::insert_into(payment_links::table)
            .values(&DbPaymentLink {
                reservation_id,
                url: link.url.clone(),
                expires_at: link.expires_at,
                created_at: now,
            })
            .on_conflict(payment_links::reservation_id)
            .do_update()
            .set((
                payment_links::url.eq(excluded(payment_links::url)),
                payment_links::expires_at.eq(excluded(payment_links::expires_at)),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

#[derive(Default)]
struct LedgerState {
    events: HashMap<Uuid, DeliveryStatus>,
    links: HashMap<Uuid, PaymentLink>,
}

/// In-process ledger for tests and local runs.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_of(&self, event_id: Uuid) -> Option<DeliveryStatus> {
        self.lock().events.get(&event_id).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DeliveryLedger for MemoryLedger {
    async fn claim_event(&self, event_id: Uuid, _event_type: &str, _now: DateTime<Utc>) -> Result<bool, LedgerError> {
        let mut state = self.lock();
        if state.events.contains_key(&event_id) {
            return Ok(false);
        }
        state.events.insert(event_id, DeliveryStatus::Claimed);
        Ok(true)
    }

    async fn finish_event(&self, event_id: Uuid, status: DeliveryStatus, _now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.lock().events.insert(event_id, status);
        Ok(())
    }

    async fn cached_link(&self, reservation_id: Uuid, now: DateTime<Utc>) -> Result<Option<PaymentLink>, LedgerError> {
        Ok(self
            .lock()
            .links
            .get(&reservation_id)
            .filter(|link| link.is_valid_at(now))
            .cloned())
    }

    async fn store_link(&self, reservation_id: Uuid, link: &PaymentLink, _now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.lock().links.insert(reservation_id, link.clone());
        Ok(())
    }
}
