use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::payment_links::PaymentLink;

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::processed_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProcessedEvent {
    pub id: Uuid,
    pub event_type: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::payment_links)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbPaymentLink {
    pub reservation_id: Uuid,
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<DbPaymentLink> for PaymentLink {
    fn from(row: DbPaymentLink) -> Self {
        Self {
            url: row.url,
            expires_at: row.expires_at,
        }
    }
}
