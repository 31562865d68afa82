use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::*;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::zones)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbZone {
    pub id: Uuid,
    pub name: String,
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_km: f64,
    pub kind: String,
    pub country_code: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::pallets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbPallet {
    pub id: Uuid,
    pub pickup_zone_id: Uuid,
    pub delivery_zone_id: Uuid,
    pub bottle_capacity: i32,
    pub status: String,
    pub is_complete: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub payment_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = crate::schema::reservations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbReservation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub customer_email: String,
    pub delivery_address: String,
    pub pallet_id: Option<Uuid>,
    pub pickup_zone_id: Option<Uuid>,
    pub delivery_zone_id: Option<Uuid>,
    pub status: String,
    pub payment_status: String,
    pub payment_deadline: Option<DateTime<Utc>>,
    pub zone_issue: Option<String>,
    pub producer_approved_at: Option<DateTime<Utc>>,
    pub producer_rejected_at: Option<DateTime<Utc>>,
    pub decided_by_producer_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable, Associations)]
#[diesel(table_name = crate::schema::reservation_items)]
#[diesel(belongs_to(DbReservation, foreign_key = reservation_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbReservationItem {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub wine_id: Uuid,
    pub quantity: i32,
    pub decision_status: String,
    pub approved_quantity: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbZone> for Zone {
    type Error = StoreError;

    fn try_from(row: DbZone) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            center_lat: row.center_lat,
            center_lon: row.center_lon,
            radius_km: row.radius_km,
            kind: row.kind.parse()?,
            country_code: row.country_code,
        })
    }
}

impl TryFrom<DbPallet> for Pallet {
    type Error = StoreError;

    fn try_from(row: DbPallet) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            pickup_zone_id: row.pickup_zone_id,
            delivery_zone_id: row.delivery_zone_id,
            bottle_capacity: row.bottle_capacity,
            status: row.status.parse()?,
            is_complete: row.is_complete,
            completed_at: row.completed_at,
            payment_deadline: row.payment_deadline,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<DbReservation> for Reservation {
    type Error = StoreError;

    fn try_from(row: DbReservation) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            customer_email: row.customer_email,
            delivery_address: row.delivery_address,
            pallet_id: row.pallet_id,
            pickup_zone_id: row.pickup_zone_id,
            delivery_zone_id: row.delivery_zone_id,
            status: row.status.parse()?,
            payment_status: row.payment_status.parse()?,
            payment_deadline: row.payment_deadline,
            zone_issue: row.zone_issue.map(|s| s.parse()).transpose()?,
            producer_approved_at: row.producer_approved_at,
            producer_rejected_at: row.producer_rejected_at,
            decided_by_producer_id: row.decided_by_producer_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<DbReservationItem> for ReservationItem {
    type Error = StoreError;

    fn try_from(row: DbReservationItem) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            reservation_id: row.reservation_id,
            wine_id: row.wine_id,
            quantity: row.quantity,
            decision_status: row.decision_status.parse()?,
            approved_quantity: row.approved_quantity,
        })
    }
}

impl TryFrom<&EventEnvelope> for DbOutboxEvent {
    type Error = StoreError;

    fn try_from(envelope: &EventEnvelope) -> Result<Self, Self::Error> {
        Ok(Self {
            id: envelope.id,
            aggregate_id: envelope.aggregate_id,
            event_type: envelope.event.event_type().to_string(),
            event_data: serde_json::to_value(&envelope.event)?,
            processed: false,
            created_at: envelope.created_at,
        })
    }
}

impl TryFrom<DbOutboxEvent> for EventEnvelope {
    type Error = StoreError;

    fn try_from(row: DbOutboxEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            aggregate_id: row.aggregate_id,
            created_at: row.created_at,
            event: serde_json::from_value(row.event_data)?,
        })
    }
}

pub fn reservation_with_items(
    reservation: DbReservation,
    items: Vec<DbReservationItem>,
) -> Result<ReservationWithItems, StoreError> {
    Ok(ReservationWithItems {
        reservation: reservation.try_into()?,
        items: items
            .into_iter()
            .map(ReservationItem::try_from)
            .collect::<Result<_, _>>()?,
    })
}
