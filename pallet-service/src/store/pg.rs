use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::*;
use std::collections::HashMap;
use uuid::Uuid;

use super::*;
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;
type PooledConn<'a> = bb8::PooledConnection<'a, AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Attempts at re-reading a lane after a conflicting insert.
const LANE_RESOLVE_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> StoreResult<PooledConn<'_>> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

fn counted_statuses() -> Vec<String> {
    ReservationStatus::as_strings(&ReservationStatus::COUNTED)
}

async fn reserved_total(conn: &mut AsyncPgConnection, pallet_id: Uuid) -> StoreResult<i64> {
    let total: Option<i64> = reservation_items::table
        .inner_join(reservations::table)
        .filter(reservations::pallet_id.eq(pallet_id))
        .filter(reservations::status.eq_any(counted_statuses()))
        .select(diesel::dsl::sum(reservation_items::quantity))
        .get_result(conn)
        .await?;
    Ok(total.unwrap_or(0))
}

async fn open_pallet_row(conn: &mut AsyncPgConnection, lane: Lane) -> StoreResult<Option<DbPallet>> {
    Ok(pallets::table
        .filter(pallets::pickup_zone_id.eq(lane.pickup_zone_id))
        .filter(pallets::delivery_zone_id.eq(lane.delivery_zone_id))
        .filter(pallets::status.eq(PalletStatus::Open.as_str()))
        .first::<DbPallet>(conn)
        .await
        .optional()?)
}

async fn load_reservation(
    conn: &mut AsyncPgConnection,
    id: Uuid,
    lock: bool,
) -> StoreResult<Option<ReservationWithItems>> {
    let query = reservations::table.find(id);
    let row = if lock {
        query.for_update().first::<DbReservation>(conn).await.optional()?
    } else {
        query.first::<DbReservation>(conn).await.optional()?
    };
    let Some(row) = row else {
        return Ok(None);
    };

    let items = reservation_items::table
        .filter(reservation_items::reservation_id.eq(id))
        .order(reservation_items::id.asc())
        .load::<DbReservationItem>(conn)
        .await?;

    Ok(Some(reservation_with_items(row, items)?))
}

async fn origins_for(conn: &mut AsyncPgConnection, wine_ids: &[Uuid]) -> StoreResult<Vec<WineOrigin>> {
    let rows = wines::table
        .inner_join(producers::table)
        .filter(wines::id.eq_any(wine_ids.to_vec()))
        .select((wines::id, wines::producer_id, producers::pickup_zone_id))
        .load::<(Uuid, Uuid, Option<Uuid>)>(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(wine_id, producer_id, pickup_zone_id)| WineOrigin {
            wine_id,
            producer_id,
            pickup_zone_id,
        })
        .collect())
}

async fn insert_events(conn: &mut AsyncPgConnection, events: &[EventEnvelope]) -> StoreResult<()> {
    if events.is_empty() {
        return Ok(());
    }
    let rows = events
        .iter()
        .map(DbOutboxEvent::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    diesel::insert_into(outbox_events::table)
        .values(&rows)
        .execute(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl ReservationStore for PgStore {
    async fn zones(&self, kind: ZoneKind) -> StoreResult<Vec<Zone>> {
        let mut conn = self.conn().await?;
        zones::table
            .filter(zones::kind.eq(kind.as_str()))
            .order(zones::id.asc())
            .load::<DbZone>(&mut conn)
            .await?
            .into_iter()
            .map(Zone::try_from)
            .collect()
    }

    async fn zone(&self, id: Uuid) -> StoreResult<Option<Zone>> {
        let mut conn = self.conn().await?;
        zones::table
            .find(id)
            .first::<DbZone>(&mut conn)
            .await
            .optional()?
            .map(Zone::try_from)
            .transpose()
    }

    async fn producer_pickup_zone(&self, producer_id: Uuid) -> StoreResult<Option<Option<Uuid>>> {
        let mut conn = self.conn().await?;
        Ok(producers::table
            .find(producer_id)
            .select(producers::pickup_zone_id)
            .first::<Option<Uuid>>(&mut conn)
            .await
            .optional()?)
    }

    async fn wine_origins(&self, wine_ids: &[Uuid]) -> StoreResult<Vec<WineOrigin>> {
        let mut conn = self.conn().await?;
        origins_for(&mut conn, wine_ids).await
    }

    async fn pallet(&self, id: Uuid) -> StoreResult<Option<Pallet>> {
        let mut conn = self.conn().await?;
        pallets::table
            .find(id)
            .first::<DbPallet>(&mut conn)
            .await
            .optional()?
            .map(Pallet::try_from)
            .transpose()
    }

    async fn pallets(&self) -> StoreResult<Vec<Pallet>> {
        let mut conn = self.conn().await?;
        pallets::table
            .order(pallets::created_at.asc())
            .load::<DbPallet>(&mut conn)
            .await?
            .into_iter()
            .map(Pallet::try_from)
            .collect()
    }

    async fn open_pallet(&self, lane: Lane) -> StoreResult<Option<Pallet>> {
        let mut conn = self.conn().await?;
        open_pallet_row(&mut conn, lane)
            .await?
            .map(Pallet::try_from)
            .transpose()
    }

    async fn get_or_create_open_pallet(
        &self,
        lane: Lane,
        bottle_capacity: i32,
        at: DateTime<Utc>,
    ) -> StoreResult<Pallet> {
        let mut conn = self.conn().await?;

        for _ in 0..LANE_RESOLVE_ATTEMPTS {
            if let Some(row) = open_pallet_row(&mut conn, lane).await? {
                return row.try_into();
            }

            let candidate = DbPallet {
                id: Uuid::new_v4(),
                pickup_zone_id: lane.pickup_zone_id,
                delivery_zone_id: lane.delivery_zone_id,
                bottle_capacity,
                status: PalletStatus::Open.as_str().to_string(),
                is_complete: false,
                completed_at: None,
                payment_deadline: None,
                created_at: at,
                updated_at: at,
            };

            // The partial unique index on open lanes turns a concurrent
            // insert into a no-op; the re-read then sees the winner's row.
            diesel::insert_into(pallets::table)
                .values(&candidate)
                .on_conflict_do_nothing()
                .execute(&mut conn)
                .await?;
        }

        Err(StoreError::Corrupt(format!(
            "no open pallet settled for lane {} -> {}",
            lane.pickup_zone_id, lane.delivery_zone_id
        )))
    }

    async fn total_reserved_bottles(&self, pallet_id: Uuid) -> StoreResult<i64> {
        let mut conn = self.conn().await?;
        reserved_total(&mut conn, pallet_id).await
    }

    async fn complete_pallet(
        &self,
        pallet_id: Uuid,
        completed_at: DateTime<Utc>,
        payment_deadline: DateTime<Utc>,
    ) -> StoreResult<CompletionCommit> {
        let mut conn = self.conn().await?;

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let row = pallets::table
                    .find(pallet_id)
                    .for_update()
                    .first::<DbPallet>(conn)
                    .await
                    .optional()?;
                let Some(row) = row else {
                    return Ok(CompletionCommit::NotFound);
                };
                let pallet = Pallet::try_from(row)?;
                if pallet.is_complete {
                    return Ok(CompletionCommit::AlreadyComplete);
                }
                if pallet.status != PalletStatus::Open {
                    return Ok(CompletionCommit::NotOpen(pallet.status));
                }

                let total = reserved_total(conn, pallet_id).await?;
                if total < i64::from(pallet.bottle_capacity) {
                    return Ok(CompletionCommit::BelowCapacity { total });
                }

                let flipped = diesel::update(
                    pallets::table
                        .filter(pallets::id.eq(pallet_id))
                        .filter(pallets::is_complete.eq(false)),
                )
                .set((
                    pallets::status.eq(PalletStatus::Complete.as_str()),
                    pallets::is_complete.eq(true),
                    pallets::completed_at.eq(Some(completed_at)),
                    pallets::payment_deadline.eq(Some(payment_deadline)),
                    pallets::updated_at.eq(completed_at),
                ))
                .get_result::<DbPallet>(conn)
                .await
                .optional()?;
                let Some(flipped) = flipped else {
                    return Ok(CompletionCommit::AlreadyComplete);
                };

                let moved = diesel::update(
                    reservations::table
                        .filter(reservations::pallet_id.eq(pallet_id))
                        .filter(reservations::status.eq_any(ReservationStatus::as_strings(
                            &ReservationStatus::AWAITING_COMPLETION,
                        ))),
                )
                .set((
                    reservations::status.eq(ReservationStatus::PendingPayment.as_str()),
                    reservations::payment_status.eq(PaymentStatus::Due.as_str()),
                    reservations::payment_deadline.eq(Some(payment_deadline)),
                    reservations::updated_at.eq(completed_at),
                ))
                .get_results::<DbReservation>(conn)
                .await?
                .into_iter()
                .map(Reservation::try_from)
                .collect::<Result<Vec<_>, _>>()?;

                let events: Vec<EventEnvelope> = moved
                    .iter()
                    .map(|r| {
                        EventEnvelope::new(
                            ReservationEvent::payment_due(r, pallet_id, payment_deadline),
                            completed_at,
                        )
                    })
                    .collect();
                insert_events(conn, &events).await?;

                Ok(CompletionCommit::Completed {
                    pallet: flipped.try_into()?,
                    total,
                    moved: moved.into_iter().map(|r| r.id).collect(),
                })
            })
        })
        .await
    }

    async fn revert_pallet_completion(
        &self,
        pallet_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<RevertCommit> {
        let mut conn = self.conn().await?;

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let row = pallets::table
                    .find(pallet_id)
                    .for_update()
                    .first::<DbPallet>(conn)
                    .await
                    .optional()?;
                let Some(row) = row else {
                    return Ok(RevertCommit::NotFound);
                };
                let pallet = Pallet::try_from(row)?;
                if pallet.status != PalletStatus::Complete {
                    return Ok(RevertCommit::NotComplete(pallet.status));
                }

                let settled: i64 = reservations::table
                    .filter(reservations::pallet_id.eq(pallet_id))
                    .filter(reservations::status.eq(ReservationStatus::Confirmed.as_str()))
                    .count()
                    .get_result(conn)
                    .await?;
                if settled > 0 {
                    return Ok(RevertCommit::HasSettledReservations);
                }

                let total = reserved_total(conn, pallet_id).await?;
                if total >= i64::from(pallet.bottle_capacity) {
                    return Ok(RevertCommit::AtCapacity { total });
                }

                if let Some(open) = open_pallet_row(conn, pallet.lane()).await? {
                    return Ok(RevertCommit::LaneOccupied {
                        open_pallet_id: open.id,
                    });
                }

                let reopened_pallet = diesel::update(pallets::table.filter(pallets::id.eq(pallet_id)))
                    .set((
                        pallets::status.eq(PalletStatus::Open.as_str()),
                        pallets::is_complete.eq(false),
                        pallets::completed_at.eq(None::<DateTime<Utc>>),
                        pallets::payment_deadline.eq(None::<DateTime<Utc>>),
                        pallets::updated_at.eq(at),
                    ))
                    .get_result::<DbPallet>(conn)
                    .await?;

                let reopened = diesel::update(
                    reservations::table
                        .filter(reservations::pallet_id.eq(pallet_id))
                        .filter(reservations::status.eq(ReservationStatus::PendingPayment.as_str())),
                )
                .set((
                    reservations::status.eq(ReservationStatus::Placed.as_str()),
                    reservations::payment_status.eq(PaymentStatus::Unpaid.as_str()),
                    reservations::payment_deadline.eq(None::<DateTime<Utc>>),
                    reservations::updated_at.eq(at),
                ))
                .returning(reservations::id)
                .get_results::<Uuid>(conn)
                .await?;

                Ok(RevertCommit::Reverted {
                    pallet: reopened_pallet.try_into()?,
                    total,
                    reopened,
                })
            })
        })
        .await
    }

    async fn insert_reservation(&self, new: NewReservation) -> StoreResult<InsertCommit> {
        let mut conn = self.conn().await?;
        let target = new.pallet_id;

        let reservation_id = Uuid::new_v4();
        let row = DbReservation {
            id: reservation_id,
            user_id: new.user_id,
            customer_email: new.customer_email,
            delivery_address: new.delivery_address,
            pallet_id: new.pallet_id,
            pickup_zone_id: new.pickup_zone_id,
            delivery_zone_id: new.delivery_zone_id,
            status: ReservationStatus::Placed.as_str().to_string(),
            payment_status: PaymentStatus::Unpaid.as_str().to_string(),
            payment_deadline: None,
            zone_issue: new.zone_issue.map(|i| i.as_str().to_string()),
            producer_approved_at: None,
            producer_rejected_at: None,
            decided_by_producer_id: None,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        let items: Vec<DbReservationItem> = new
            .items
            .iter()
            .map(|item| DbReservationItem {
                id: Uuid::new_v4(),
                reservation_id,
                wine_id: item.wine_id,
                quantity: item.quantity,
                decision_status: DecisionStatus::Pending.as_str().to_string(),
                approved_quantity: 0,
            })
            .collect();

        let inserted = conn
            .transaction::<_, StoreError, _>(|conn| {
                Box::pin(async move {
                    // Completion locks the same row, so the pallet cannot
                    // flip between this check and the insert.
                    if let Some(pallet_id) = target {
                        let status = pallets::table
                            .find(pallet_id)
                            .select(pallets::status)
                            .for_update()
                            .first::<String>(conn)
                            .await
                            .optional()?;
                        if status.as_deref() != Some(PalletStatus::Open.as_str()) {
                            return Ok(Err(pallet_id));
                        }
                    }
                    diesel::insert_into(reservations::table)
                        .values(&row)
                        .execute(conn)
                        .await?;
                    diesel::insert_into(reservation_items::table)
                        .values(&items)
                        .execute(conn)
                        .await?;
                    Ok(Ok((row, items)))
                })
            })
            .await?;

        match inserted {
            Ok((row, items)) => Ok(InsertCommit::Inserted(reservation_with_items(row, items)?)),
            Err(pallet_id) => Ok(InsertCommit::PalletClosed { pallet_id }),
        }
    }

    async fn reservation(&self, id: Uuid) -> StoreResult<Option<ReservationWithItems>> {
        let mut conn = self.conn().await?;
        load_reservation(&mut conn, id, false).await
    }

    async fn apply_decisions(
        &self,
        reservation_id: Uuid,
        deciding_producer: Option<Uuid>,
        decisions: &[ItemDecision],
        at: DateTime<Utc>,
    ) -> StoreResult<DecisionCommit> {
        let mut conn = self.conn().await?;
        let decisions = decisions.to_vec();

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let Some(current) = load_reservation(conn, reservation_id, true).await? else {
                    return Ok(DecisionCommit::NotFound);
                };
                let previous_status = current.reservation.status;
                if !previous_status.accepts_decisions() {
                    return Ok(DecisionCommit::NotDecidable(previous_status));
                }

                let wine_ids: Vec<Uuid> = current.items.iter().map(|i| i.wine_id).collect();
                let origins: HashMap<Uuid, WineOrigin> = origins_for(conn, &wine_ids)
                    .await?
                    .into_iter()
                    .map(|o| (o.wine_id, o))
                    .collect();

                let decided = match decide_reservation(&current, &origins, deciding_producer, &decisions, at) {
                    Ok(decided) => decided,
                    Err(violation) => return Ok(DecisionCommit::Rejected(violation)),
                };

                for update in &decided.updates {
                    diesel::update(reservation_items::table.find(update.item_id))
                        .set((
                            reservation_items::decision_status.eq(update.decision_status.as_str()),
                            reservation_items::approved_quantity.eq(update.approved_quantity),
                        ))
                        .execute(conn)
                        .await?;
                }

                let next = &decided.next.reservation;
                diesel::update(reservations::table.find(reservation_id))
                    .set((
                        reservations::status.eq(next.status.as_str()),
                        reservations::producer_approved_at.eq(next.producer_approved_at),
                        reservations::producer_rejected_at.eq(next.producer_rejected_at),
                        reservations::decided_by_producer_id.eq(next.decided_by_producer_id),
                        reservations::updated_at.eq(next.updated_at),
                    ))
                    .execute(conn)
                    .await?;

                if let Some(event) = &decided.event {
                    insert_events(conn, std::slice::from_ref(event)).await?;
                }

                Ok(DecisionCommit::Applied {
                    reservation: decided.next,
                    outcome: decided.outcome,
                    previous_status,
                })
            })
        })
        .await
    }

    async fn transition_reservation(
        &self,
        reservation_id: Uuid,
        transition: Transition,
    ) -> StoreResult<TransitionCommit> {
        let mut conn = self.conn().await?;

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let row = reservations::table
                    .find(reservation_id)
                    .for_update()
                    .first::<DbReservation>(conn)
                    .await
                    .optional()?;
                let Some(row) = row else {
                    return Ok(TransitionCommit::NotFound);
                };
                let current = Reservation::try_from(row)?;
                if !transition.from.contains(&current.status) {
                    return Ok(TransitionCommit::Rejected(current.status));
                }

                let payment_status = transition.payment_status.unwrap_or(current.payment_status);
                let updated = diesel::update(reservations::table.find(reservation_id))
                    .set((
                        reservations::status.eq(transition.to.as_str()),
                        reservations::payment_status.eq(payment_status.as_str()),
                        reservations::updated_at.eq(transition.at),
                    ))
                    .get_result::<DbReservation>(conn)
                    .await?;

                Ok(TransitionCommit::Applied(updated.try_into()?))
            })
        })
        .await
    }

    async fn active_reservation_ids(&self) -> StoreResult<Vec<Uuid>> {
        let mut conn = self.conn().await?;
        Ok(reservations::table
            .filter(reservations::status.eq_any(counted_statuses()))
            .order(reservations::created_at.asc())
            .select(reservations::id)
            .load::<Uuid>(&mut conn)
            .await?)
    }

    async fn reassign_reservation(
        &self,
        reservation_id: Uuid,
        reassignment: Reassignment,
    ) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let Reassignment {
            expected,
            next,
            zone_issue,
            at,
        } = reassignment;

        let updated = diesel::update(
            reservations::table
                .filter(reservations::id.eq(reservation_id))
                .filter(reservations::status.eq_any(counted_statuses()))
                .filter(reservations::pickup_zone_id.is_not_distinct_from(expected.pickup_zone_id))
                .filter(reservations::pallet_id.is_not_distinct_from(expected.pallet_id)),
        )
        .set((
            reservations::pickup_zone_id.eq(next.pickup_zone_id),
            reservations::pallet_id.eq(next.pallet_id),
            reservations::zone_issue.eq(zone_issue.map(|i| i.as_str().to_string())),
            reservations::updated_at.eq(at),
        ))
        .execute(&mut conn)
        .await?;

        Ok(updated == 1)
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<Reservation>> {
        let mut conn = self.conn().await?;

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let released = diesel::update(
                    reservations::table
                        .filter(reservations::status.eq(ReservationStatus::PendingPayment.as_str()))
                        .filter(reservations::payment_deadline.lt(now)),
                )
                .set((
                    reservations::status.eq(ReservationStatus::Released.as_str()),
                    reservations::payment_status.eq(PaymentStatus::Expired.as_str()),
                    reservations::updated_at.eq(now),
                ))
                .get_results::<DbReservation>(conn)
                .await?
                .into_iter()
                .map(Reservation::try_from)
                .collect::<Result<Vec<_>, _>>()?;

                let events: Vec<EventEnvelope> = released
                    .iter()
                    .map(|r| EventEnvelope::new(ReservationEvent::payment_released(r), now))
                    .collect();
                insert_events(conn, &events).await?;

                Ok(released)
            })
        })
        .await
    }

    async fn flagged_reservations(&self) -> StoreResult<Vec<Reservation>> {
        let mut conn = self.conn().await?;
        reservations::table
            .filter(reservations::status.eq_any(counted_statuses()))
            .filter(reservations::zone_issue.is_not_null())
            .order(reservations::created_at.asc())
            .load::<DbReservation>(&mut conn)
            .await?
            .into_iter()
            .map(Reservation::try_from)
            .collect()
    }

    async fn unprocessed_events(&self, limit: i64) -> StoreResult<Vec<EventEnvelope>> {
        let mut conn = self.conn().await?;
        outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .load::<DbOutboxEvent>(&mut conn)
            .await?
            .into_iter()
            .map(EventEnvelope::try_from)
            .collect()
    }

    async fn mark_event_processed(&self, id: Uuid) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        diesel::update(outbox_events::table.filter(outbox_events::id.eq(id)))
            .set(outbox_events::processed.eq(true))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}
