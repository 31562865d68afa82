//! Pure rules shared by every store implementation. Nothing here touches
//! I/O; callers feed in the rows they read inside their own transaction.

use crate::model::{
    DecisionStatus, ReservationItem, ReservationStatus, WineOrigin,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

pub const DEFAULT_PAYMENT_WINDOW_DAYS: i64 = 7;

/// Fill level of a pallet in whole percent, capped at 100.
pub fn fill_percentage(total: i64, capacity: i32) -> u8 {
    if capacity <= 0 {
        return 0;
    }
    let pct = (total.max(0) as f64 / f64::from(capacity) * 100.0).round();
    pct.min(100.0) as u8
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PickupZoneResolution {
    Single { zone_id: Uuid },
    Ambiguous { zone_ids: Vec<Uuid> },
    Unresolved,
}

impl PickupZoneResolution {
    pub fn zone_id(&self) -> Option<Uuid> {
        match self {
            Self::Single { zone_id } => Some(*zone_id),
            _ => None,
        }
    }
}

/// Derives the single pickup zone a set of wines ships from.
///
/// Only wines whose producer has a zone take part: one distinct zone
/// resolves, several are ambiguous, none leaves the set unresolved.
pub fn resolve_pickup_zone<I>(zones: I) -> PickupZoneResolution
where
    I: IntoIterator<Item = Option<Uuid>>,
{
    let distinct: Vec<Uuid> = zones
        .into_iter()
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    match distinct.len() {
        0 => PickupZoneResolution::Unresolved,
        1 => PickupZoneResolution::Single { zone_id: distinct[0] },
        _ => PickupZoneResolution::Ambiguous { zone_ids: distinct },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDecision {
    pub item_id: Uuid,
    pub decision: Decision,
    #[serde(default)]
    pub approved_quantity: i32,
}

/// The item-level change a validated decision produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemUpdate {
    pub item_id: Uuid,
    pub decision_status: DecisionStatus,
    pub approved_quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{reason}")]
pub struct DecisionViolation {
    pub item_id: Option<Uuid>,
    pub reason: String,
}

impl DecisionViolation {
    fn item(item_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            item_id: Some(item_id),
            reason: reason.into(),
        }
    }
}

/// Validates a whole decision batch against the reservation's current items.
///
/// `deciding_producer` is `None` for an admin acting on any item; otherwise
/// every item must belong to a wine of that producer. The first violation
/// rejects the batch.
pub fn validate_decisions(
    items: &[ReservationItem],
    origins: &HashMap<Uuid, WineOrigin>,
    deciding_producer: Option<Uuid>,
    decisions: &[ItemDecision],
) -> Result<Vec<ItemUpdate>, DecisionViolation> {
    if decisions.is_empty() {
        return Err(DecisionViolation {
            item_id: None,
            reason: "no decisions supplied".to_string(),
        });
    }

    let by_id: HashMap<Uuid, &ReservationItem> = items.iter().map(|i| (i.id, i)).collect();
    let mut seen = BTreeSet::new();
    let mut updates = Vec::with_capacity(decisions.len());

    for d in decisions {
        if !seen.insert(d.item_id) {
            return Err(DecisionViolation::item(d.item_id, "item decided twice in one batch"));
        }
        let item = by_id
            .get(&d.item_id)
            .ok_or_else(|| DecisionViolation::item(d.item_id, "item does not belong to this reservation"))?;

        if let Some(producer_id) = deciding_producer {
            let owner = origins.get(&item.wine_id).map(|o| o.producer_id);
            if owner != Some(producer_id) {
                return Err(DecisionViolation::item(d.item_id, "item belongs to another producer"));
            }
        }

        let update = match d.decision {
            Decision::Declined => ItemUpdate {
                item_id: d.item_id,
                decision_status: DecisionStatus::Declined,
                approved_quantity: 0,
            },
            Decision::Approved => {
                if d.approved_quantity < 0 || d.approved_quantity > item.quantity {
                    return Err(DecisionViolation::item(
                        d.item_id,
                        format!(
                            "approved quantity {} outside 0..={}",
                            d.approved_quantity, item.quantity
                        ),
                    ));
                }
                ItemUpdate {
                    item_id: d.item_id,
                    decision_status: DecisionStatus::Approved,
                    approved_quantity: d.approved_quantity,
                }
            }
        };
        updates.push(update);
    }

    Ok(updates)
}

/// Applies validated updates to a copy of the items.
pub fn apply_updates(items: &[ReservationItem], updates: &[ItemUpdate]) -> Vec<ReservationItem> {
    let by_id: HashMap<Uuid, &ItemUpdate> = updates.iter().map(|u| (u.item_id, u)).collect();
    items
        .iter()
        .map(|item| match by_id.get(&item.id) {
            Some(u) => ReservationItem {
                decision_status: u.decision_status,
                approved_quantity: u.approved_quantity,
                ..item.clone()
            },
            None => item.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Undecided,
    Declined,
    Approved,
    PartlyApproved,
}

/// Derives the producer outcome from scratch over the current item rows.
pub fn aggregate_decisions(items: &[ReservationItem]) -> DecisionOutcome {
    if items.is_empty()
        || items
            .iter()
            .any(|i| i.decision_status == DecisionStatus::Pending)
    {
        return DecisionOutcome::Undecided;
    }

    let requested: i64 = items.iter().map(|i| i64::from(i.quantity)).sum();
    let approved: i64 = items.iter().map(|i| i64::from(i.approved_quantity)).sum();

    if approved == 0 {
        DecisionOutcome::Declined
    } else if approved == requested {
        DecisionOutcome::Approved
    } else {
        DecisionOutcome::PartlyApproved
    }
}

/// Status a reservation moves to once the outcome is known.
///
/// An undecided batch never moves the status. A reservation already awaiting
/// payment keeps that status unless the producers declined everything.
pub fn status_after_decisions(
    current: ReservationStatus,
    outcome: DecisionOutcome,
) -> ReservationStatus {
    match (current, outcome) {
        (_, DecisionOutcome::Undecided) => current,
        (ReservationStatus::PendingPayment, DecisionOutcome::Declined) => ReservationStatus::Declined,
        (ReservationStatus::PendingPayment, _) => ReservationStatus::PendingPayment,
        (_, DecisionOutcome::Declined) => ReservationStatus::Declined,
        (_, DecisionOutcome::Approved) => ReservationStatus::Approved,
        (_, DecisionOutcome::PartlyApproved) => ReservationStatus::PartlyApproved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u128, wine: u128, quantity: i32) -> ReservationItem {
        ReservationItem {
            id: Uuid::from_u128(id),
            reservation_id: Uuid::from_u128(1000),
            wine_id: Uuid::from_u128(wine),
            quantity,
            decision_status: DecisionStatus::Pending,
            approved_quantity: 0,
        }
    }

    fn origins(pairs: &[(u128, u128)]) -> HashMap<Uuid, WineOrigin> {
        pairs
            .iter()
            .map(|(wine, producer)| {
                (
                    Uuid::from_u128(*wine),
                    WineOrigin {
                        wine_id: Uuid::from_u128(*wine),
                        producer_id: Uuid::from_u128(*producer),
                        pickup_zone_id: None,
                    },
                )
            })
            .collect()
    }

    fn approve(id: u128, qty: i32) -> ItemDecision {
        ItemDecision {
            item_id: Uuid::from_u128(id),
            decision: Decision::Approved,
            approved_quantity: qty,
        }
    }

    fn decline(id: u128) -> ItemDecision {
        ItemDecision {
            item_id: Uuid::from_u128(id),
            decision: Decision::Declined,
            approved_quantity: 12,
        }
    }

    #[test]
    fn zero_capacity_reports_zero_percent() {
        assert_eq!(fill_percentage(50, 0), 0);
    }

    #[test]
    fn percentage_rounds_and_caps() {
        assert_eq!(fill_percentage(299, 600), 50);
        assert_eq!(fill_percentage(3, 600), 1);
        assert_eq!(fill_percentage(900, 600), 100);
        assert_eq!(fill_percentage(0, 600), 0);
    }

    #[test]
    fn two_distinct_pickup_zones_are_ambiguous() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        assert_eq!(
            resolve_pickup_zone([Some(a), Some(b), Some(a)]),
            PickupZoneResolution::Ambiguous { zone_ids: vec![a, b] }
        );
        assert_eq!(
            resolve_pickup_zone([Some(a), None, Some(b)]),
            PickupZoneResolution::Ambiguous { zone_ids: vec![a, b] }
        );
    }

    #[test]
    fn only_known_pickup_zones_are_counted() {
        let a = Uuid::from_u128(1);
        assert_eq!(
            resolve_pickup_zone([Some(a), None]),
            PickupZoneResolution::Single { zone_id: a }
        );
        assert_eq!(resolve_pickup_zone([None, None]), PickupZoneResolution::Unresolved);
        assert_eq!(resolve_pickup_zone(Vec::new()), PickupZoneResolution::Unresolved);
        assert_eq!(
            resolve_pickup_zone([Some(a), Some(a)]),
            PickupZoneResolution::Single { zone_id: a }
        );
    }

    #[test]
    fn decline_forces_zero_approved_quantity() {
        let items = vec![item(1, 10, 6)];
        let updates = validate_decisions(&items, &origins(&[(10, 50)]), None, &[decline(1)]).unwrap();
        assert_eq!(updates[0].decision_status, DecisionStatus::Declined);
        assert_eq!(updates[0].approved_quantity, 0);
    }

    #[test]
    fn over_approval_names_the_offending_item() {
        let items = vec![item(1, 10, 6), item(2, 10, 6)];
        let err = validate_decisions(&items, &origins(&[(10, 50)]), None, &[approve(1, 6), approve(2, 7)]).unwrap_err();
        assert_eq!(err.item_id, Some(Uuid::from_u128(2)));
    }

    #[test]
    fn negative_and_unknown_items_are_rejected() {
        let items = vec![item(1, 10, 6)];
        let o = origins(&[(10, 50)]);
        assert!(validate_decisions(&items, &o, None, &[approve(1, -1)]).is_err());
        let err = validate_decisions(&items, &o, None, &[approve(3, 1)]).unwrap_err();
        assert_eq!(err.item_id, Some(Uuid::from_u128(3)));
        assert!(validate_decisions(&items, &o, None, &[]).is_err());
        assert!(validate_decisions(&items, &o, None, &[approve(1, 1), decline(1)]).is_err());
    }

    #[test]
    fn producer_may_only_decide_own_items() {
        let items = vec![item(1, 10, 6), item(2, 20, 6)];
        let o = origins(&[(10, 50), (20, 60)]);
        assert!(validate_decisions(&items, &o, Some(Uuid::from_u128(50)), &[approve(1, 6)]).is_ok());
        let err = validate_decisions(&items, &o, Some(Uuid::from_u128(50)), &[approve(2, 6)]).unwrap_err();
        assert_eq!(err.item_id, Some(Uuid::from_u128(2)));
    }

    #[test]
    fn aggregation_waits_for_every_item() {
        let items = vec![item(1, 10, 6), item(2, 10, 6)];
        let partial = apply_updates(
            &items,
            &validate_decisions(&items, &origins(&[(10, 50)]), None, &[approve(1, 6)]).unwrap(),
        );
        assert_eq!(aggregate_decisions(&partial), DecisionOutcome::Undecided);
        assert_eq!(
            status_after_decisions(ReservationStatus::Placed, DecisionOutcome::Undecided),
            ReservationStatus::Placed
        );
    }

    #[test]
    fn aggregation_covers_all_outcomes() {
        let o = origins(&[(10, 50)]);
        let items = vec![item(1, 10, 6), item(2, 10, 6)];
        let run = |ds: &[ItemDecision]| {
            aggregate_decisions(&apply_updates(&items, &validate_decisions(&items, &o, None, ds).unwrap()))
        };
        assert_eq!(run(&[decline(1), decline(2)]), DecisionOutcome::Declined);
        assert_eq!(run(&[approve(1, 0), decline(2)]), DecisionOutcome::Declined);
        assert_eq!(run(&[approve(1, 6), approve(2, 6)]), DecisionOutcome::Approved);
        assert_eq!(run(&[approve(1, 6), decline(2)]), DecisionOutcome::PartlyApproved);
        assert_eq!(run(&[approve(1, 3), approve(2, 6)]), DecisionOutcome::PartlyApproved);
    }

    #[test]
    fn aggregation_is_order_independent() {
        let o = origins(&[(10, 50)]);
        let items = vec![item(1, 10, 6), item(2, 10, 6)];

        let a_then_b = {
            let s1 = apply_updates(&items, &validate_decisions(&items, &o, None, &[approve(1, 4)]).unwrap());
            apply_updates(&s1, &validate_decisions(&s1, &o, None, &[decline(2)]).unwrap())
        };
        let b_then_a = {
            let s1 = apply_updates(&items, &validate_decisions(&items, &o, None, &[decline(2)]).unwrap());
            apply_updates(&s1, &validate_decisions(&s1, &o, None, &[approve(1, 4)]).unwrap())
        };

        assert_eq!(a_then_b, b_then_a);
        assert_eq!(aggregate_decisions(&a_then_b), DecisionOutcome::PartlyApproved);
    }

    #[test]
    fn awaiting_payment_only_leaves_on_full_decline() {
        assert_eq!(
            status_after_decisions(ReservationStatus::PendingPayment, DecisionOutcome::PartlyApproved),
            ReservationStatus::PendingPayment
        );
        assert_eq!(
            status_after_decisions(ReservationStatus::PendingPayment, DecisionOutcome::Declined),
            ReservationStatus::Declined
        );
        assert_eq!(
            status_after_decisions(ReservationStatus::Approved, DecisionOutcome::PartlyApproved),
            ReservationStatus::PartlyApproved
        );
    }
}
