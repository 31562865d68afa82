use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("unknown {kind} value: {value}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a string-backed enum that round-trips through the `varchar`
/// columns the services persist.
macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseStatusError { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

string_enum!(ZoneKind, "zone kind", {
    Pickup => "pickup",
    Delivery => "delivery",
});

string_enum!(PalletStatus, "pallet status", {
    Open => "open",
    Complete => "complete",
    Shipped => "shipped",
    Cancelled => "cancelled",
});

string_enum!(ReservationStatus, "reservation status", {
    Placed => "placed",
    Approved => "approved",
    PartlyApproved => "partly_approved",
    Declined => "declined",
    PendingPayment => "pending_payment",
    Confirmed => "confirmed",
    Released => "released",
    Cancelled => "cancelled",
});

string_enum!(PaymentStatus, "payment status", {
    Unpaid => "unpaid",
    Due => "due",
    Paid => "paid",
    Expired => "expired",
});

string_enum!(DecisionStatus, "decision status", {
    Pending => "pending",
    Approved => "approved",
    Declined => "declined",
});

string_enum!(ZoneIssue, "zone issue", {
    NoPickupZone => "no_pickup_zone",
    MultiplePickupZones => "multiple_pickup_zones",
    NoDeliveryZone => "no_delivery_zone",
    GeocodingFailed => "geocoding_failed",
    NoOpenPallet => "no_open_pallet",
});

impl PalletStatus {
    /// `is_complete` must mirror this for every stored pallet.
    pub fn implies_complete(&self) -> bool {
        matches!(self, Self::Complete | Self::Shipped)
    }
}

impl ReservationStatus {
    /// Statuses whose item quantities occupy pallet capacity.
    pub const COUNTED: [ReservationStatus; 5] = [
        Self::Placed,
        Self::Approved,
        Self::PartlyApproved,
        Self::PendingPayment,
        Self::Confirmed,
    ];

    /// Statuses moved to `pending_payment` when their pallet completes.
    pub const AWAITING_COMPLETION: [ReservationStatus; 4] = [
        Self::Placed,
        Self::Approved,
        Self::PartlyApproved,
        Self::PendingPayment,
    ];

    pub fn counts_toward_capacity(&self) -> bool {
        Self::COUNTED.contains(self)
    }

    /// Active reservations are the ones the repair job reconciles.
    pub fn is_active(&self) -> bool {
        self.counts_toward_capacity()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Declined | Self::Confirmed | Self::Released | Self::Cancelled
        )
    }

    pub fn awaits_completion(&self) -> bool {
        Self::AWAITING_COMPLETION.contains(self)
    }

    pub fn accepts_decisions(&self) -> bool {
        matches!(
            self,
            Self::Placed | Self::Approved | Self::PartlyApproved | Self::PendingPayment
        )
    }

    pub fn as_strings(statuses: &[ReservationStatus]) -> Vec<String> {
        statuses.iter().map(|s| s.as_str().to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: Uuid,
    pub name: String,
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_km: f64,
    pub kind: ZoneKind,
    pub country_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Producer {
    pub id: Uuid,
    pub name: String,
    pub pickup_zone_id: Option<Uuid>,
}

/// A wine together with the producer and pickup zone it currently maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WineOrigin {
    pub wine_id: Uuid,
    pub producer_id: Uuid,
    pub pickup_zone_id: Option<Uuid>,
}

/// The logistics route a pallet serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lane {
    pub pickup_zone_id: Uuid,
    pub delivery_zone_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pallet {
    pub id: Uuid,
    pub pickup_zone_id: Uuid,
    pub delivery_zone_id: Uuid,
    pub bottle_capacity: i32,
    pub status: PalletStatus,
    pub is_complete: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub payment_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Pallet {
    pub fn lane(&self) -> Lane {
        Lane {
            pickup_zone_id: self.pickup_zone_id,
            delivery_zone_id: self.delivery_zone_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub customer_email: String,
    pub delivery_address: String,
    pub pallet_id: Option<Uuid>,
    pub pickup_zone_id: Option<Uuid>,
    pub delivery_zone_id: Option<Uuid>,
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub payment_deadline: Option<DateTime<Utc>>,
    pub zone_issue: Option<ZoneIssue>,
    pub producer_approved_at: Option<DateTime<Utc>>,
    pub producer_rejected_at: Option<DateTime<Utc>>,
    pub decided_by_producer_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn assignment(&self) -> Assignment {
        Assignment {
            pickup_zone_id: self.pickup_zone_id,
            pallet_id: self.pallet_id,
        }
    }
}

/// The pair of fields the repair job reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub pickup_zone_id: Option<Uuid>,
    pub pallet_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationItem {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub wine_id: Uuid,
    pub quantity: i32,
    pub decision_status: DecisionStatus,
    pub approved_quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationWithItems {
    pub reservation: Reservation,
    pub items: Vec<ReservationItem>,
}

impl ReservationWithItems {
    pub fn requested_bottles(&self) -> i64 {
        self.items.iter().map(|i| i64::from(i.quantity)).sum()
    }

    pub fn approved_bottles(&self) -> i64 {
        self.items.iter().map(|i| i64::from(i.approved_quantity)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_round_trip_through_storage_strings() {
        for status in [
            ReservationStatus::Placed,
            ReservationStatus::PartlyApproved,
            ReservationStatus::PendingPayment,
            ReservationStatus::Released,
        ] {
            assert_eq!(status.as_str().parse::<ReservationStatus>(), Ok(status));
        }
        assert!("shipping".parse::<PalletStatus>().is_err());
    }

    #[test]
    fn declined_and_cancelled_do_not_occupy_capacity() {
        assert!(!ReservationStatus::Declined.counts_toward_capacity());
        assert!(!ReservationStatus::Cancelled.counts_toward_capacity());
        assert!(!ReservationStatus::Released.counts_toward_capacity());
        assert!(ReservationStatus::Confirmed.counts_toward_capacity());
    }

    #[test]
    fn confirmed_is_counted_but_never_moved_by_completion() {
        assert!(ReservationStatus::Confirmed.is_terminal());
        assert!(!ReservationStatus::Confirmed.awaits_completion());
        assert!(ReservationStatus::Approved.awaits_completion());
    }

    #[test]
    fn only_complete_and_shipped_pallets_are_complete() {
        assert!(PalletStatus::Complete.implies_complete());
        assert!(PalletStatus::Shipped.implies_complete());
        assert!(!PalletStatus::Open.implies_complete());
        assert!(!PalletStatus::Cancelled.implies_complete());
    }
}
