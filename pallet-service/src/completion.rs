use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{Pallet, PalletStatus};
use shared::clock::Clock;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actor::Actor;
use crate::capacity::PalletFill;
use crate::error::{EngineError, EngineResult};
use crate::store::{CompletionCommit, ReservationStore, RevertCommit};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompletionOutcome {
    /// This evaluation flipped the pallet and queued the side effects.
    Completed {
        pallet_id: Uuid,
        total: i64,
        payment_deadline: DateTime<Utc>,
        moved: Vec<Uuid>,
    },
    /// Completed earlier, possibly by a concurrent evaluation. Nothing is
    /// dispatched again.
    AlreadyComplete,
    BelowCapacity { fill: PalletFill },
    NotOpen { status: PalletStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CheckAction {
    Completed { moved: usize },
    Reverted { reopened: usize },
    Unchanged,
    Skipped { reason: String },
}

/// One line of the operator re-check report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PalletCheck {
    pub pallet_id: Uuid,
    /// `None` when the pallet's totals could not be read.
    pub fill: Option<PalletFill>,
    pub action: CheckAction,
}

pub struct CompletionTrigger {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    payment_window: chrono::Duration,
}

impl CompletionTrigger {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        payment_window: chrono::Duration,
    ) -> Self {
        Self {
            store,
            clock,
            payment_window,
        }
    }

    /// Completes the pallet once it reaches capacity. Safe to call after
    /// every reservation mutation and from any number of callers at once.
    pub async fn evaluate(&self, pallet_id: Uuid) -> EngineResult<CompletionOutcome> {
        let pallet = self
            .store
            .pallet(pallet_id)
            .await?
            .ok_or_else(|| EngineError::not_found("pallet", pallet_id))?;
        if pallet.is_complete {
            return Ok(CompletionOutcome::AlreadyComplete);
        }
        if pallet.status != PalletStatus::Open {
            return Ok(CompletionOutcome::NotOpen {
                status: pallet.status,
            });
        }

        let total = self.store.total_reserved_bottles(pallet_id).await?;
        let fill = PalletFill::new(pallet_id, total, pallet.bottle_capacity);
        if !fill.is_full() {
            return Ok(CompletionOutcome::BelowCapacity { fill });
        }

        self.commit_completion(&pallet).await
    }

    async fn commit_completion(&self, pallet: &Pallet) -> EngineResult<CompletionOutcome> {
        let now = self.clock.now();
        let deadline = now + self.payment_window;

        match self.store.complete_pallet(pallet.id, now, deadline).await? {
            CompletionCommit::Completed { pallet, total, moved } => {
                info!(
                    pallet_id = %pallet.id,
                    total,
                    capacity = pallet.bottle_capacity,
                    "pallet complete, {} reservations awaiting payment until {}",
                    moved.len(),
                    deadline
                );
                Ok(CompletionOutcome::Completed {
                    pallet_id: pallet.id,
                    total,
                    payment_deadline: deadline,
                    moved,
                })
            }
            CompletionCommit::AlreadyComplete => {
                debug!(pallet_id = %pallet.id, "completion already committed by another caller");
                Ok(CompletionOutcome::AlreadyComplete)
            }
            CompletionCommit::BelowCapacity { total } => Ok(CompletionOutcome::BelowCapacity {
                fill: PalletFill::new(pallet.id, total, pallet.bottle_capacity),
            }),
            CompletionCommit::NotOpen(status) => Ok(CompletionOutcome::NotOpen { status }),
            CompletionCommit::NotFound => Err(EngineError::not_found("pallet", pallet.id)),
        }
    }

    /// Operator re-check over every pallet: completes full open pallets and
    /// reopens complete pallets that fell below capacity.
    pub async fn recheck_pallets(&self, actor: &Actor) -> EngineResult<Vec<PalletCheck>> {
        actor.require_admin("re-checking pallets")?;

        let pallets = self.store.pallets().await?;
        let mut report = Vec::with_capacity(pallets.len());
        for pallet in pallets {
            let check = match self.recheck(&pallet).await {
                Ok(check) => check,
                Err(e) => {
                    warn!(pallet_id = %pallet.id, "re-check failed: {}", e);
                    PalletCheck {
                        pallet_id: pallet.id,
                        fill: None,
                        action: CheckAction::Skipped {
                            reason: e.to_string(),
                        },
                    }
                }
            };
            report.push(check);
        }
        Ok(report)
    }

    async fn recheck(&self, pallet: &Pallet) -> EngineResult<PalletCheck> {
        let total = self.store.total_reserved_bottles(pallet.id).await?;
        let fill = PalletFill::new(pallet.id, total, pallet.bottle_capacity);
        let check = |fill: PalletFill, action: CheckAction| PalletCheck {
            pallet_id: pallet.id,
            fill: Some(fill),
            action,
        };

        match pallet.status {
            PalletStatus::Open if fill.is_full() => match self.commit_completion(pallet).await? {
                CompletionOutcome::Completed { moved, total, .. } => Ok(check(
                    PalletFill::new(pallet.id, total, pallet.bottle_capacity),
                    CheckAction::Completed { moved: moved.len() },
                )),
                CompletionOutcome::BelowCapacity { fill } => Ok(check(fill, CheckAction::Unchanged)),
                _ => Ok(check(fill, CheckAction::Unchanged)),
            },
            PalletStatus::Open => Ok(check(fill, CheckAction::Unchanged)),
            PalletStatus::Complete if !fill.is_full() => self.revert(pallet, fill).await,
            PalletStatus::Complete => Ok(check(fill, CheckAction::Unchanged)),
            PalletStatus::Shipped | PalletStatus::Cancelled => Ok(check(
                fill,
                CheckAction::Skipped {
                    reason: format!("pallet is {}", pallet.status),
                },
            )),
        }
    }

    async fn revert(&self, pallet: &Pallet, fill: PalletFill) -> EngineResult<PalletCheck> {
        let skipped = |reason: String| CheckAction::Skipped { reason };
        let (fill, action) = match self
            .store
            .revert_pallet_completion(pallet.id, self.clock.now())
            .await?
        {
            RevertCommit::Reverted { total, reopened, .. } => {
                info!(
                    pallet_id = %pallet.id,
                    total,
                    capacity = pallet.bottle_capacity,
                    "pallet fell below capacity, reopened with {} reservations back to placed",
                    reopened.len()
                );
                (
                    PalletFill::new(pallet.id, total, pallet.bottle_capacity),
                    CheckAction::Reverted {
                        reopened: reopened.len(),
                    },
                )
            }
            RevertCommit::AtCapacity { total } => (
                PalletFill::new(pallet.id, total, pallet.bottle_capacity),
                CheckAction::Unchanged,
            ),
            RevertCommit::HasSettledReservations => {
                warn!(pallet_id = %pallet.id, "pallet below capacity but holds confirmed reservations");
                (fill, skipped("pallet holds confirmed reservations".to_string()))
            }
            RevertCommit::LaneOccupied { open_pallet_id } => (
                fill,
                skipped(format!("lane already served by open pallet {open_pallet_id}")),
            ),
            RevertCommit::NotComplete(status) => (fill, skipped(format!("pallet is {status}"))),
            RevertCommit::NotFound => return Err(EngineError::not_found("pallet", pallet.id)),
        };

        Ok(PalletCheck {
            pallet_id: pallet.id,
            fill: Some(fill),
            action,
        })
    }
}
