use serde::Serialize;
use shared::{DecisionOutcome, ItemDecision, ReservationStatus, ReservationWithItems};
use shared::clock::Clock;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::actor::Actor;
use crate::completion::{CompletionOutcome, CompletionTrigger};
use crate::error::{EngineError, EngineResult};
use crate::store::{DecisionCommit, ReservationStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionReport {
    pub reservation: ReservationWithItems,
    pub outcome: DecisionOutcome,
    pub previous_status: ReservationStatus,
    pub completion: Option<CompletionOutcome>,
}

pub struct DecisionWorkflow {
    store: Arc<dyn ReservationStore>,
    completion: Arc<CompletionTrigger>,
    clock: Arc<dyn Clock>,
}

impl DecisionWorkflow {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        completion: Arc<CompletionTrigger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            completion,
            clock,
        }
    }

    /// Applies a producer's decision batch. The whole batch is validated
    /// before any item changes; the reservation status is then derived from
    /// the full set of item rows.
    pub async fn decide(
        &self,
        actor: &Actor,
        reservation_id: Uuid,
        decisions: &[ItemDecision],
    ) -> EngineResult<DecisionReport> {
        let deciding_producer = actor.deciding_producer()?;

        let commit = self
            .store
            .apply_decisions(reservation_id, deciding_producer, decisions, self.clock.now())
            .await?;

        let (reservation, outcome, previous_status) = match commit {
            DecisionCommit::Applied {
                reservation,
                outcome,
                previous_status,
            } => (reservation, outcome, previous_status),
            DecisionCommit::Rejected(violation) => return Err(violation.into()),
            DecisionCommit::NotDecidable(status) => {
                return Err(EngineError::validation(format!(
                    "reservation {reservation_id} is {status} and no longer accepts decisions"
                )))
            }
            DecisionCommit::NotFound => return Err(EngineError::not_found("reservation", reservation_id)),
        };

        info!(
            reservation_id = %reservation_id,
            producer_id = ?deciding_producer,
            "{} decisions applied, {} -> {} ({:?})",
            decisions.len(),
            previous_status,
            reservation.reservation.status,
            outcome
        );

        // A decline drops the reservation out of the pallet total; every
        // other outcome leaves it counted. Either way the pallet is re-evaluated.
        let completion = match reservation.reservation.pallet_id {
            Some(pallet_id) => Some(self.completion.evaluate(pallet_id).await?),
            None => None,
        };

        Ok(DecisionReport {
            reservation,
            outcome,
            previous_status,
            completion,
        })
    }
}
