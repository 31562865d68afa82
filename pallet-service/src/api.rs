use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use shared::{ItemDecision, Pallet, Reservation, ReservationWithItems};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::actor::Actor;
use crate::capacity::PalletFill;
use crate::completion::PalletCheck;
use crate::decisions::DecisionReport;
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::pallets::LaneRequest;
use crate::repair::RepairReport;
use crate::reservations::{CreateReservation, ReleaseReport, ReservationReceipt};

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

#[derive(Debug, Deserialize)]
pub struct DecisionsRequest {
    pub decisions: Vec<ItemDecision>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentCaptured {
    pub reservation_id: Uuid,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/reservations", post(create_reservation))
        .route("/reservations/:id", get(get_reservation))
        .route("/reservations/:id/decisions", post(decide))
        .route("/reservations/:id/cancel", post(cancel_reservation))
        .route("/payments/captured", post(payment_captured))
        .route("/pallets/:id/fill", get(pallet_fill))
        .route("/admin/lanes", post(create_lane))
        .route("/admin/pallets/recheck", post(recheck_pallets))
        .route("/admin/reservations/repair", post(repair_reservations))
        .route("/admin/reservations/release-expired", post(release_expired))
        .route("/admin/reservations/flagged", get(flagged_reservations))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn create_reservation(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<CreateReservation>,
) -> EngineResult<(StatusCode, Json<ReservationReceipt>)> {
    let receipt = state
        .engine
        .reservations
        .create_reservation(&actor, request)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn get_reservation(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> EngineResult<Json<ReservationWithItems>> {
    Ok(Json(state.engine.reservations.get(&actor, id).await?))
}

pub async fn decide(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<DecisionsRequest>,
) -> EngineResult<Json<DecisionReport>> {
    let report = state
        .engine
        .decisions
        .decide(&actor, id, &request.decisions)
        .await?;
    Ok(Json(report))
}

pub async fn cancel_reservation(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> EngineResult<Json<Reservation>> {
    Ok(Json(state.engine.reservations.cancel_reservation(&actor, id).await?))
}

pub async fn payment_captured(
    State(state): State<AppState>,
    Json(request): Json<PaymentCaptured>,
) -> EngineResult<Json<Reservation>> {
    Ok(Json(
        state
            .engine
            .reservations
            .record_payment(request.reservation_id)
            .await?,
    ))
}

pub async fn pallet_fill(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> EngineResult<Json<PalletFill>> {
    Ok(Json(state.engine.capacity.fill(id).await?))
}

pub async fn create_lane(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<LaneRequest>,
) -> EngineResult<Json<Pallet>> {
    Ok(Json(state.engine.pallets.get_or_create_lane(&actor, request).await?))
}

pub async fn recheck_pallets(
    State(state): State<AppState>,
    actor: Actor,
) -> EngineResult<Json<Vec<PalletCheck>>> {
    Ok(Json(state.engine.completion.recheck_pallets(&actor).await?))
}

pub async fn repair_reservations(
    State(state): State<AppState>,
    actor: Actor,
) -> EngineResult<Json<RepairReport>> {
    Ok(Json(state.engine.repair.run(&actor).await?))
}

pub async fn release_expired(
    State(state): State<AppState>,
    actor: Actor,
) -> EngineResult<Json<ReleaseReport>> {
    Ok(Json(state.engine.reservations.release_expired(&actor).await?))
}

pub async fn flagged_reservations(
    State(state): State<AppState>,
    actor: Actor,
) -> EngineResult<Json<Vec<Reservation>>> {
    Ok(Json(state.engine.reservations.flagged_reservations(&actor).await?))
}

pub async fn health_check() -> &'static str {
    "OK"
}
