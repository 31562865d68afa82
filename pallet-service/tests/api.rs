//! HTTP contract of the router, driven through `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used)]

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::Fixture;
use pallet_service::actor::{PRODUCER_HEADER, ROLE_HEADER, USER_HEADER};
use pallet_service::api::{create_router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn router(fx: &Fixture) -> Router {
    create_router(AppState {
        engine: fx.engine.clone(),
    })
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, body)
}

fn post(uri: &str, headers: &[(&str, String)], body: Value) -> Request<Body> {
    let mut builder = Request::post(uri).header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, headers: &[(&str, String)]) -> Request<Body> {
    let mut builder = Request::get(uri);
    for (name, value) in headers {
        builder = builder.header(*name, value);
    }
    builder.body(Body::empty()).unwrap()
}

fn admin() -> Vec<(&'static str, String)> {
    vec![(ROLE_HEADER, "admin".to_string())]
}

fn customer(id: Uuid) -> Vec<(&'static str, String)> {
    vec![(ROLE_HEADER, "customer".to_string()), (USER_HEADER, id.to_string())]
}

#[tokio::test]
async fn health_check_answers_ok() {
    let fx = Fixture::new().await;
    let (status, body) = send(router(&fx), get("/health", &[])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));
}

#[tokio::test]
async fn requests_without_an_actor_are_forbidden() {
    let fx = Fixture::new().await;
    let (status, body) = send(
        router(&fx),
        post("/reservations", &[], serde_json::to_value(fx.request(&[(fx.riesling, 6)])).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains(ROLE_HEADER));
}

#[tokio::test]
async fn reservation_flow_over_http() {
    let fx = Fixture::new().await;

    let (status, lane) = send(
        router(&fx),
        post(
            "/admin/lanes",
            &admin(),
            json!({
                "pickup_zone_id": fx.mosel.id,
                "delivery_zone_id": fx.berlin.id,
                "bottle_capacity": 12,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let pallet_id = lane["id"].as_str().unwrap().to_string();

    let (status, receipt) = send(
        router(&fx),
        post(
            "/reservations",
            &customer(fx.customer),
            serde_json::to_value(fx.request(&[(fx.riesling, 6)])).unwrap(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["pending"], json!(false));
    assert_eq!(receipt["reservation"]["reservation"]["status"], json!("placed"));
    let reservation_id = receipt["reservation"]["reservation"]["id"].as_str().unwrap().to_string();
    let item_id = receipt["reservation"]["items"][0]["id"].as_str().unwrap().to_string();

    let (status, fill) = send(router(&fx), get(&format!("/pallets/{pallet_id}/fill"), &[])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fill["total"], json!(6));
    assert_eq!(fill["percentage"], json!(50));

    let producer = vec![
        (ROLE_HEADER, "producer".to_string()),
        (PRODUCER_HEADER, fx.producer_a.to_string()),
    ];
    let (status, report) = send(
        router(&fx),
        post(
            &format!("/reservations/{reservation_id}/decisions"),
            &producer,
            json!({ "decisions": [{ "item_id": item_id, "decision": "approved", "approved_quantity": 4 }] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["outcome"], json!("partly_approved"));

    let (status, _) = send(
        router(&fx),
        post(
            &format!("/reservations/{reservation_id}/decisions"),
            &producer,
            json!({ "decisions": [{ "item_id": item_id, "decision": "approved", "approved_quantity": 7 }] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, cancelled) = send(
        router(&fx),
        post(&format!("/reservations/{reservation_id}/cancel"), &customer(fx.customer), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], json!("cancelled"));
}

#[tokio::test]
async fn admin_routes_reject_other_roles() {
    let fx = Fixture::new().await;
    for uri in [
        "/admin/pallets/recheck",
        "/admin/reservations/repair",
        "/admin/reservations/release-expired",
    ] {
        let (status, _) = send(router(&fx), post(uri, &customer(fx.customer), json!({}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
    }

    let (status, _) = send(router(&fx), get("/admin/reservations/flagged", &customer(fx.customer))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, report) = send(router(&fx), post("/admin/reservations/repair", &admin(), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["scanned"], json!(0));
}

#[tokio::test]
async fn unknown_entities_map_to_not_found() {
    let fx = Fixture::new().await;
    let (status, _) = send(router(&fx), get(&format!("/reservations/{}", Uuid::new_v4()), &admin())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(router(&fx), get(&format!("/pallets/{}/fill", Uuid::new_v4()), &[])).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        router(&fx),
        post("/payments/captured", &[], json!({ "reservation_id": Uuid::new_v4() })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
