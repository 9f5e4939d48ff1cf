mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use ulid::Ulid;

use courtside::api::{self, AppState};
use courtside::engine::EngineSettings;
use courtside::model::*;
use courtside::webhook::{SignatureVerifier, sign};

use common::*;

async fn test_app(name: &str) -> (Router, Ulid) {
    let (engine, court) = engine_with_court(name, EngineSettings::default()).await;
    let verifier = SignatureVerifier::new(Some(WEBHOOK_SECRET.into()), Some(300));
    let state = AppState::new(engine, MockGateway::new(Reply::Paid), verifier).with_clock(now);
    (api::router(state), court)
}

async fn send(app: &Router, method: Method, uri: &str, user: Option<Ulid>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn book(app: &Router, court: Ulid, user: Ulid, start: Ms, end: Ms) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        "/reservations",
        Some(user),
        Some(json!({ "court_id": court, "start": start, "end": end, "total_amount": "500" })),
    )
    .await
}

fn unavailable(slots: &Value) -> Vec<String> {
    slots
        .as_array()
        .unwrap()
        .iter()
        .filter(|s| s["available"] == false)
        .map(|s| s["time"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _) = test_app("http_health").await;
    let (status, body) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn booking_removes_slots_and_conflicts_for_others() {
    let (app, court) = test_app("http_booking").await;
    let slots_uri = format!("/courts/{court}/slots?date=2030-01-07");

    let (status, slots) = send(&app, Method::GET, &slots_uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(slots.as_array().unwrap().len(), 16);
    assert_eq!(slots[0]["time"], "06:00");
    assert!(unavailable(&slots).is_empty());

    let (status, _) = send(
        &app,
        Method::POST,
        "/reservations",
        None,
        Some(json!({ "court_id": court, "start": at(8, 0), "end": at(10, 0), "total_amount": "500" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (alice, bob) = (Ulid::new(), Ulid::new());
    let (status, created) = book(&app, court, alice, at(8, 0), at(10, 0)).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    let (_, slots) = send(&app, Method::GET, &slots_uri, None, None).await;
    assert_eq!(unavailable(&slots), vec!["08:00", "09:00"]);

    let (status, body) = book(&app, court, bob, at(9, 0), at(10, 0)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, view) = send(&app, Method::GET, &format!("/reservations/{id}"), Some(alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "pending_payment");
    let (status, _) = send(&app, Method::GET, &format!("/reservations/{id}"), Some(bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn slots_reject_bad_date_and_unknown_court() {
    let (app, _) = test_app("http_slots_errors").await;
    let (status, _) = send(&app, Method::GET, &format!("/courts/{}/slots?date=2030-01-07", Ulid::new()), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (app, court) = test_app("http_slots_bad_date").await;
    let (status, _) = send(&app, Method::GET, &format!("/courts/{court}/slots?date=07-01-2030"), None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancellation_rules_over_http() {
    let (app, court) = test_app("http_cancel").await;
    let alice = Ulid::new();

    // Starts ten hours after "now": too late for the owner to cancel.
    let soon = now() + 10 * HOUR_MS;
    let (_, created) = book(&app, court, alice, soon, soon + HOUR_MS).await;
    let soon_id = created["id"].as_str().unwrap().to_string();
    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/reservations/{soon_id}/cancel"),
        Some(alice),
        Some(json!({ "reason": "rain" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "policy");

    let (_, created) = book(&app, court, alice, at(9, 0), at(10, 0)).await;
    let id = created["id"].as_str().unwrap().to_string();
    let uri = format!("/reservations/{id}/cancel");
    let (status, _) = send(&app, Method::POST, &uri, Some(Ulid::new()), Some(json!({ "reason": "x" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = send(&app, Method::POST, &uri, Some(alice), Some(json!({ "reason": "plans changed" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn signed_webhook_confirms_reservation() {
    let (app, court) = test_app("http_webhook").await;
    let alice = Ulid::new();
    let (_, created) = book(&app, court, alice, at(9, 0), at(10, 0)).await;
    let reservation = created["id"].as_str().unwrap().to_string();
    let (status, payment) = send(
        &app,
        Method::POST,
        &format!("/reservations/{reservation}/payments"),
        Some(alice),
        Some(json!({ "source_id": "src_1", "amount": "500" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let body = json!({
        "data": {
            "id": "evt_paid_1",
            "attributes": {
                "type": "payment.paid",
                "data": {
                    "id": "pay_ext_1",
                    "attributes": {
                        "amount": 50000,
                        "metadata": { "payment_id": payment["id"] }
                    }
                }
            }
        }
    })
    .to_string();

    let deliver = |signature: Option<String>, body: String| {
        let app = app.clone();
        async move {
            let mut builder = Request::builder()
                .method(Method::POST)
                .uri("/webhooks/payment")
                .header("content-type", "application/json");
            if let Some(sig) = signature {
                builder = builder.header("x-payment-signature", sig);
            }
            let resp = app.oneshot(builder.body(Body::from(body)).unwrap()).await.unwrap();
            let status = resp.status();
            let bytes = resp.into_body().collect().await.unwrap().to_bytes();
            (status, serde_json::from_slice::<Value>(&bytes).unwrap_or(Value::Null))
        }
    };

    let t = now() / 1000;
    let (status, _) = deliver(None, body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = deliver(Some(sign("wrong", t, body.as_bytes())), body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = deliver(Some(sign(WEBHOOK_SECRET, t - 3600, body.as_bytes())), body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let signature = sign(WEBHOOK_SECRET, t, body.as_bytes());
    let (status, ack) = deliver(Some(signature.clone()), body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received"], true);
    // Redelivery is acknowledged without further effect.
    let (status, _) = deliver(Some(signature), body).await;
    assert_eq!(status, StatusCode::OK);

    let (_, view) = send(&app, Method::GET, &format!("/reservations/{reservation}"), Some(alice), None).await;
    assert_eq!(view["status"], "confirmed");
    assert_eq!(view["amount_paid"], "500.00");

    let garbage = "{not json".to_string();
    let (status, _) = deliver(Some(sign(WEBHOOK_SECRET, t, garbage.as_bytes())), garbage).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn queue_positions_and_unpaid_leave() {
    let (app, court) = test_app("http_queue").await;
    let organizer = Ulid::new();
    let (status, created) = send(
        &app,
        Method::POST,
        "/queue-sessions",
        Some(organizer),
        Some(json!({
            "court_id": court,
            "start": at(18, 0),
            "end": at(21, 0),
            "max_players": 4,
            "cost_per_game": "100"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let session = created["id"].as_str().unwrap().to_string();
    let base = format!("/queue/{session}");

    let (status, _) = send(&app, Method::POST, &format!("{base}/join"), Some(Ulid::new()), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "draft sessions are not joinable");

    for next in ["pending_approval", "open", "active"] {
        let (status, _) = send(&app, Method::POST, &format!("{base}/status"), None, Some(json!({ "status": next }))).await;
        assert_eq!(status, StatusCode::OK);
    }

    let players = [Ulid::new(), Ulid::new(), Ulid::new()];
    for (i, player) in players.iter().enumerate() {
        let (status, standings) = send(&app, Method::POST, &format!("{base}/join"), Some(*player), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(standings["position"], i as u64 + 1);
    }

    let (_, standings) = send(&app, Method::GET, &base, Some(players[1]), None).await;
    assert_eq!(standings["position"], 2);
    assert_eq!(standings["estimated_wait_minutes"], 30);
    let (_, standings) = send(&app, Method::GET, &base, None, None).await;
    assert_eq!(standings["position"], Value::Null);
    assert_eq!(standings["estimated_wait_minutes"], 60);

    for _ in 0..3 {
        let (status, _) = send(
            &app,
            Method::POST,
            &format!("{base}/games"),
            None,
            Some(json!({ "players": [players[0]], "winners": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&app, Method::POST, &format!("{base}/leave"), Some(players[0]), None).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["amount_owed"], "300");

    let (status, _) = send(&app, Method::POST, &format!("{base}/settle"), None, Some(json!({ "user_id": players[0] }))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::POST, &format!("{base}/leave"), Some(players[0]), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, standings) = send(&app, Method::GET, &base, Some(players[1]), None).await;
    assert_eq!(standings["position"], 1);
    assert_eq!(standings["current_players"], 2);
}
