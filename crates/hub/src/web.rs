use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use farming_common::{
    CommandAck, DeviceData, Envelope, IngestReading, PumpCommand, SensorLog,
};
use rumqttc::{AsyncClient, QoS};
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::db::Db;
use crate::error::ApiError;
use crate::farming;
use crate::mqtt::{notify_pump_command, RELAY_TOPIC};
use crate::state::{EventKind, SharedState};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub hub: SharedState,
    /// `None` when the hub runs without a broker.
    pub mqtt: Option<AsyncClient>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/farming",
            get(list_devices).post(ingest).patch(pump_command),
        )
        .route("/api/relay", post(relay))
        .route("/api/status", get(api_status))
        .with_state(state)
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(format!("invalid or incomplete body: {}", rejection.body_text()))
}

async fn list_devices(
    State(state): State<AppState>,
) -> Result<Json<Envelope<Vec<DeviceData>>>, ApiError> {
    let devices = farming::list_devices(&state.db).await?;
    let mut env = Envelope::ok("farming data loaded", devices);
    env.total_devices = env.data.as_ref().map(Vec::len);
    Ok(Json(env))
}

async fn pump_command(
    State(state): State<AppState>,
    body: Result<Json<PumpCommand>, JsonRejection>,
) -> Result<Json<Envelope<CommandAck>>, ApiError> {
    let Json(cmd) = body.map_err(bad_body)?;

    let ack = match farming::apply_command(&state.db, &cmd, OffsetDateTime::now_utc()).await {
        Ok(ack) => ack,
        Err(e) => {
            warn!(device = %cmd.device_code, "pump command rejected: {e}");
            state
                .hub
                .write()
                .await
                .record(EventKind::Error, format!("command rejected: {e}"));
            return Err(e);
        }
    };

    let state_str = if ack.pump_status { "ON" } else { "OFF" };
    info!(device = %ack.device_code, duration = ack.duration, "pump command accepted: {state_str}");
    state.hub.write().await.record(
        EventKind::Command,
        format!("{} pump {state_str} for {}s", ack.device_code, ack.duration),
    );

    if let Some(mqtt) = &state.mqtt {
        notify_pump_command(
            mqtt,
            &PumpCommand {
                device_code: ack.device_code.clone(),
                pump_status: ack.pump_status,
                duration: Some(ack.duration),
            },
        );
    }

    Ok(Json(Envelope::ok("pump status updated", ack)))
}

async fn ingest(
    State(state): State<AppState>,
    body: Result<Json<IngestReading>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(reading) = body.map_err(bad_body)?;
    let log: SensorLog =
        farming::ingest(&state.db, &reading, OffsetDateTime::now_utc()).await?;

    state.hub.write().await.record(
        EventKind::Telemetry,
        format!(
            "{}: {:.1}°C {:.0}% soil {}%",
            reading.device_code,
            log.temperature,
            log.humidity,
            farming_common::soil_percentage(log.soil_moisture)
        ),
    );

    Ok((StatusCode::CREATED, Json(Envelope::ok("sensor data saved", log))))
}

#[derive(Debug, Deserialize)]
struct RelayRequest {
    command: String,
}

async fn relay(
    State(state): State<AppState>,
    body: Result<Json<RelayRequest>, JsonRejection>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let Json(req) = body.map_err(bad_body)?;
    let command = req.command.trim().to_ascii_lowercase();
    let payload: &[u8] = match command.as_str() {
        "on" => b"ON",
        "off" => b"OFF",
        other => {
            return Err(ApiError::BadRequest(format!(
                "unknown relay command '{other}' (use on/off)"
            )))
        }
    };

    let mqtt = state.mqtt.as_ref().ok_or(ApiError::RelayUnavailable)?;
    mqtt.try_publish(RELAY_TOPIC, QoS::AtLeastOnce, false, payload.to_vec())
        .map_err(|e| {
            warn!("relay publish failed: {e}");
            ApiError::RelayUnavailable
        })?;

    state
        .hub
        .write()
        .await
        .record(EventKind::Relay, format!("relay {command}"));

    Ok(Json(Envelope {
        success: true,
        message: format!("relay is {command}"),
        total_devices: None,
        data: None,
    }))
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let st = state.hub.read().await;
    Json(st.to_status())
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!("farming api listening on http://{addr}");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::HubState;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn test_state(mqtt: Option<AsyncClient>) -> AppState {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db.provision_device("FARM-001", 5, OffsetDateTime::now_utc())
            .await
            .unwrap();
        AppState {
            db,
            hub: HubState::shared(),
            mqtt,
        }
    }

    fn test_mqtt() -> (AsyncClient, rumqttc::EventLoop) {
        let opts = rumqttc::MqttOptions::new("test-hub", "127.0.0.1", 1883);
        AsyncClient::new(opts, 10)
    }

    async fn send(state: &AppState, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = router(state.clone())
            .oneshot(req.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    // -- GET /api/farming -------------------------------------------------

    #[tokio::test]
    async fn list_returns_devices() {
        let state = test_state(None).await;
        let (status, body) = send(&state, Method::GET, "/api/farming", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["totalDevices"], 1);
        assert_eq!(body["data"][0]["deviceCode"], "FARM-001");
        assert_eq!(body["data"][0]["pumpStatus"], false);
        assert!(body["data"][0]["logs"].as_array().unwrap().is_empty());
    }

    // -- PATCH /api/farming -----------------------------------------------

    #[tokio::test]
    async fn patch_starts_pump() {
        let (mqtt, _el) = test_mqtt();
        let state = test_state(Some(mqtt)).await;
        let (status, body) = send(
            &state,
            Method::PATCH,
            "/api/farming",
            Some(json!({"deviceCode": "FARM-001", "pumpStatus": true, "duration": 30})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!({"deviceCode": "FARM-001", "pumpStatus": true, "duration": 30}));

        let (_, list) = send(&state, Method::GET, "/api/farming", None).await;
        assert_eq!(list["data"][0]["pumpStatus"], true);
        assert_eq!(list["data"][0]["irrigationLogs"][0]["duration"], 30);
        assert_eq!(
            state.hub.read().await.events.back().unwrap().kind,
            EventKind::Command
        );
    }

    #[tokio::test]
    async fn patch_unknown_device_is_404() {
        let state = test_state(None).await;
        let (status, body) = send(
            &state,
            Method::PATCH,
            "/api/farming",
            Some(json!({"deviceCode": "FARM-404", "pumpStatus": true, "duration": 30})),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "device FARM-404 not found");
    }

    #[tokio::test]
    async fn patch_missing_field_is_400() {
        let state = test_state(None).await;
        let (status, body) = send(
            &state,
            Method::PATCH,
            "/api/farming",
            Some(json!({"deviceCode": "FARM-001", "duration": 30})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn patch_mistyped_field_is_400() {
        let state = test_state(None).await;
        let (status, _) = send(
            &state,
            Method::PATCH,
            "/api/farming",
            Some(json!({"deviceCode": "FARM-001", "pumpStatus": "yes", "duration": 30})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn patch_stale_device_is_409() {
        let state = test_state(None).await;
        let stale = OffsetDateTime::now_utc() - time::Duration::minutes(5);
        let id = state.db.device_by_code("FARM-001").await.unwrap().unwrap().id;
        state.db.record_pump_report(id, false, stale).await.unwrap();

        let (status, body) = send(
            &state,
            Method::PATCH,
            "/api/farming",
            Some(json!({"deviceCode": "FARM-001", "pumpStatus": true, "duration": 30})),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "device FARM-001 is offline");
    }

    // -- POST /api/farming ------------------------------------------------

    #[tokio::test]
    async fn post_ingests_reading() {
        let state = test_state(None).await;
        let (status, body) = send(
            &state,
            Method::POST,
            "/api/farming",
            Some(json!({"temp": 26.4, "humidity": 70, "soilMoisture": 42, "deviceCode": "FARM-001"})),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["temperature"], 26.4);
        assert_eq!(body["data"]["soilMoisture"], 42.0);
    }

    #[tokio::test]
    async fn post_missing_temp_is_400() {
        let state = test_state(None).await;
        let (status, _) = send(
            &state,
            Method::POST,
            "/api/farming",
            Some(json!({"humidity": 70, "soilMoisture": 42, "deviceCode": "FARM-001"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn post_unknown_device_is_404() {
        let state = test_state(None).await;
        let (status, _) = send(
            &state,
            Method::POST,
            "/api/farming",
            Some(json!({"temp": 20, "humidity": 70, "soilMoisture": 42, "deviceCode": "NOPE"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // -- POST /api/relay --------------------------------------------------

    #[tokio::test]
    async fn relay_publishes_command() {
        let (mqtt, _el) = test_mqtt();
        let state = test_state(Some(mqtt)).await;
        let (status, body) =
            send(&state, Method::POST, "/api/relay", Some(json!({"command": "on"}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "relay is on");
    }

    #[tokio::test]
    async fn relay_unknown_command_is_400() {
        let (mqtt, _el) = test_mqtt();
        let state = test_state(Some(mqtt)).await;
        let (status, _) =
            send(&state, Method::POST, "/api/relay", Some(json!({"command": "blink"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn relay_without_broker_is_503() {
        let state = test_state(None).await;
        let (status, body) =
            send(&state, Method::POST, "/api/relay", Some(json!({"command": "off"}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
    }

    // -- GET /api/status --------------------------------------------------

    #[tokio::test]
    async fn status_reports_events() {
        let state = test_state(None).await;
        state.hub.write().await.record(EventKind::System, "hub started");

        let (status, body) = send(&state, Method::GET, "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mqttConnected"], false);
        assert_eq!(body["events"][0]["kind"], "system");
    }
}
