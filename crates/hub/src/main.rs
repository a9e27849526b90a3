mod config;
mod db;
mod error;
mod farming;
mod mqtt;
mod state;
mod web;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, time::Duration};
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use db::Db;
use state::{EventKind, HubState};
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:farming.db?mode=rwc".to_string());

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Config file (provision devices) ─────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    config::apply(&cfg, &db).await?;

    let devices = db.load_devices().await?;
    if devices.is_empty() {
        warn!("no devices provisioned in the database");
    }
    info!(devices = devices.len(), "db ready");

    // ── Shared state (ephemeral, for /api/status) ───────────────────
    let shared = HubState::shared();
    shared.write().await.record(EventKind::System, "hub started");

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new("farming-hub", broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);

    // ── Web server ──────────────────────────────────────────────────
    let app = AppState {
        db: db.clone(),
        hub: shared.clone(),
        mqtt: Some(client.clone()),
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(app).await {
            error!("web server stopped: {e:#}");
        }
    });

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                mqtt::handle_publish(&p.topic, &p.payload, &db, &shared).await;
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                // Clean session: subscriptions do not survive a reconnect.
                for topic in ["tele/+/reading", "pump/+/state"] {
                    if let Err(e) = client.try_subscribe(topic, QoS::AtLeastOnce) {
                        error!(%topic, "subscribe failed: {e}");
                    }
                }
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record(EventKind::System, "mqtt connected");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record(EventKind::System, "mqtt disconnected");
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record(EventKind::Error, format!("mqtt error: {e}"));
                drop(st);

                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
