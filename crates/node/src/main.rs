mod sim;

use anyhow::Result;
use farming_common::{IngestReading, PumpCommand, MAX_DURATION_SECS, MIN_DURATION_SECS};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, time::Duration};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sim::{EnvironmentSim, Scenario};

/// Turn a `pump/<code>/set` payload into a command for this device.
fn parse_pump_command(payload: &[u8], device_code: &str) -> Result<PumpCommand, String> {
    let cmd: PumpCommand =
        serde_json::from_slice(payload).map_err(|e| format!("bad pump command json: {e}"))?;
    if cmd.device_code != device_code {
        return Err(format!("pump command addressed to '{}'", cmd.device_code));
    }
    Ok(cmd)
}

/// Seconds the pump should run for a command, within the allowed range.
fn run_time(cmd: &PumpCommand) -> Duration {
    let secs = cmd
        .duration
        .unwrap_or(MIN_DURATION_SECS)
        .clamp(MIN_DURATION_SECS, MAX_DURATION_SECS);
    Duration::from_secs(secs as u64)
}

/// Telemetry period from `SAMPLE_EVERY_S`. Zero or unparsable falls back to
/// the default; must stay well under the hub's 60 s staleness window.
fn sample_interval_secs(raw: Option<&str>) -> u64 {
    raw.and_then(|s| s.trim().parse().ok())
        .filter(|s: &u64| *s > 0)
        .unwrap_or(10)
}

fn telemetry(sample: &sim::Sample, device_code: &str) -> IngestReading {
    IngestReading {
        temp: sample.temperature,
        humidity: sample.humidity,
        soil_moisture: sample.soil_raw,
        device_code: device_code.to_string(),
    }
}

fn now_secs() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
}

/// Resolves when the running cycle ends; never resolves while idle.
async fn pump_deadline(until: Option<Instant>) {
    match until {
        Some(t) => sleep_until(t).await,
        None => std::future::pending().await,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let device_code = env::var("DEVICE_CODE").unwrap_or_else(|_| "FARM-001".to_string());

    let sample_every_s = sample_interval_secs(env::var("SAMPLE_EVERY_S").ok().as_deref());
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let diurnal_period_s: f64 = env::var("DIURNAL_PERIOD_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(600.0);

    let mut mqttoptions = MqttOptions::new(format!("farming-node-{device_code}"), broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    let tele_topic = format!("tele/{device_code}/reading");
    let set_topic = format!("pump/{device_code}/set");
    let state_topic = format!("pump/{device_code}/state");

    // Event loop: keep the connection alive and forward pump commands.
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<PumpCommand>(8);
    {
        let client = client.clone();
        let device_code = device_code.clone();
        let set_topic = set_topic.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("node connected to mqtt");
                        if let Err(e) = client.try_subscribe(&set_topic, QoS::AtLeastOnce) {
                            warn!("subscribe failed: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(p))) if p.topic == set_topic => {
                        match parse_pump_command(&p.payload, &device_code) {
                            Ok(cmd) => {
                                if cmd_tx.send(cmd).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => warn!("{e}"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("mqtt error: {e}. retrying...");
                        sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    info!(%device_code, %scenario, sample_every_s, "simulated device publishing to {tele_topic}");

    let mut env_sim = EnvironmentSim::new(scenario, diurnal_period_s);
    let mut sample_tick = tokio::time::interval(Duration::from_secs(sample_every_s));
    let mut pump_until: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = sample_tick.tick() => {
                let sample = env_sim.sample(now_secs());
                let payload = serde_json::to_vec(&telemetry(&sample, &device_code))?;
                if let Err(e) = client.publish(&tele_topic, QoS::AtLeastOnce, false, payload).await {
                    warn!("publish error: {e}");
                } else {
                    info!(
                        temp = sample.temperature,
                        humidity = sample.humidity,
                        soil_raw = sample.soil_raw,
                        pump = env_sim.is_watering(),
                        "published reading"
                    );
                }
            }
            Some(cmd) = cmd_rx.recv() => {
                if cmd.pump_status {
                    let run = run_time(&cmd);
                    info!(secs = run.as_secs(), "pump ON");
                    pump_until = Some(Instant::now() + run);
                    env_sim.set_watering(true);
                } else if pump_until.take().is_some() {
                    info!("pump OFF (commanded)");
                    env_sim.set_watering(false);
                    if let Err(e) = client.publish(&state_topic, QoS::AtLeastOnce, false, "OFF").await {
                        warn!("publish error: {e}");
                    }
                }
            }
            _ = pump_deadline(pump_until) => {
                pump_until = None;
                env_sim.set_watering(false);
                info!("pump OFF (cycle complete)");
                if let Err(e) = client.publish(&state_topic, QoS::AtLeastOnce, false, "OFF").await {
                    warn!("publish error: {e}");
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
