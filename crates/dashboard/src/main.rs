use anyhow::Result;
use farming_common::soil_percentage;
use std::{env, sync::Arc, time::Duration};
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use farming_dashboard::{Dashboard, HttpApi, Snapshot};

/// One line of operator input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Start(i64),
    Refresh,
    Status,
    Quit,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (Some("start"), Some(secs)) => match secs.parse() {
            Ok(secs) => Input::Start(secs),
            Err(_) => Input::Unknown(line.trim().to_string()),
        },
        (Some("refresh"), None) => Input::Refresh,
        (Some("status"), None) => Input::Status,
        (Some("quit" | "exit"), None) => Input::Quit,
        _ => Input::Unknown(line.trim().to_string()),
    }
}

/// "mm:ss"
fn format_countdown(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

fn status_line(snap: &Snapshot, now: OffsetDateTime) -> String {
    let Some(device) = &snap.device else {
        return match &snap.error {
            Some(e) => format!("no device data ({e})"),
            None => "no device data".to_string(),
        };
    };

    // last_seen holds the cycle start while pumping, so liveness only means
    // something between cycles.
    let link = if snap.countdown > 0 {
        "running"
    } else if snap.is_offline(now) {
        "offline"
    } else {
        "online"
    };
    let pump = if device.pump_status || snap.countdown > 0 {
        format!("pump ON {}", format_countdown(snap.countdown))
    } else {
        "pump OFF".to_string()
    };
    let mut line = format!("{} {link} | {pump}", device.device_code);
    if let Some(reading) = device.logs.first() {
        line.push_str(&format!(
            " | {:.1}°C {:.0}% soil {}%",
            reading.temperature,
            reading.humidity,
            soil_percentage(reading.soil_moisture)
        ));
    }
    if let Some(e) = &snap.error {
        line.push_str(&format!(" | error: {e}"));
    }
    line
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let hub_url = env::var("HUB_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
    let device_code = env::var("DEVICE_CODE").unwrap_or_else(|_| "FARM-001".to_string());

    let api = Arc::new(HttpApi::new(hub_url.as_str())?);
    let dash = Dashboard::new(api, device_code);
    dash.start();
    info!(%hub_url, device = dash.device_code(), "commands: start <secs> | refresh | status | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status_tick = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Input::Start(secs) => {
                        if let Err(e) = dash.start_irrigation(secs).await {
                            warn!("not started: {e}");
                        }
                        info!("{}", status_line(&dash.snapshot().await, dash.now()));
                    }
                    Input::Refresh => {
                        if let Err(e) = dash.refresh().await {
                            warn!("refresh failed: {e}");
                        }
                        info!("{}", status_line(&dash.snapshot().await, dash.now()));
                    }
                    Input::Status => {
                        let snap = dash.snapshot().await;
                        info!(next_poll = %snap.next_poll, "{}", status_line(&snap, dash.now()));
                    }
                    Input::Quit => break,
                    Input::Unknown(s) if s.is_empty() => {}
                    Input::Unknown(s) => warn!("unknown command '{s}'"),
                }
            }
            _ = status_tick.tick() => {
                // Only chatter while a cycle is counting down.
                let snap = dash.snapshot().await;
                if snap.countdown > 0 {
                    info!("{}", status_line(&snap, dash.now()));
                }
            }
        }
    }

    dash.shutdown();
    info!("dashboard stopped");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
