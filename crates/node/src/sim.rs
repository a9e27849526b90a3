//! Stateful environment simulator for the demo device.
//!
//! Models one greenhouse bed:
//! - Soil moisture as a raw 12-bit capacitive reading (higher = wetter),
//!   random walk with mean reversion and slow drying
//! - Occasional spikes (sensor flakiness)
//! - Air temperature and humidity following a day/night cycle
//! - Closed-loop watering response (soil gets wetter while the pump runs)

use std::fmt;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

/// Driest raw reading the probe produces in open air.
pub const SOIL_RAW_DRY: f64 = 1500.0;
/// Full-scale reading, probe in water.
pub const SOIL_RAW_WET: f64 = 4095.0;

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range and dries steadily. The default.
    Drying,
    /// Hovers near the centre with little noise.
    Stable,
    /// Noisy probe with frequent spikes.
    Flaky,
    /// Starts near saturation, dries very slowly.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sample
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// °C, one decimal.
    pub temperature: f64,
    /// % relative humidity, one decimal.
    pub humidity: f64,
    /// Raw ADC counts.
    pub soil_raw: f64,
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct EnvironmentSim {
    soil: f64,
    center: f64,

    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,

    spike_prob: f32,
    spike_sigma: f64,

    diurnal_period_s: f64,

    watering: bool,
    wet_rate: f64,
}

impl EnvironmentSim {
    /// `diurnal_period_s` controls the day/night cycle length. Use 600
    /// (10 min) for fast dev iteration or 86400 for real-time.
    pub fn new(scenario: Scenario, diurnal_period_s: f64) -> Self {
        let range = SOIL_RAW_WET - SOIL_RAW_DRY;
        let center = (SOIL_RAW_WET + SOIL_RAW_DRY) / 2.0;

        // start_frac: 0.0 = bone dry, 1.0 = saturated
        let (drift, walk_sigma, mean_rev, noise_sigma, spike_prob, spike_sigma, start_frac) =
            match scenario {
                Scenario::Drying => (-6.0, 25.0, 0.01, 15.0, 0.03_f32, 400.0, 0.5),
                Scenario::Stable => (-1.0, 10.0, 0.05, 8.0, 0.005, 200.0, 0.5),
                Scenario::Flaky => (-4.0, 45.0, 0.02, 60.0, 0.10, 700.0, 0.5),
                Scenario::Wet => (-1.5, 15.0, 0.01, 12.0, 0.02, 300.0, 0.85),
            };

        Self {
            soil: SOIL_RAW_DRY + start_frac * range + gaussian(0.0, range * 0.02),
            center,
            drift_per_sample: drift,
            walk_sigma,
            mean_reversion: mean_rev,
            noise_sigma,
            spike_prob,
            spike_sigma,
            diurnal_period_s,
            watering: false,
            wet_rate: 60.0,
        }
    }

    /// Inform the simulator whether the pump is currently running.
    pub fn set_watering(&mut self, active: bool) {
        self.watering = active;
    }

    pub fn is_watering(&self) -> bool {
        self.watering
    }

    /// Produce the next sample. `now_s` is the wall clock in seconds and only
    /// drives the day/night phase.
    pub fn sample(&mut self, now_s: f64) -> Sample {
        // -- Soil -----------------------------------------------------------
        let pull = self.mean_reversion * (self.center - self.soil);
        let walk = gaussian(0.0, self.walk_sigma);
        let wet = if self.watering { self.wet_rate } else { 0.0 };

        self.soil = (self.soil + self.drift_per_sample + pull + walk + wet)
            .clamp(SOIL_RAW_DRY - 200.0, SOIL_RAW_WET);

        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };
        let soil_raw = (self.soil + gaussian(0.0, self.noise_sigma) + spike)
            .round()
            .clamp(0.0, SOIL_RAW_WET);

        // -- Air ------------------------------------------------------------
        // Peaks at "afternoon" (a quarter period in); humidity runs opposite.
        let phase = 2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s;
        let temperature = 26.0 + 5.0 * phase.sin() + gaussian(0.0, 0.3);
        let humidity = (68.0 - 12.0 * phase.sin() + gaussian(0.0, 1.0)).clamp(0.0, 100.0);

        Sample {
            temperature: (temperature * 10.0).round() / 10.0,
            humidity: (humidity * 10.0).round() / 10.0,
            soil_raw,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
