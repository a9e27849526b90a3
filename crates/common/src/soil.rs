//! Soil-moisture display convention.
//!
//! Older firmware reports a ready-made percentage, newer firmware sends the
//! raw 12-bit ADC value. Both end up on the same 0–100 scale here.

/// Raw ADC reading that maps to 0 %.
pub const RAW_DRY: f64 = 1500.0;
/// Full-scale 12-bit ADC reading, maps to 100 %.
pub const RAW_MAX: f64 = 4095.0;

/// Normalize a soil reading to a whole percentage.
///
/// Values in `[0, 100]` pass through (rounded), values in `(100, 4095]` are
/// rescaled linearly from [`RAW_DRY`]..[`RAW_MAX`] and clamped. Anything else
/// is not a plausible reading and yields 0.
pub fn soil_percentage(raw: f64) -> u8 {
    if (0.0..=100.0).contains(&raw) {
        raw.round() as u8
    } else if raw > 100.0 && raw <= RAW_MAX {
        let pct = ((raw - RAW_DRY) / (RAW_MAX - RAW_DRY) * 100.0).round();
        pct.clamp(0.0, 100.0) as u8
    } else {
        0
    }
}
