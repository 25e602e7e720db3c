//! Solar X-ray flux samples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowest flux (W/m²) accepted as a real measurement.
pub const FLUX_MIN: f32 = 1e-10;

/// Highest flux (W/m²) accepted as a real measurement.
pub const FLUX_MAX: f32 = 1e-2;

/// One averaged measurement of both XRS channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FluxSample {
    pub timestamp: DateTime<Utc>,
    /// Short wavelength channel (0.05-0.4 nm), W/m²
    pub low_channel: f32,
    /// Long wavelength channel (0.1-0.8 nm), W/m²
    pub high_channel: f32,
}

impl FluxSample {
    pub fn new(timestamp: DateTime<Utc>, low_channel: f32, high_channel: f32) -> Self {
        Self {
            timestamp,
            low_channel,
            high_channel,
        }
    }

    /// Both channels carry a physically plausible value.
    pub fn is_valid(&self) -> bool {
        is_valid_flux(self.low_channel) && is_valid_flux(self.high_channel)
    }
}

/// Whether a flux value lies within the instrument's usable range.
pub fn is_valid_flux(value: f32) -> bool {
    (FLUX_MIN..=FLUX_MAX).contains(&value)
}

/// Replace out-of-range values with zero.
pub fn sanitize_flux(value: f32) -> f32 {
    if is_valid_flux(value) {
        value
    } else {
        0.0
    }
}
