//! Caller-supplied location information.

use serde::{Deserialize, Serialize};

/// Geographic context for a login attempt or session.
///
/// The engine does no geo-IP resolution of its own; all of these fields are
/// supplied by the caller (typically from an upstream geo-IP middleware) and
/// any of them may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// ISO country code ("US", "FR").
    pub country: Option<String>,
    /// Region / state / subdivision name.
    pub region: Option<String>,
    /// City name.
    pub city: Option<String>,
    /// Latitude in decimal degrees.
    pub latitude: Option<f64>,
    /// Longitude in decimal degrees.
    pub longitude: Option<f64>,
    /// IANA timezone name ("America/New_York").
    pub timezone: Option<String>,
    /// Client IP address as reported by the transport layer.
    pub ip: Option<String>,
}

impl GeoLocation {
    /// Both coordinates present.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}
