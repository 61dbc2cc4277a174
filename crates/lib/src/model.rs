//! Records moving through the gateway.
//!
//! Wire names are camelCase. Input also accepts the field names used by the
//! aircraft backend (`flight_rules`, `reg`, `flightno`, `lat`, `lon`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Weather observation sent by clients on `fireforget` and `channel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReport {
    #[serde(alias = "flight_rules")]
    pub flight_rules: String,
    pub raw: String,
}

impl fmt::Display for WeatherReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.flight_rules, self.raw)
    }
}

/// Aircraft position produced by the backend and forwarded unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AircraftState {
    pub callsign: String,
    #[serde(alias = "reg")]
    pub registration: String,
    #[serde(alias = "flightno")]
    pub flight_number: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub altitude: i32,
    pub heading: i32,
    pub speed: i32,
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lon")]
    pub longitude: f64,
}

/// "A request occurred now". Only used to trigger a backend fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(Utc::now())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
