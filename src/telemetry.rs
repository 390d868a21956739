//! ==============================================================================
//! telemetry.rs - badge sensor payloads
//! ==============================================================================
//!
//! purpose:
//!     the badge publishes flat json on the telemetry topic while the shadow
//!     has send_sensor_data = true:
//!
//!         {"temperature": 23.1, "humidity": 41.0, "light": 180,
//!          "acceleration_x": 0.1, "acceleration_y": -0.2, "acceleration_z": 9.8,
//!          "angular_velocity_x": 0.001, ...}
//!
//!     this module parses those payloads, turns them into the strings the
//!     dashboard shows, derives the badge orientation from gravity, and
//!     optionally forwards readings to an ingestion endpoint.
//!
//! relationships:
//!     - used by: reconciler.rs (sensor fields become report-only attributes)
//!     - used by: domain.rs (formatted view), main.rs (forwarder)
//!
//! ==============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::attribute::Attribute;

/// standard gravity in m/s^2
pub const GRAVITY: f64 = 9.80665;

/// one telemetry message; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration_z: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angular_velocity_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angular_velocity_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angular_velocity_z: Option<f64>,
}

/// badge tilt derived from the gravity vector, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Orientation {
    pub roll: f64,
    pub pitch: f64,
}

/// dashboard strings for one reading
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetryView {
    pub temperature: Option<String>,
    pub humidity: Option<String>,
    pub ambient_light: Option<String>,
    pub acceleration_x: Option<String>,
    pub acceleration_y: Option<String>,
    pub acceleration_z: Option<String>,
    pub angular_velocity_x: Option<String>,
    pub angular_velocity_y: Option<String>,
    pub angular_velocity_z: Option<String>,
    pub orientation: Option<Orientation>,
}

impl SensorReading {
    /// present fields keyed by the shadow attribute they mirror
    pub fn fields(&self) -> Vec<(Attribute, f64)> {
        [
            (Attribute::Temperature, self.temperature),
            (Attribute::Humidity, self.humidity),
            (Attribute::AmbientLight, self.light),
            (Attribute::AccelerationX, self.acceleration_x),
            (Attribute::AccelerationY, self.acceleration_y),
            (Attribute::AccelerationZ, self.acceleration_z),
            (Attribute::AngularVelocityX, self.angular_velocity_x),
            (Attribute::AngularVelocityY, self.angular_velocity_y),
            (Attribute::AngularVelocityZ, self.angular_velocity_z),
        ]
        .into_iter()
        .filter_map(|(attribute, value)| value.map(|v| (attribute, v)))
        .collect()
    }

    /// needs all three acceleration axes
    pub fn orientation(&self) -> Option<Orientation> {
        let (x, y, z) = (self.acceleration_x?, self.acceleration_y?, self.acceleration_z?);
        let roll = y.atan2(z);
        let pitch = (-x).atan2((y * y + z * z).sqrt());
        Some(Orientation {
            roll: roll.to_degrees(),
            pitch: pitch.to_degrees(),
        })
    }

    pub fn view(&self) -> TelemetryView {
        TelemetryView {
            temperature: self.temperature.map(format_temperature),
            humidity: self.humidity.map(|h| format!("{:.0}%", h)),
            ambient_light: self.light.map(|l| format!("{:.0}", l)),
            acceleration_x: self.acceleration_x.map(format_acceleration),
            acceleration_y: self.acceleration_y.map(format_acceleration),
            acceleration_z: self.acceleration_z.map(format_acceleration),
            angular_velocity_x: self.angular_velocity_x.map(format_angular_velocity),
            angular_velocity_y: self.angular_velocity_y.map(format_angular_velocity),
            angular_velocity_z: self.angular_velocity_z.map(format_angular_velocity),
            orientation: self.orientation(),
        }
    }

    /// one-line summary for the info log
    pub fn summary(&self) -> String {
        let view = self.view();
        format!(
            "Temp: {} | Humidity: {} | Light: {}",
            view.temperature.as_deref().unwrap_or("-"),
            view.humidity.as_deref().unwrap_or("-"),
            view.ambient_light.as_deref().unwrap_or("-"),
        )
    }
}

pub fn format_temperature(celsius: f64) -> String {
    let fahrenheit = celsius * 9.0 / 5.0 + 32.0;
    format!("{:.1} °C | {:.0} °F", celsius, fahrenheit)
}

pub fn format_acceleration(ms2: f64) -> String {
    format!("{:.1} g | {:.1} m/s^2", ms2 / GRAVITY, ms2)
}

pub fn format_angular_velocity(dps: f64) -> String {
    format!("{:.3} deg/s", dps)
}

// ==============================================================================
// forwarding - push readings to an ingestion endpoint
// ==============================================================================

/// body posted to the ingestion endpoint; the same columns the time-series
/// rule selects from the badge payload
#[derive(Debug, Serialize)]
struct IngestRecord<'a> {
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    light: Option<f64>,
}

#[derive(Clone)]
pub struct TelemetryForwarder {
    client: reqwest::Client,
    url: String,
    default_source: String,
}

impl TelemetryForwarder {
    pub fn new(url: impl Into<String>, default_source: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            default_source: default_source.into(),
        }
    }

    pub async fn push(&self, reading: &SensorReading) -> Result<()> {
        let record = IngestRecord {
            source: reading.source.as_deref().unwrap_or(&self.default_source),
            temperature: reading.temperature,
            humidity: reading.humidity,
            light: reading.light,
        };

        self.client
            .post(&self.url)
            .json(&record)
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.url))?
            .error_for_status()
            .context("ingestion endpoint rejected reading")?;
        Ok(())
    }
}
