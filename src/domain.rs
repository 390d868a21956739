use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::attribute::Attribute;
use crate::reconciler::{ButtonIndicator, Notification};
use crate::telemetry::{SensorReading, TelemetryView};

/// what the dashboard shows, fed only by presentation notifications
#[derive(Clone, Default, Serialize)]
pub struct AppState {
    pub thing_name: String,
    /// keyed by shadow attribute name
    pub attributes: BTreeMap<&'static str, AttributeView>,
    pub buttons: BTreeMap<&'static str, ButtonView>,
    /// formatted strings of the latest telemetry message
    pub telemetry: Option<TelemetryView>,
    /// raw latest telemetry message
    pub last_reading: Option<SensorReading>,
    /// unix timestamp (ms) of last notification
    pub last_update: u64,
}

#[derive(Clone, Default, Serialize)]
pub struct AttributeView {
    pub confirmed: Option<Value>,
    pub pending: Option<Value>,
    /// human readable form of the value on screen
    pub display: String,
}

#[derive(Clone, Default, Serialize)]
pub struct ButtonView {
    pub last_pressed: u64,
    pub visible: bool,
    pub opacity: f32,
}

impl From<ButtonIndicator> for ButtonView {
    fn from(indicator: ButtonIndicator) -> Self {
        Self {
            last_pressed: indicator.last_pressed,
            visible: indicator.visible,
            opacity: indicator.opacity(),
        }
    }
}

impl AppState {
    pub fn new(thing_name: impl Into<String>) -> Self {
        let attributes = Attribute::ALL
            .iter()
            .map(|attribute| {
                let display = attribute
                    .default_value()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "(no data yet)".to_string());
                (
                    attribute.key(),
                    AttributeView {
                        display,
                        ..Default::default()
                    },
                )
            })
            .collect();

        Self {
            thing_name: thing_name.into(),
            attributes,
            ..Default::default()
        }
    }

    pub fn apply(&mut self, notification: &Notification, now_ms: u64) {
        match notification {
            Notification::Pending { attribute, value } => {
                let view = self.attributes.entry(attribute.key()).or_default();
                view.pending = Some(value.to_json());
                view.display = value.to_string();
            }
            Notification::Confirmed { attribute, value } => {
                let view = self.attributes.entry(attribute.key()).or_default();
                view.confirmed = Some(value.to_json());
                view.pending = None;
                view.display = value.to_string();
            }
            Notification::Button { button, indicator } => {
                self.buttons.insert(button.key(), ButtonView::from(*indicator));
            }
            Notification::Telemetry(reading) => {
                self.telemetry = Some(reading.view());
                self.last_reading = Some(reading.clone());
            }
        }
        self.last_update = now_ms;
    }
}

/// current unix time in milliseconds
pub fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttrValue, Button};

    #[test]
    fn test_timestamp() {
        let ts = timestamp_ms();
        // should be after 2024
        assert!(ts > 1700000000000, "timestamp should be after 2024");
    }

    #[test]
    fn test_pending_then_confirmed() {
        let mut state = AppState::new("badge");
        assert_eq!(state.attributes["user_led"].display, "off");
        assert_eq!(state.attributes["temperature"].display, "(no data yet)");

        state.apply(
            &Notification::Pending {
                attribute: Attribute::Led3,
                value: AttrValue::Color(0x00FF00),
            },
            1,
        );
        let view = &state.attributes["led_3"];
        assert_eq!(view.display, "#00ff00");
        assert_eq!(view.pending, Some(Value::from(0x00FF00u32)));
        assert_eq!(view.confirmed, None);

        state.apply(
            &Notification::Confirmed {
                attribute: Attribute::Led3,
                value: AttrValue::Color(0x00FF00),
            },
            2,
        );
        let view = &state.attributes["led_3"];
        assert_eq!(view.pending, None);
        assert_eq!(view.confirmed, Some(Value::from(0x00FF00u32)));
        assert_eq!(state.last_update, 2);
    }

    #[test]
    fn test_button_and_telemetry_views() {
        let mut state = AppState::new("badge");
        state.apply(
            &Notification::Button {
                button: Button::Button4,
                indicator: ButtonIndicator {
                    last_pressed: 9,
                    visibility: 5,
                    visible: true,
                },
            },
            1,
        );
        assert!((state.buttons["button_4"].opacity - 0.5).abs() < 1e-6);

        let reading = SensorReading {
            temperature: Some(25.0),
            ..Default::default()
        };
        state.apply(&Notification::Telemetry(reading), 2);
        assert_eq!(
            state.telemetry.as_ref().and_then(|t| t.temperature.as_deref()),
            Some("25.0 °C | 77 °F")
        );
    }
}
