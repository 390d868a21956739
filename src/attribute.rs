//! ==============================================================================
//! attribute.rs - the fixed set of shadow attributes and their values
//! ==============================================================================
//!
//! purpose:
//!     every key the badge firmware reads from or writes to its shadow document
//!     is listed here once, together with the kind of value it carries.
//!     string keys only exist at the wire boundary (shadow json, http api).
//!
//! kinds:
//!     - Flag:    boolean toggle (send_sensor_data)
//!     - Level:   bounded integer 0..=100 (brightness sliders)
//!     - Choice:  one of a fixed list of strings (user_led mode, sample picture)
//!     - Text:    free-form string (qr code url)
//!     - Color:   24-bit rgb packed into an integer (smart leds)
//!     - Reading: sensor number, report-only
//!
//! buttons are not attributes: they are report-only press timestamps with
//! their own indicator logic (see reconciler.rs).
//!
//! ==============================================================================

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::{TwinError, TwinResult};

pub const USER_LED_MODES: &[&str] = &["on", "blinking", "off"];

pub const PICTURES: &[&str] = &["bear", "day1", "employees", "toy", "aws_logo", "none"];

pub const LED_1_COLOR: u32 = 0xD2033E;
pub const LED_2_COLOR: u32 = 0xF8C40D;
pub const LED_3_COLOR: u32 = 0xF0961A;

const LEVEL_MAX: u8 = 100;
const COLOR_MAX: u64 = 0xFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attribute {
    SendSensorData,
    UserLed,
    Led1,
    Led2,
    Led3,
    LedBrightness,
    DisplayBrightness,
    QrCode,
    Picture,
    Temperature,
    Humidity,
    AmbientLight,
    AccelerationX,
    AccelerationY,
    AccelerationZ,
    AngularVelocityX,
    AngularVelocityY,
    AngularVelocityZ,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Flag,
    Level,
    Choice(&'static [&'static str]),
    Text,
    Color,
    Reading,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Flag(bool),
    Level(u8),
    Choice(String),
    Text(String),
    Color(u32),
    Reading(f64),
}

impl Attribute {
    pub const ALL: [Attribute; 18] = [
        Attribute::SendSensorData,
        Attribute::UserLed,
        Attribute::Led1,
        Attribute::Led2,
        Attribute::Led3,
        Attribute::LedBrightness,
        Attribute::DisplayBrightness,
        Attribute::QrCode,
        Attribute::Picture,
        Attribute::Temperature,
        Attribute::Humidity,
        Attribute::AmbientLight,
        Attribute::AccelerationX,
        Attribute::AccelerationY,
        Attribute::AccelerationZ,
        Attribute::AngularVelocityX,
        Attribute::AngularVelocityY,
        Attribute::AngularVelocityZ,
    ];

    /// attributes written when the shadow has no reported state yet
    pub const BASELINE: [Attribute; 7] = [
        Attribute::Picture,
        Attribute::UserLed,
        Attribute::LedBrightness,
        Attribute::DisplayBrightness,
        Attribute::Led1,
        Attribute::Led2,
        Attribute::Led3,
    ];

    /// attributes the badge must always have reported; filled in one by one
    /// when an existing shadow is missing them
    pub const REQUIRED: [Attribute; 3] = [
        Attribute::DisplayBrightness,
        Attribute::Picture,
        Attribute::UserLed,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Attribute::SendSensorData => "send_sensor_data",
            Attribute::UserLed => "user_led",
            Attribute::Led1 => "led_1",
            Attribute::Led2 => "led_2",
            Attribute::Led3 => "led_3",
            Attribute::LedBrightness => "led_brightness",
            Attribute::DisplayBrightness => "display_brightness",
            Attribute::QrCode => "qr_code",
            Attribute::Picture => "picture",
            Attribute::Temperature => "temperature",
            Attribute::Humidity => "humidity",
            Attribute::AmbientLight => "ambient_light",
            Attribute::AccelerationX => "acceleration_x",
            Attribute::AccelerationY => "acceleration_y",
            Attribute::AccelerationZ => "acceleration_z",
            Attribute::AngularVelocityX => "angular_velocity_x",
            Attribute::AngularVelocityY => "angular_velocity_y",
            Attribute::AngularVelocityZ => "angular_velocity_z",
        }
    }

    pub fn kind(self) -> ValueKind {
        match self {
            Attribute::SendSensorData => ValueKind::Flag,
            Attribute::UserLed => ValueKind::Choice(USER_LED_MODES),
            Attribute::Picture => ValueKind::Choice(PICTURES),
            Attribute::Led1 | Attribute::Led2 | Attribute::Led3 => ValueKind::Color,
            Attribute::LedBrightness | Attribute::DisplayBrightness => ValueKind::Level,
            Attribute::QrCode => ValueKind::Text,
            _ => ValueKind::Reading,
        }
    }

    /// sensor readings come from the badge only
    pub fn is_writable(self) -> bool {
        self.kind() != ValueKind::Reading
    }

    /// value shown before anything has been reported or edited
    pub fn default_value(self) -> Option<AttrValue> {
        let value = match self {
            Attribute::SendSensorData => AttrValue::Flag(false),
            Attribute::UserLed => AttrValue::Choice("off".to_string()),
            Attribute::Led1 => AttrValue::Color(LED_1_COLOR),
            Attribute::Led2 => AttrValue::Color(LED_2_COLOR),
            Attribute::Led3 => AttrValue::Color(LED_3_COLOR),
            Attribute::LedBrightness => AttrValue::Level(15),
            Attribute::DisplayBrightness => AttrValue::Level(100),
            Attribute::QrCode => AttrValue::Text("(no URL)".to_string()),
            Attribute::Picture => AttrValue::Choice("bear".to_string()),
            _ => return None,
        };
        Some(value)
    }

    /// decode a json scalar into this attribute's value kind
    ///
    /// colors also accept "#RRGGBB" so the dashboard can post what it displays.
    pub fn decode(self, raw: &Value) -> TwinResult<AttrValue> {
        let invalid = |reason: &str| TwinError::InvalidValue {
            attribute: self.key(),
            reason: reason.to_string(),
        };

        match self.kind() {
            ValueKind::Flag => raw.as_bool().map(AttrValue::Flag).ok_or_else(|| invalid("expected boolean")),
            ValueKind::Level => {
                let n = whole_number(raw).ok_or_else(|| invalid("expected integer"))?;
                if n > LEVEL_MAX as u64 {
                    return Err(invalid("out of range 0..=100"));
                }
                Ok(AttrValue::Level(n as u8))
            }
            ValueKind::Choice(options) => {
                let s = raw.as_str().ok_or_else(|| invalid("expected string"))?;
                if options.contains(&s) {
                    Ok(AttrValue::Choice(s.to_string()))
                } else {
                    Err(invalid(&format!("expected one of {:?}", options)))
                }
            }
            ValueKind::Text => raw
                .as_str()
                .map(|s| AttrValue::Text(s.to_string()))
                .ok_or_else(|| invalid("expected string")),
            ValueKind::Color => {
                if let Some(s) = raw.as_str() {
                    return parse_color(s).map(AttrValue::Color).ok_or_else(|| invalid("expected #RRGGBB"));
                }
                let n = whole_number(raw).ok_or_else(|| invalid("expected rgb integer"))?;
                if n > COLOR_MAX {
                    return Err(invalid("color exceeds 0xFFFFFF"));
                }
                Ok(AttrValue::Color(n as u32))
            }
            ValueKind::Reading => raw.as_f64().map(AttrValue::Reading).ok_or_else(|| invalid("expected number")),
        }
    }

    /// whether a typed value belongs to this attribute
    pub fn accepts(self, value: &AttrValue) -> bool {
        match (self.kind(), value) {
            (ValueKind::Flag, AttrValue::Flag(_)) => true,
            (ValueKind::Level, AttrValue::Level(n)) => *n <= LEVEL_MAX,
            (ValueKind::Choice(options), AttrValue::Choice(s)) => options.contains(&s.as_str()),
            (ValueKind::Text, AttrValue::Text(_)) => true,
            (ValueKind::Color, AttrValue::Color(c)) => *c as u64 <= COLOR_MAX,
            (ValueKind::Reading, AttrValue::Reading(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Attribute {
    type Err = TwinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Attribute::ALL
            .iter()
            .copied()
            .find(|a| a.key() == s)
            .ok_or_else(|| TwinError::UnknownAttribute(s.to_string()))
    }
}

impl AttrValue {
    /// shadow wire form; colors stay integers like the firmware expects
    pub fn to_json(&self) -> Value {
        match self {
            AttrValue::Flag(b) => Value::Bool(*b),
            AttrValue::Level(n) => Value::from(*n),
            AttrValue::Choice(s) | AttrValue::Text(s) => Value::String(s.clone()),
            AttrValue::Color(c) => Value::from(*c),
            AttrValue::Reading(r) => Value::from(*r),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Flag(b) => write!(f, "{}", b),
            AttrValue::Level(n) => write!(f, "{}", n),
            AttrValue::Choice(s) | AttrValue::Text(s) => f.write_str(s),
            AttrValue::Color(c) => f.write_str(&format_color(*c)),
            AttrValue::Reading(r) => write!(f, "{}", r),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Button {
    Button1,
    Button2,
    Button3,
    Button4,
}

impl Button {
    pub const ALL: [Button; 4] = [Button::Button1, Button::Button2, Button::Button3, Button::Button4];

    pub fn key(self) -> &'static str {
        match self {
            Button::Button1 => "button_1",
            Button::Button2 => "button_2",
            Button::Button3 => "button_3",
            Button::Button4 => "button_4",
        }
    }

    /// 1-based, matching the labels printed on the badge
    pub fn from_index(index: u8) -> Option<Button> {
        match index {
            1 => Some(Button::Button1),
            2 => Some(Button::Button2),
            3 => Some(Button::Button3),
            4 => Some(Button::Button4),
            _ => None,
        }
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// "#d2033e" for 0xD2033E
pub fn format_color(color: u32) -> String {
    let bytes = color.to_be_bytes();
    format!("#{}", hex::encode(&bytes[1..]))
}

/// accepts "#RRGGBB" or "RRGGBB"
pub fn parse_color(s: &str) -> Option<u32> {
    let digits = s.strip_prefix('#').unwrap_or(s);
    let bytes = hex::decode(digits).ok()?;
    match bytes.as_slice() {
        [r, g, b] => Some(u32::from_be_bytes([0, *r, *g, *b])),
        _ => None,
    }
}

// json numbers from browsers may arrive as 15.0
fn whole_number(raw: &Value) -> Option<u64> {
    if let Some(n) = raw.as_u64() {
        return Some(n);
    }
    let f = raw.as_f64()?;
    if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}
