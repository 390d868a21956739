//! ==============================================================================
//! shadow.rs - device shadow wire documents
//! ==============================================================================
//!
//! purpose:
//!     serde types for what travels on the shadow topics.
//!
//!     inbound  (get/accepted, update/accepted):
//!         {"state": {"reported": {...}, "desired": {...}, "delta": {...}},
//!          "version": 12, "timestamp": 1700000000}
//!     inbound  (get/rejected, update/rejected):
//!         {"code": 404, "message": "No shadow exists with name: ..."}
//!     outbound (update):
//!         {"state": {"desired": {"led_1": 16711680}}}
//!
//!     every section is optional; a document without a "reported" section is
//!     how a freshly provisioned badge looks.
//!
//! ==============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::attribute::{AttrValue, Attribute};

pub const SHADOW_NOT_FOUND: u16 = 404;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ShadowState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Map<String, Value>>,
}

impl ShadowDocument {
    pub fn reported(&self) -> Option<&Map<String, Value>> {
        self.state.as_ref().and_then(|s| s.reported.as_ref())
    }

    pub fn desired(&self) -> Option<&Map<String, Value>> {
        self.state.as_ref().and_then(|s| s.desired.as_ref())
    }

    /// document carrying only a reported section
    #[cfg(test)]
    pub fn with_reported(reported: Map<String, Value>) -> Self {
        Self {
            state: Some(ShadowState {
                reported: Some(reported),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "clientToken", skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

impl ErrorResponse {
    pub fn not_found(thing_name: &str) -> Self {
        Self {
            code: SHADOW_NOT_FOUND,
            message: format!("No shadow exists with name: '{}'", thing_name),
            client_token: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code == SHADOW_NOT_FOUND
    }
}

/// outbound desired-state write, one or more attributes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredDocument {
    entries: BTreeMap<Attribute, AttrValue>,
}

impl DesiredDocument {
    pub fn single(attribute: Attribute, value: AttrValue) -> Self {
        let mut doc = Self::default();
        doc.insert(attribute, value);
        doc
    }

    pub fn insert(&mut self, attribute: Attribute, value: AttrValue) {
        self.entries.insert(attribute, value);
    }

    #[cfg(test)]
    pub fn get(&self, attribute: Attribute) -> Option<&AttrValue> {
        self.entries.get(&attribute)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let desired: Map<String, Value> = self
            .entries
            .iter()
            .map(|(attribute, value)| (attribute.key().to_string(), value.to_json()))
            .collect();
        json!({ "state": { "desired": desired } })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_accepted_without_reported() {
        let doc: ShadowDocument =
            serde_json::from_str(r#"{"state":{"desired":{"picture":"bear"}},"version":3}"#).unwrap();
        assert!(doc.reported().is_none());
        assert_eq!(doc.desired().unwrap()["picture"], "bear");
        assert_eq!(doc.version, Some(3));
    }

    #[test]
    fn test_parse_empty_document() {
        let doc: ShadowDocument = serde_json::from_str("{}").unwrap();
        assert!(doc.state.is_none());
        assert!(doc.reported().is_none());
    }

    #[test]
    fn test_parse_rejection() {
        let err: ErrorResponse =
            serde_json::from_str(r#"{"code":404,"message":"No shadow exists with name: 'badge'"}"#).unwrap();
        assert!(err.is_not_found());
        let err: ErrorResponse = serde_json::from_str(r#"{"code":400}"#).unwrap();
        assert!(!err.is_not_found());
        assert!(err.message.is_empty());
    }

    #[test]
    fn test_desired_payload_envelope() {
        let mut doc = DesiredDocument::single(Attribute::Led1, AttrValue::Color(0xFF0000));
        doc.insert(Attribute::UserLed, AttrValue::Choice("on".into()));
        let parsed: Value = serde_json::from_slice(&doc.to_payload()).unwrap();
        assert_eq!(
            parsed,
            json!({"state": {"desired": {"led_1": 16711680, "user_led": "on"}}})
        );
    }
}
