//! ==============================================================================
//! transport.rs - topic-addressed message bus boundary
//! ==============================================================================
//!
//! purpose:
//!     the shadow actor only ever sees `Message { topic, payload }` going out
//!     and typed `Event`s coming in. this module owns the topic layout for one
//!     thing and the decoding in between.
//!
//! topics (thing = configured thing name):
//!
//!     out: $aws/things/<thing>/shadow/get              (empty payload)
//!          $aws/things/<thing>/shadow/update           {"state":{"desired":{..}}}
//!     in:  $aws/things/<thing>/shadow/get/accepted     ShadowDocument
//!          $aws/things/<thing>/shadow/get/rejected     ErrorResponse
//!          $aws/things/<thing>/shadow/update/accepted  ShadowDocument
//!          $aws/things/<thing>/shadow/update/rejected  ErrorResponse
//!          <telemetry topic>                           SensorReading
//!          $aws/events/presence/{connected,disconnected}/<client>
//!
//! relationships:
//!     - used by: runtime.rs (publishes Outbound, decodes inbound)
//!     - implemented by: ChannelTransport (in-process, feeds simulator.rs)
//!
//! ==============================================================================

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::{TwinError, TwinResult};
use crate::reconciler::{Event, Outbound};

const PRESENCE_CONNECTED: &str = "$aws/events/presence/connected/";
const PRESENCE_DISCONNECTED: &str = "$aws/events/presence/disconnected/";

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// at-least-once, per-topic ordered publish. `publish` only enqueues.
pub trait Transport: Send + Sync {
    fn publish(&self, message: Message) -> TwinResult<()>;
}

#[derive(Debug, Deserialize)]
struct PresencePayload {
    #[serde(rename = "clientId")]
    client_id: String,
}

#[derive(Debug, Clone)]
pub struct Topics {
    shadow_prefix: String,
    telemetry: String,
}

impl Topics {
    pub fn new(thing_name: &str, telemetry: impl Into<String>) -> Self {
        Self {
            shadow_prefix: format!("$aws/things/{}/shadow", thing_name),
            telemetry: telemetry.into(),
        }
    }

    pub fn get(&self) -> String {
        format!("{}/get", self.shadow_prefix)
    }

    pub fn update(&self) -> String {
        format!("{}/update", self.shadow_prefix)
    }

    pub fn get_accepted(&self) -> String {
        format!("{}/get/accepted", self.shadow_prefix)
    }

    pub fn get_rejected(&self) -> String {
        format!("{}/get/rejected", self.shadow_prefix)
    }

    pub fn update_accepted(&self) -> String {
        format!("{}/update/accepted", self.shadow_prefix)
    }

    pub fn update_rejected(&self) -> String {
        format!("{}/update/rejected", self.shadow_prefix)
    }

    pub fn telemetry(&self) -> &str {
        &self.telemetry
    }

    pub fn outbound(&self, outbound: &Outbound) -> Message {
        match outbound {
            Outbound::GetShadow => Message::new(self.get(), Vec::new()),
            Outbound::Update(doc) => Message::new(self.update(), doc.to_payload()),
        }
    }

    /// `Ok(None)` for topics this host does not care about
    pub fn decode(&self, message: &Message) -> TwinResult<Option<Event>> {
        let topic = message.topic.as_str();
        let parse_err = |source| TwinError::Payload {
            topic: topic.to_string(),
            source,
        };

        let event = if topic == self.get_accepted() {
            Event::GetAccepted(serde_json::from_slice(&message.payload).map_err(parse_err)?)
        } else if topic == self.get_rejected() {
            Event::GetRejected(serde_json::from_slice(&message.payload).map_err(parse_err)?)
        } else if topic == self.update_accepted() {
            Event::UpdateAccepted(serde_json::from_slice(&message.payload).map_err(parse_err)?)
        } else if topic == self.update_rejected() {
            Event::UpdateRejected(serde_json::from_slice(&message.payload).map_err(parse_err)?)
        } else if topic == self.telemetry {
            Event::Telemetry(serde_json::from_slice(&message.payload).map_err(parse_err)?)
        } else if topic.starts_with(PRESENCE_CONNECTED) || topic.starts_with(PRESENCE_DISCONNECTED) {
            let presence: PresencePayload = serde_json::from_slice(&message.payload).map_err(parse_err)?;
            Event::Presence {
                client_id: presence.client_id,
                connected: topic.starts_with(PRESENCE_CONNECTED),
            }
        } else {
            return Ok(None);
        };
        Ok(Some(event))
    }
}

/// in-process transport; the receiving half goes to whoever plays the cloud
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn publish(&self, message: Message) -> TwinResult<()> {
        self.tx.send(message).map_err(|_| TwinError::Closed("transport"))
    }
}
