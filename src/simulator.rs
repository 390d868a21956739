//! ==============================================================================
//! simulator.rs - loopback shadow service and badge
//! ==============================================================================
//!
//! purpose:
//!     stands in for the cloud and the hardware so the host runs on any dev
//!     machine ("compile anywhere"). it sits on the far side of a
//!     ChannelTransport and plays two roles:
//!
//!     shadow service:
//!         - get before the first update   -> get/rejected 404
//!         - get afterwards                -> get/accepted with the document
//!         - update                        -> merge desired, update/accepted
//!
//!     badge firmware:
//!         - after `echo_delay`, applies every desired value, reports it and
//!           clears the desired key (desired: null, reported: value)
//!         - button press                  -> reported button_N = uptime seconds
//!         - while send_sensor_data is reported true, publishes telemetry
//!
//! relationships:
//!     - used by: main.rs when transport.mode = "simulated"
//!     - talks to: runtime.rs only through Message channels
//!
//! ==============================================================================

use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::attribute::Button;
use crate::domain::timestamp_ms;
use crate::error::{TwinError, TwinResult};
use crate::shadow::{ErrorResponse, ShadowDocument};
use crate::telemetry::{SensorReading, GRAVITY};
use crate::transport::{Message, Topics};

#[derive(Debug, Clone, Copy)]
pub struct SimulatorConfig {
    /// how long the badge takes to act on a desired change
    pub echo_delay: Duration,
    pub telemetry_interval: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            echo_delay: Duration::from_millis(300),
            telemetry_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
enum SimCommand {
    Press(Button),
    ClearButtons,
}

/// lets the dashboard poke the simulated hardware
#[derive(Clone)]
pub struct SimulatorHandle {
    commands: mpsc::UnboundedSender<SimCommand>,
}

impl SimulatorHandle {
    pub fn press(&self, button: Button) -> TwinResult<()> {
        self.commands
            .send(SimCommand::Press(button))
            .map_err(|_| TwinError::Closed("simulator"))
    }

    pub fn clear_buttons(&self) -> TwinResult<()> {
        self.commands
            .send(SimCommand::ClearButtons)
            .map_err(|_| TwinError::Closed("simulator"))
    }
}

pub struct SimulatedBadge {
    thing_name: String,
    topics: Topics,
    config: SimulatorConfig,
    exists: bool,
    version: u64,
    reported: Map<String, Value>,
    desired: Map<String, Value>,
    booted: Instant,
    to_host: mpsc::UnboundedSender<Message>,
}

impl SimulatedBadge {
    pub fn spawn(
        thing_name: &str,
        topics: Topics,
        config: SimulatorConfig,
        from_host: mpsc::UnboundedReceiver<Message>,
        to_host: mpsc::UnboundedSender<Message>,
    ) -> (SimulatorHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let badge = SimulatedBadge {
            thing_name: thing_name.to_string(),
            topics,
            config,
            exists: false,
            version: 0,
            reported: Map::new(),
            desired: Map::new(),
            booted: Instant::now(),
            to_host,
        };
        let task = tokio::spawn(badge.run(from_host, commands_rx));
        (SimulatorHandle { commands: commands_tx }, task)
    }

    async fn run(
        mut self,
        mut from_host: mpsc::UnboundedReceiver<Message>,
        mut commands: mpsc::UnboundedReceiver<SimCommand>,
    ) {
        info!(thing = %self.thing_name, "simulated badge online");
        self.send(
            format!("$aws/events/presence/connected/{}", self.thing_name),
            json!({ "clientId": self.thing_name, "eventType": "connected", "timestamp": timestamp_ms() }),
        );

        let mut echo_at: Option<Instant> = None;
        let mut telemetry = tokio::time::interval(self.config.telemetry_interval);
        telemetry.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                message = from_host.recv() => match message {
                    Some(message) => {
                        if self.handle_publish(message) && echo_at.is_none() {
                            echo_at = Some(Instant::now() + self.config.echo_delay);
                        }
                    }
                    None => break,
                },
                Some(command) = commands.recv() => match command {
                    SimCommand::Press(button) => self.press(button),
                    SimCommand::ClearButtons => self.clear_buttons(),
                },
                _ = sleep_until(echo_at) => {
                    echo_at = None;
                    self.apply_desired();
                }
                _ = telemetry.tick(), if self.sending_sensor_data() => self.publish_reading(),
            }
        }
        info!(thing = %self.thing_name, "simulated badge offline");
    }

    /// returns true when the desired state changed and the badge should react
    fn handle_publish(&mut self, message: Message) -> bool {
        if message.topic == self.topics.get() {
            self.answer_get();
            false
        } else if message.topic == self.topics.update() {
            self.accept_update(&message.payload)
        } else {
            debug!(topic = %message.topic, "simulator ignoring publish");
            false
        }
    }

    fn answer_get(&mut self) {
        if !self.exists {
            let rejection = ErrorResponse::not_found(&self.thing_name);
            self.send(self.topics.get_rejected(), json!(rejection));
            return;
        }

        let mut state = Map::new();
        if !self.reported.is_empty() {
            state.insert("reported".to_string(), Value::Object(self.reported.clone()));
        }
        if !self.desired.is_empty() {
            state.insert("desired".to_string(), Value::Object(self.desired.clone()));
        }
        let doc = json!({ "state": state, "version": self.version, "timestamp": timestamp_ms() / 1000 });
        self.send(self.topics.get_accepted(), doc);
    }

    fn accept_update(&mut self, payload: &[u8]) -> bool {
        let doc = match serde_json::from_slice::<ShadowDocument>(payload) {
            Ok(doc) if doc.state.is_some() => doc,
            Ok(_) | Err(_) => {
                warn!("simulator rejecting malformed update");
                let rejection = ErrorResponse {
                    code: 400,
                    message: "Missing required node: state".to_string(),
                    client_token: None,
                };
                self.send(self.topics.update_rejected(), json!(rejection));
                return false;
            }
        };

        let incoming = doc.desired().cloned().unwrap_or_default();
        merge(&mut self.desired, &incoming);
        if let Some(reported) = doc.reported() {
            merge(&mut self.reported, reported);
        }
        self.exists = true;
        self.version += 1;

        let ack = json!({
            "state": { "desired": incoming },
            "version": self.version,
            "timestamp": timestamp_ms() / 1000,
        });
        self.send(self.topics.update_accepted(), ack);
        !incoming.is_empty()
    }

    /// what the firmware does with a delta: apply, report, clear desired
    fn apply_desired(&mut self) {
        if self.desired.is_empty() {
            return;
        }
        let applied = std::mem::take(&mut self.desired);
        let cleared: Map<String, Value> = applied.keys().map(|k| (k.clone(), Value::Null)).collect();
        for (key, value) in &applied {
            debug!(key = %key, value = %value, "badge applied desired value");
            self.reported.insert(key.clone(), value.clone());
        }
        self.report(json!({ "desired": cleared, "reported": applied }));
    }

    fn press(&mut self, button: Button) {
        // firmware reports whole seconds of uptime; 0 is reserved for "cleared"
        let uptime = self.booted.elapsed().as_secs().max(1);
        info!(button = %button, uptime, "simulated button press");
        self.reported.insert(button.key().to_string(), Value::from(uptime));
        let mut reported = Map::new();
        reported.insert(button.key().to_string(), Value::from(uptime));
        self.report(json!({ "reported": reported }));
    }

    fn clear_buttons(&mut self) {
        let mut reported = Map::new();
        for button in Button::ALL {
            self.reported.insert(button.key().to_string(), Value::from(0));
            reported.insert(button.key().to_string(), Value::from(0));
        }
        self.report(json!({ "reported": reported }));
    }

    fn report(&mut self, state: Value) {
        self.exists = true;
        self.version += 1;
        let doc = json!({ "state": state, "version": self.version, "timestamp": timestamp_ms() / 1000 });
        self.send(self.topics.update_accepted(), doc);
    }

    fn sending_sensor_data(&self) -> bool {
        self.reported.get("send_sensor_data").and_then(Value::as_bool).unwrap_or(false)
    }

    fn publish_reading(&mut self) {
        let t = self.booted.elapsed().as_secs_f64();
        let reading = SensorReading {
            source: Some(self.thing_name.clone()),
            temperature: Some(22.0 + (t / 60.0).sin()),
            humidity: Some(45.0 + 5.0 * (t / 90.0).cos()),
            light: Some(180.0),
            acceleration_x: Some(0.0),
            acceleration_y: Some(0.3 * (t / 5.0).sin()),
            acceleration_z: Some(GRAVITY),
            angular_velocity_x: Some(0.0),
            angular_velocity_y: Some(0.0),
            angular_velocity_z: Some(0.0),
        };
        self.send(self.topics.telemetry().to_string(), json!(reading));
    }

    fn send(&self, topic: String, body: Value) {
        if self.to_host.send(Message::new(topic, body.to_string())).is_err() {
            debug!("host side of simulated transport is gone");
        }
    }
}

/// shadow merge: null deletes a key
fn merge(target: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (key, value) in incoming {
        if value.is_null() {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttrValue, Attribute};
    use crate::reconciler::{Notification, ReconcilerConfig};
    use crate::runtime::TwinRuntime;
    use crate::transport::ChannelTransport;
    use std::sync::Arc;

    struct Rig {
        runtime: TwinRuntime,
        simulator: SimulatorHandle,
        notes: mpsc::UnboundedReceiver<Notification>,
    }

    fn rig() -> Rig {
        let topics = Topics::new("badge", "demo_badge/sensors");
        let (transport, from_host) = ChannelTransport::new();
        let (to_host, inbound) = mpsc::unbounded_channel();
        let (notes_tx, notes) = mpsc::unbounded_channel();

        let (simulator, _sim) =
            SimulatedBadge::spawn("badge", topics.clone(), SimulatorConfig::default(), from_host, to_host);
        let (runtime, _rt) = TwinRuntime::start(
            ReconcilerConfig::default(),
            topics,
            Arc::new(transport),
            Arc::new(notes_tx),
            inbound,
        );
        Rig {
            runtime,
            simulator,
            notes,
        }
    }

    async fn wait_for<F>(notes: &mut mpsc::UnboundedReceiver<Notification>, mut pred: F) -> Notification
    where
        F: FnMut(&Notification) -> bool,
    {
        let fut = async {
            loop {
                let note = notes.recv().await.expect("runtime stopped");
                if pred(&note) {
                    return note;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(30), fut)
            .await
            .expect("notification never arrived")
    }

    fn confirmed(attribute: Attribute, value: AttrValue) -> impl FnMut(&Notification) -> bool {
        move |n| *n == Notification::Confirmed { attribute, value: value.clone() }
    }

    #[test]
    fn test_merge_null_deletes() {
        let mut target = Map::new();
        target.insert("a".into(), json!(1));
        target.insert("b".into(), json!(2));
        let incoming = json!({"a": null, "c": 3});
        merge(&mut target, incoming.as_object().unwrap());
        assert_eq!(Value::Object(target), json!({"b": 2, "c": 3}));
    }

    #[tokio::test]
    async fn test_update_is_parsed_or_rejected() {
        let topics = Topics::new("badge", "demo_badge/sensors");
        let (to_host, mut inbound) = mpsc::unbounded_channel();
        let mut badge = SimulatedBadge {
            thing_name: "badge".into(),
            topics: topics.clone(),
            config: SimulatorConfig::default(),
            exists: false,
            version: 0,
            reported: Map::new(),
            desired: Map::new(),
            booted: Instant::now(),
            to_host,
        };

        assert!(badge.accept_update(br#"{"state":{"desired":{"user_led":"on"}}}"#));
        let ack = inbound.try_recv().unwrap();
        assert_eq!(ack.topic, topics.update_accepted());
        assert_eq!(badge.desired["user_led"], "on");
        assert_eq!(badge.version, 1);

        for bad in [&b"{oops"[..], &b"{}"[..]] {
            assert!(!badge.accept_update(bad));
            let rejection = inbound.try_recv().unwrap();
            assert_eq!(rejection.topic, topics.update_rejected());
            let err: ErrorResponse = serde_json::from_slice(&rejection.payload).unwrap();
            assert_eq!(err.code, 400);
        }
        assert_eq!(badge.version, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_badge_converges_to_baseline() {
        let mut rig = rig();
        // confirmations arrive in attribute order: leds before picture
        wait_for(&mut rig.notes, confirmed(Attribute::Led3, AttrValue::Color(0xF0961A))).await;
        wait_for(&mut rig.notes, confirmed(Attribute::Picture, AttrValue::Choice("bear".into()))).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_round_trips_through_badge() {
        let mut rig = rig();
        wait_for(&mut rig.notes, confirmed(Attribute::UserLed, AttrValue::Choice("off".into()))).await;

        rig.runtime.edit("user_led", &json!("blinking")).unwrap();
        wait_for(&mut rig.notes, confirmed(Attribute::UserLed, AttrValue::Choice("blinking".into()))).await;

        rig.runtime.edit("send_sensor_data", &json!(true)).unwrap();
        wait_for(&mut rig.notes, |n| matches!(n, Notification::Telemetry(_))).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_button_press_shows_indicator() {
        let mut rig = rig();
        wait_for(&mut rig.notes, confirmed(Attribute::Picture, AttrValue::Choice("bear".into()))).await;

        tokio::time::advance(Duration::from_secs(3)).await;
        rig.simulator.press(Button::Button2).unwrap();
        let pressed = wait_for(&mut rig.notes, |n| matches!(n, Notification::Button { .. })).await;
        match pressed {
            Notification::Button { button, indicator } => {
                assert_eq!(button, Button::Button2);
                assert!(indicator.visible);
                assert!(indicator.last_pressed >= 3);
            }
            other => panic!("unexpected {:?}", other),
        }

        rig.simulator.clear_buttons().unwrap();
        wait_for(&mut rig.notes, |n| {
            matches!(n, Notification::Button { button: Button::Button2, indicator } if !indicator.visible && indicator.last_pressed == 0)
        })
        .await;
    }
}
