//! ==============================================================================
//! runtime.rs - the shadow actor and its clone-able handle
//! ==============================================================================
//!
//! purpose:
//!     owns the ShadowReconciler inside exactly one tokio task. everything that
//!     touches shadow state is serialized through that task:
//!
//!       - local edits and refreshes from the dashboard (TwinRuntime handle)
//!       - inbound transport messages (decoded via Topics)
//!       - debounce / fade deadlines (sleep until the earliest one)
//!
//!     so the attribute table needs no lock.
//!
//! relationships:
//!     - used by: main.rs (starts it, hands the handle to the web server)
//!     - uses: reconciler.rs (all state decisions)
//!     - uses: transport.rs (outbound publish, inbound decode)
//!
//! architecture:
//!
//!     dashboard ──TwinRuntime::edit──┐
//!                                    ▼
//!     transport ──Message──> ┌──────────────┐ ──Message──> transport
//!                            │ ShadowActor  │
//!     deadlines ──wake─────> │ (reconciler) │ ──Notification──> presentation
//!                            └──────────────┘
//!
//! ==============================================================================

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::attribute::Attribute;
use crate::error::{TwinError, TwinResult};
use crate::reconciler::{Effect, Event, Notification, Outbound, ReconcilerConfig, ShadowReconciler};
use crate::transport::{Message, Topics, Transport};

/// where confirmed/pending values and indicator changes are sent
pub trait Presentation: Send + Sync {
    fn notify(&self, notification: Notification);
}

impl Presentation for mpsc::UnboundedSender<Notification> {
    fn notify(&self, notification: Notification) {
        if self.send(notification).is_err() {
            trace!("presentation channel closed, dropping notification");
        }
    }
}

// ==============================================================================
// handle - the public interface
// ==============================================================================

#[derive(Clone)]
pub struct TwinRuntime {
    events: mpsc::UnboundedSender<Event>,
}

impl TwinRuntime {
    /// spawn the actor; it requests the shadow document as its first action
    pub fn start(
        config: ReconcilerConfig,
        topics: Topics,
        transport: Arc<dyn Transport>,
        presentation: Arc<dyn Presentation>,
        inbound: mpsc::UnboundedReceiver<Message>,
    ) -> (Self, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let actor = ShadowActor {
            reconciler: ShadowReconciler::new(config),
            topics,
            transport,
            presentation,
        };
        let task = tokio::spawn(actor.run(events_rx, inbound));
        (Self { events: events_tx }, task)
    }

    pub fn send(&self, event: Event) -> TwinResult<()> {
        self.events.send(event).map_err(|_| TwinError::Closed("shadow runtime"))
    }

    /// validate a dashboard edit and queue it; nothing changes on error
    pub fn edit(&self, name: &str, raw: &Value) -> TwinResult<()> {
        let event = Self::local_edit(name, raw).map_err(|e| {
            warn!(attribute = %name, error = %e, "local edit ignored");
            e
        })?;
        self.send(event)
    }

    fn local_edit(name: &str, raw: &Value) -> TwinResult<Event> {
        let attribute: Attribute = name.parse()?;
        if !attribute.is_writable() {
            return Err(TwinError::ReportOnly(attribute.key()));
        }
        let value = attribute.decode(raw)?;
        Ok(Event::LocalEdit { attribute, value })
    }

    pub fn refresh(&self) -> TwinResult<()> {
        self.send(Event::Refresh)
    }
}

// ==============================================================================
// actor
// ==============================================================================

struct ShadowActor {
    reconciler: ShadowReconciler,
    topics: Topics,
    transport: Arc<dyn Transport>,
    presentation: Arc<dyn Presentation>,
}

impl ShadowActor {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut inbound: mpsc::UnboundedReceiver<Message>,
    ) {
        info!(topic = %self.topics.get(), "requesting initial shadow document");
        self.dispatch(vec![Effect::Publish(Outbound::GetShadow)]);

        loop {
            let deadline = self.reconciler.next_deadline();
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        debug!("all runtime handles dropped, stopping shadow actor");
                        break;
                    }
                },
                message = inbound.recv() => match message {
                    Some(message) => self.handle_message(message),
                    None => {
                        warn!("transport closed, stopping shadow actor");
                        break;
                    }
                },
                _ = sleep_until(deadline) => {
                    let effects = self.reconciler.on_timers(Instant::now());
                    self.dispatch(effects);
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        let effects = self.reconciler.handle_event(event, Instant::now());
        self.dispatch(effects);
    }

    fn handle_message(&mut self, message: Message) {
        match self.topics.decode(&message) {
            Ok(Some(event)) => self.handle_event(event),
            Ok(None) => trace!(topic = %message.topic, "ignoring message"),
            Err(e) => warn!(error = %e, "dropping undecodable message"),
        }
    }

    fn dispatch(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Publish(outbound) => {
                    let message = self.topics.outbound(&outbound);
                    debug!(topic = %message.topic, bytes = message.payload.len(), "publish");
                    if let Err(e) = self.transport.publish(message) {
                        warn!(error = %e, "publish failed");
                    }
                }
                Effect::Notify(notification) => self.presentation.notify(notification),
            }
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
    use crate::attribute::AttrValue;
    use crate::reconciler::DEFAULT_DEBOUNCE;
    use crate::transport::ChannelTransport;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        runtime: TwinRuntime,
        topics: Topics,
        outbound: mpsc::UnboundedReceiver<Message>,
        inbound: mpsc::UnboundedSender<Message>,
        notes: mpsc::UnboundedReceiver<Notification>,
    }

    async fn harness() -> Harness {
        let topics = Topics::new("badge", "demo_badge/sensors");
        let (transport, mut outbound) = ChannelTransport::new();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (notes_tx, notes) = mpsc::unbounded_channel();
        let (runtime, _task) = TwinRuntime::start(
            ReconcilerConfig::default(),
            topics.clone(),
            Arc::new(transport),
            Arc::new(notes_tx),
            inbound_rx,
        );

        let first = outbound.recv().await.unwrap();
        assert_eq!(first.topic, topics.get());

        Harness {
            runtime,
            topics,
            outbound,
            inbound: inbound_tx,
            notes,
        }
    }

    fn payload(message: &Message) -> Value {
        serde_json::from_slice(&message.payload).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_publishes_after_debounce_and_reconciles_on_echo() {
        let mut h = harness().await;

        h.runtime.edit("led_1", &json!(0xFF0000)).unwrap();
        assert_eq!(
            h.notes.recv().await.unwrap(),
            Notification::Pending {
                attribute: Attribute::Led1,
                value: AttrValue::Color(0xFF0000)
            }
        );
        let edited_at = Instant::now();

        tokio::time::advance(DEFAULT_DEBOUNCE - Duration::from_millis(10)).await;
        assert!(h.outbound.try_recv().is_err());

        let update = h.outbound.recv().await.unwrap();
        assert!(Instant::now() - edited_at >= DEFAULT_DEBOUNCE);
        assert_eq!(update.topic, h.topics.update());
        assert_eq!(payload(&update), json!({"state": {"desired": {"led_1": 0xFF0000}}}));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(h.outbound.try_recv().is_err());

        h.inbound
            .send(Message::new(
                h.topics.update_accepted(),
                json!({"state": {"reported": {"led_1": 0xFF0000}}}).to_string(),
            ))
            .unwrap();
        assert_eq!(
            h.notes.recv().await.unwrap(),
            Notification::Confirmed {
                attribute: Attribute::Led1,
                value: AttrValue::Color(0xFF0000)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_edits_sends_only_last_value() {
        let mut h = harness().await;

        for level in [10, 20, 30, 40, 55] {
            h.runtime.edit("led_brightness", &json!(level)).unwrap();
            h.notes.recv().await.unwrap();
            tokio::time::advance(Duration::from_millis(200)).await;
        }

        let update = h.outbound.recv().await.unwrap();
        assert_eq!(payload(&update), json!({"state": {"desired": {"led_brightness": 55}}}));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(h.outbound.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_seeds_defaults() {
        let mut h = harness().await;
        h.inbound
            .send(Message::new(h.topics.get_rejected(), r#"{"code":404,"message":"missing"}"#))
            .unwrap();

        let seed = h.outbound.recv().await.unwrap();
        let desired = &payload(&seed)["state"]["desired"];
        assert_eq!(desired["picture"], "bear");
        assert_eq!(desired["user_led"], "off");
        assert_eq!(desired["display_brightness"], 100);
    }

    #[tokio::test]
    async fn test_invalid_edits_are_rejected_without_effect() {
        let mut h = harness().await;
        assert!(matches!(
            h.runtime.edit("led_7", &json!(1)),
            Err(TwinError::UnknownAttribute(_))
        ));
        assert!(matches!(
            h.runtime.edit("temperature", &json!(1.0)),
            Err(TwinError::ReportOnly(_))
        ));
        assert!(matches!(
            h.runtime.edit("user_led", &json!("disco")),
            Err(TwinError::InvalidValue { .. })
        ));

        h.runtime.refresh().unwrap();
        let get = h.outbound.recv().await.unwrap();
        assert_eq!(get.topic, h.topics.get());
        assert!(h.notes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_garbage_does_not_stop_the_actor() {
        let mut h = harness().await;
        h.inbound.send(Message::new(h.topics.update_accepted(), "{oops")).unwrap();
        h.inbound
            .send(Message::new(
                h.topics.update_accepted(),
                json!({"state": {"reported": {"humidity": 40.0}}}).to_string(),
            ))
            .unwrap();

        assert_eq!(
            h.notes.recv().await.unwrap(),
            Notification::Confirmed {
                attribute: Attribute::Humidity,
                value: AttrValue::Reading(40.0)
            }
        );
    }
}
