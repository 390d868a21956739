//! ==============================================================================
//! reconciler.rs - shadow state arbitration and debounced desired writes
//! ==============================================================================
//!
//! purpose:
//!     single source of truth for what the host believes the badge's shadow
//!     state is. sits between local edits (dashboard) and cloud-confirmed
//!     reported state so the dashboard never flips back to a stale value while
//!     a local edit is still in flight.
//!
//! per attribute:
//!
//!     Unset ──edit──> PendingLocal ──reported == desired──> Reconciled
//!       │                 │  ^                                 │
//!       │                 │  └──────────────edit───────────────┘
//!       │            reported != desired: ignored
//!       └──reported (no desired)──> Reconciled
//!
//! timing:
//!     nothing in here sleeps. every operation takes `now`, and the owner
//!     (runtime.rs) sleeps until `next_deadline()` and calls `on_timers()`.
//!     edits arm a per-attribute debounce deadline; button presses arm a
//!     per-button fade tick.
//!
//! output:
//!     operations return `Effect`s (publish this, tell the dashboard that)
//!     instead of calling out, which keeps this module free of io.
//!
//! ==============================================================================

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::attribute::{AttrValue, Attribute, Button};
use crate::shadow::{DesiredDocument, ErrorResponse, ShadowDocument};
use crate::telemetry::SensorReading;
use crate::timers::Timers;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(750);
pub const DEFAULT_FADE_STEPS: u32 = 40;
pub const DEFAULT_FADE_DELAY: Duration = Duration::from_millis(50);

/// console sessions show up in presence events too; they are not badges
const CONSOLE_CLIENT_PREFIX: &str = "iotconsole-";

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    pub debounce: Duration,
    pub fade_steps: u32,
    pub fade_delay: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            fade_steps: DEFAULT_FADE_STEPS,
            fade_delay: DEFAULT_FADE_DELAY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeState {
    /// last value confirmed by the badge
    pub reported: Option<AttrValue>,
    /// locally requested value not yet echoed back as reported
    pub desired: Option<AttrValue>,
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unset,
    PendingLocal,
    Reconciled,
}

#[cfg(test)]
impl AttributeState {
    pub fn phase(&self) -> Phase {
        match (&self.desired, &self.reported) {
            (Some(_), _) => Phase::PendingLocal,
            (None, Some(_)) => Phase::Reconciled,
            (None, None) => Phase::Unset,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ButtonIndicator {
    /// press time reported by the badge; 0 means cleared
    pub last_pressed: u64,
    /// decay counter, peak right after a press
    pub visibility: u32,
    pub visible: bool,
}

impl ButtonIndicator {
    pub fn opacity(&self) -> f32 {
        if !self.visible {
            return 0.0;
        }
        (self.visibility as f32 / 10.0).min(1.0)
    }
}

/// everything the reconciler reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    GetAccepted(ShadowDocument),
    GetRejected(ErrorResponse),
    UpdateAccepted(ShadowDocument),
    UpdateRejected(ErrorResponse),
    Telemetry(SensorReading),
    Presence { client_id: String, connected: bool },
    LocalEdit { attribute: Attribute, value: AttrValue },
    /// ask the cloud for the full shadow again
    Refresh,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    GetShadow,
    Update(DesiredDocument),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// badge confirmed this value
    Confirmed { attribute: Attribute, value: AttrValue },
    /// local edit to display optimistically
    Pending { attribute: Attribute, value: AttrValue },
    Button { button: Button, indicator: ButtonIndicator },
    Telemetry(SensorReading),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Publish(Outbound),
    Notify(Notification),
}

pub struct ShadowReconciler {
    config: ReconcilerConfig,
    attributes: BTreeMap<Attribute, AttributeState>,
    buttons: BTreeMap<Button, ButtonIndicator>,
    publish_timers: Timers<Attribute, AttrValue>,
    fade_timers: Timers<Button>,
}

impl ShadowReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            attributes: BTreeMap::new(),
            buttons: BTreeMap::new(),
            publish_timers: Timers::new(),
            fade_timers: Timers::new(),
        }
    }

    #[cfg(test)]
    pub fn state(&self, attribute: Attribute) -> AttributeState {
        self.attributes.get(&attribute).cloned().unwrap_or_default()
    }

    #[cfg(test)]
    pub fn button(&self, button: Button) -> ButtonIndicator {
        self.buttons.get(&button).copied().unwrap_or_default()
    }

    /// what the dashboard currently shows: pending edit, else confirmed, else default
    pub fn display_value(&self, attribute: Attribute) -> Option<AttrValue> {
        let state = self.attributes.get(&attribute);
        state
            .and_then(|s| s.desired.clone().or_else(|| s.reported.clone()))
            .or_else(|| attribute.default_value())
    }

    #[cfg(test)]
    pub fn has_pending_publish(&self, attribute: Attribute) -> bool {
        self.publish_timers.is_scheduled(attribute)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.publish_timers.next_deadline(), self.fade_timers.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// single entry point for inbound traffic and user intents
    pub fn handle_event(&mut self, event: Event, now: Instant) -> Vec<Effect> {
        match event {
            Event::GetAccepted(doc) => self.on_get_accepted(&doc, now),
            Event::GetRejected(err) => self.on_get_rejected(&err),
            Event::UpdateAccepted(doc) => self.on_update_accepted(&doc, now),
            Event::UpdateRejected(err) => {
                self.on_update_rejected(&err);
                Vec::new()
            }
            Event::Telemetry(reading) => self.on_telemetry(reading),
            Event::Presence { client_id, connected } => {
                if !client_id.starts_with(CONSOLE_CLIENT_PREFIX) {
                    info!(client_id = %client_id, connected, "badge presence changed");
                }
                Vec::new()
            }
            Event::LocalEdit { attribute, value } => self.on_local_edit(attribute, value, now),
            Event::Refresh => vec![Effect::Publish(Outbound::GetShadow)],
        }
    }

    // ==========================================================================
    // local edits and the debouncer
    // ==========================================================================

    /// record the edit as desired right away; publish after a quiet period
    pub fn on_local_edit(&mut self, attribute: Attribute, value: AttrValue, now: Instant) -> Vec<Effect> {
        if !attribute.is_writable() {
            warn!(attribute = %attribute, "ignoring edit of report-only attribute");
            return Vec::new();
        }
        if !attribute.accepts(&value) {
            warn!(attribute = %attribute, value = %value, "ignoring edit with mismatched value");
            return Vec::new();
        }

        self.attributes.entry(attribute).or_default().desired = Some(value.clone());

        let deadline = now + self.config.debounce;
        if self.publish_timers.schedule(attribute, deadline, value.clone()).is_some() {
            trace!(attribute = %attribute, "debounce restarted");
        }

        vec![Effect::Notify(Notification::Pending { attribute, value })]
    }

    /// fire due debounce publishes and fade ticks
    pub fn on_timers(&mut self, now: Instant) -> Vec<Effect> {
        let mut out = Vec::new();

        for (attribute, value) in self.publish_timers.take_expired(now) {
            info!(attribute = %attribute, value = %value, "update shadow with new desired state");
            out.push(Effect::Publish(Outbound::Update(DesiredDocument::single(attribute, value))));
        }

        for (button, ()) in self.fade_timers.take_expired(now) {
            self.fade_tick(button, now, &mut out);
        }

        out
    }

    // ==========================================================================
    // reported state
    // ==========================================================================

    /// arbitrate a (partial) reported snapshot against pending edits
    pub fn on_reported_update(&mut self, reported: &Map<String, Value>, now: Instant) -> Vec<Effect> {
        let mut out = Vec::new();

        for button in Button::ALL {
            if let Some(raw) = reported.get(button.key()) {
                self.apply_button(button, raw, now, &mut out);
            }
        }

        for attribute in Attribute::ALL {
            let Some(raw) = reported.get(attribute.key()) else {
                continue;
            };
            match attribute.decode(raw) {
                Ok(value) => self.apply_reported(attribute, value, &mut out),
                Err(e) => debug!(error = %e, "skipping reported field"),
            }
        }

        out
    }

    pub fn on_get_accepted(&mut self, doc: &ShadowDocument, now: Instant) -> Vec<Effect> {
        let Some(reported) = doc.reported() else {
            info!("shadow has no reported state, setting default desired state");
            return vec![self.seed_baseline()];
        };

        let mut out = self.on_reported_update(reported, now);
        for attribute in Attribute::REQUIRED {
            if !reported.contains_key(attribute.key()) {
                self.publish_now(attribute, &mut out);
            }
        }
        out
    }

    pub fn on_get_rejected(&mut self, err: &ErrorResponse) -> Vec<Effect> {
        if err.is_not_found() {
            info!("shadow not found, setting default desired state");
            self.reset();
            vec![self.seed_baseline()]
        } else {
            warn!(code = err.code, message = %err.message, "shadow get rejected");
            Vec::new()
        }
    }

    pub fn on_update_accepted(&mut self, doc: &ShadowDocument, now: Instant) -> Vec<Effect> {
        match doc.reported() {
            Some(reported) => self.on_reported_update(reported, now),
            None => {
                trace!(version = ?doc.version, "desired update accepted");
                Vec::new()
            }
        }
    }

    /// best effort: the edit stays pending until a matching report or a newer edit
    pub fn on_update_rejected(&mut self, err: &ErrorResponse) {
        warn!(code = err.code, message = %err.message, "shadow update rejected");
    }

    /// sensor fields are report-only attributes fed by the telemetry topic
    pub fn on_telemetry(&mut self, reading: SensorReading) -> Vec<Effect> {
        let mut out = Vec::new();
        for (attribute, value) in reading.fields() {
            self.apply_reported(attribute, AttrValue::Reading(value), &mut out);
        }
        out.push(Effect::Notify(Notification::Telemetry(reading)));
        out
    }

    /// desired document for a shadow without reported state; built from the
    /// current local values so repeated seeding is deterministic
    pub fn baseline_document(&self) -> DesiredDocument {
        let mut doc = DesiredDocument::default();
        for attribute in Attribute::BASELINE {
            if let Some(value) = self.display_value(attribute) {
                doc.insert(attribute, value);
            }
        }
        doc
    }

    /// forget reported state; local edits stay pending and their debounce
    /// timers keep running, so the baseline is seeded with the edited values
    pub fn reset(&mut self) {
        self.attributes.retain(|_, state| {
            state.reported = None;
            state.desired.is_some()
        });
    }

    // ==========================================================================
    // internals
    // ==========================================================================

    fn apply_reported(&mut self, attribute: Attribute, value: AttrValue, out: &mut Vec<Effect>) {
        let state = self.attributes.entry(attribute).or_default();
        if let Some(desired) = &state.desired {
            if *desired != value {
                debug!(attribute = %attribute, desired = %desired, reported = %value, "waiting for pending desired value");
                return;
            }
            debug!(attribute = %attribute, value = %value, "desired value confirmed");
            state.desired = None;
        }
        state.reported = Some(value.clone());
        out.push(Effect::Notify(Notification::Confirmed { attribute, value }));
    }

    fn apply_button(&mut self, button: Button, raw: &Value, now: Instant, out: &mut Vec<Effect>) {
        let Some(timestamp) = raw.as_u64() else {
            debug!(button = %button, value = %raw, "skipping non-timestamp button value");
            return;
        };

        let indicator = self.buttons.entry(button).or_default();
        if timestamp > indicator.last_pressed {
            indicator.last_pressed = timestamp;
            indicator.visibility = self.config.fade_steps;
            indicator.visible = true;
            let snapshot = *indicator;
            self.fade_timers.schedule(button, now + self.config.fade_delay, ());
            out.push(Effect::Notify(Notification::Button { button, indicator: snapshot }));
        } else if timestamp == 0 {
            let cleared = ButtonIndicator::default();
            let changed = *indicator != cleared;
            *indicator = cleared;
            self.fade_timers.cancel(button);
            if changed {
                out.push(Effect::Notify(Notification::Button { button, indicator: cleared }));
            }
        }
    }

    fn fade_tick(&mut self, button: Button, now: Instant, out: &mut Vec<Effect>) {
        let indicator = self.buttons.entry(button).or_default();
        indicator.visibility = indicator.visibility.saturating_sub(1);
        if indicator.visibility == 0 {
            indicator.visible = false;
        } else {
            self.fade_timers.schedule(button, now + self.config.fade_delay, ());
        }
        out.push(Effect::Notify(Notification::Button {
            button,
            indicator: *indicator,
        }));
    }

    fn seed_baseline(&self) -> Effect {
        Effect::Publish(Outbound::Update(self.baseline_document()))
    }

    /// immediate single-attribute write of the current local value
    fn publish_now(&mut self, attribute: Attribute, out: &mut Vec<Effect>) {
        let Some(value) = self.display_value(attribute) else {
            return;
        };
        info!(attribute = %attribute, value = %value, "badge never reported attribute, publishing local value");
        self.publish_timers.cancel(attribute);
        self.attributes.entry(attribute).or_default().desired = Some(value.clone());
        out.push(Effect::Publish(Outbound::Update(DesiredDocument::single(attribute, value))));
    }
}

impl Default for ShadowReconciler {
    fn default() -> Self {
        Self::new(ReconcilerConfig::default())
    }
}
