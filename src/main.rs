//! ==============================================================================
//! main.rs - badge twin host entry point
//! ==============================================================================
//!
//! purpose:
//!     mirrors a workshop badge's device shadow into a local digital twin.
//!     dashboard edits are debounced into desired-state publishes, reported
//!     state from the badge confirms them, and button presses / telemetry
//!     show up as they arrive.
//!
//! responsibilities:
//!     - load host.toml and bring up logging
//!     - wire transport, shadow actor and (simulated) badge together
//!     - fold presentation notifications into the dashboard state
//!     - forward telemetry to an ingestion endpoint when configured
//!     - serve the dashboard and the edit api
//!
//! relationships:
//!     - uses: runtime.rs (shadow actor handle)
//!     - uses: simulator.rs (cloud + badge stand-in)
//!     - uses: domain.rs (what the dashboard renders)
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                    rust host (this file)                     │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//!     │  │ web server  │  │ shadow      │  │ presentation loop   │  │
//!     │  │ (port 3000) │─>│ actor       │─>│ (AppState, forward) │  │
//!     │  └─────────────┘  └──────┬──────┘  └─────────────────────┘  │
//!     └──────────────────────────┼──────────────────────────────────┘
//!                                │ topic messages
//!                         ┌──────┴──────┐
//!                         │ simulated   │
//!                         │ shadow+badge│
//!                         └─────────────┘
//!
//! ==============================================================================

mod attribute;
mod config;
mod domain;
mod error;
mod reconciler;
mod runtime;
mod shadow;
mod simulator;
mod telemetry;
mod timers;
mod transport;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;

use crate::attribute::Button;
use crate::domain::AppState;
use crate::error::TwinError;
use crate::reconciler::Notification;
use crate::runtime::TwinRuntime;
use crate::simulator::{SimulatedBadge, SimulatorHandle};
use crate::telemetry::TelemetryForwarder;
use crate::transport::{ChannelTransport, Topics};

// ==============================================================================
// shared state
// ==============================================================================
// the web handlers read AppState (written only by the presentation loop) and
// talk to the shadow actor and the simulated badge through their handles.

#[derive(Clone)]
struct WebState {
    view: Arc<RwLock<AppState>>,
    runtime: TwinRuntime,
    simulator: SimulatorHandle,
}

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  Badge Twin Host");
    println!("  \"Edit locally, converge on the shadow\"");
    println!("===========================================================");

    // step 1: load configuration
    let config = config::HostConfig::load_or_default();
    config.print_summary();

    // step 2: logging; RUST_LOG wins over logging.level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // step 3: transport and simulated badge
    let thing_name = config.device.thing_name.clone();
    let topics = Topics::new(&thing_name, config.telemetry.topic.clone());
    let (transport, to_cloud) = ChannelTransport::new();
    let (to_host, inbound) = mpsc::unbounded_channel();
    let (simulator, _badge) = SimulatedBadge::spawn(
        &thing_name,
        topics.clone(),
        config.transport.simulator_config(),
        to_cloud,
        to_host,
    );
    info!(mode = %config.transport.mode, "transport ready");

    // step 4: shadow actor
    let (notes_tx, notes_rx) = mpsc::unbounded_channel();
    let (runtime, actor) = TwinRuntime::start(
        config.shadow.reconciler_config(),
        topics,
        Arc::new(transport),
        Arc::new(notes_tx),
        inbound,
    );

    // step 5: presentation loop
    let view = Arc::new(RwLock::new(AppState::new(thing_name.clone())));
    let forwarder = config.telemetry.forward_url.as_ref().map(|url| {
        info!(url = %url, "forwarding telemetry");
        TelemetryForwarder::new(url.clone(), thing_name.clone())
    });
    tokio::spawn(present(
        notes_rx,
        view.clone(),
        config.logging.show_sensor_data,
        forwarder,
    ));

    // step 6: web server in background
    let web = WebState {
        view,
        runtime,
        simulator,
    };
    let bind = config.server.bind.clone();
    tokio::spawn(async move {
        info!(bind = %bind, "dashboard live");
        if let Err(e) = run_server(&bind, web).await {
            error!(error = %e, "web server error");
        }
    });

    println!("────────────────────────────────────────────────────────────");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
        result = actor => match result {
            Ok(()) => warn!("shadow actor stopped"),
            Err(e) => error!(error = %e, "shadow actor panicked"),
        },
    }
    Ok(())
}

/// folds notifications into AppState; the only writer of the dashboard view
async fn present(
    mut notes: mpsc::UnboundedReceiver<Notification>,
    view: Arc<RwLock<AppState>>,
    show_data: bool,
    forwarder: Option<TelemetryForwarder>,
) {
    while let Some(note) = notes.recv().await {
        match &note {
            Notification::Telemetry(reading) => {
                if show_data {
                    info!("[SENSORS] {}", reading.summary());
                }
                if let Some(forwarder) = &forwarder {
                    let forwarder = forwarder.clone();
                    let reading = reading.clone();
                    tokio::spawn(async move {
                        if let Err(e) = forwarder.push(&reading).await {
                            warn!(error = %format!("{:#}", e), "telemetry forward failed");
                        }
                    });
                }
            }
            Notification::Confirmed { attribute, value } => {
                debug!(attribute = %attribute, value = %value, "confirmed");
            }
            Notification::Pending { attribute, value } => {
                debug!(attribute = %attribute, value = %value, "pending");
            }
            Notification::Button { button, indicator } => {
                debug!(button = %button, visible = indicator.visible, "indicator");
            }
        }
        view.write().await.apply(&note, domain::timestamp_ms());
    }
}

// ==============================================================================
// web server
// ==============================================================================

async fn run_server(bind: &str, state: WebState) -> Result<()> {
    let app = Router::new()
        .route("/", get(dashboard_handler))
        .route("/api", get(api_handler))
        .route("/api/shadow/refresh", post(refresh_handler))
        .route("/api/shadow/:attribute", post(edit_handler))
        .route("/api/simulator/button", post(button_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn api_error(e: TwinError) -> (StatusCode, Json<Value>) {
    let status = match e {
        TwinError::UnknownAttribute(_) => StatusCode::NOT_FOUND,
        TwinError::ReportOnly(_) | TwinError::InvalidValue { .. } => StatusCode::BAD_REQUEST,
        TwinError::Payload { .. } => StatusCode::BAD_REQUEST,
        TwinError::Closed(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(json!({"status": "error", "message": e.to_string()})))
}

async fn dashboard_handler(State(state): State<WebState>) -> Html<String> {
    let view = state.view.read().await;
    Html(render_dashboard(&view))
}

/// json api endpoint for programmatic access
async fn api_handler(State(state): State<WebState>) -> Json<AppState> {
    let view = state.view.read().await;
    Json(view.clone())
}

/// POST /api/shadow/:attribute with the new value as the json body
async fn edit_handler(
    State(state): State<WebState>,
    Path(attribute): Path<String>,
    Json(value): Json<Value>,
) -> ApiResult {
    state.runtime.edit(&attribute, &value).map_err(api_error)?;
    Ok(Json(json!({"status": "ok", "attribute": attribute})))
}

async fn refresh_handler(State(state): State<WebState>) -> ApiResult {
    state.runtime.refresh().map_err(api_error)?;
    Ok(Json(json!({"status": "ok"})))
}

#[derive(Deserialize)]
struct ButtonParams {
    id: u8,
}

/// POST /api/simulator/button?id=1..4 presses, id=0 clears all buttons
async fn button_handler(State(state): State<WebState>, Query(params): Query<ButtonParams>) -> ApiResult {
    if params.id == 0 {
        state.simulator.clear_buttons().map_err(api_error)?;
        return Ok(Json(json!({"status": "ok", "action": "clear"})));
    }
    let button = Button::from_index(params.id).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "message": "button id must be 0..=4"})),
        )
    })?;
    state.simulator.press(button).map_err(api_error)?;
    Ok(Json(json!({"status": "ok", "action": "press", "button": button.key()})))
}

fn render_dashboard(view: &AppState) -> String {
    let mut rows = String::new();
    for (key, attr) in &view.attributes {
        let pending = if attr.pending.is_some() { " (pending)" } else { "" };
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}{}</td></tr>\n",
            html_escape(key),
            html_escape(&attr.display),
            pending
        ));
    }

    let mut buttons = String::new();
    for (key, button) in &view.buttons {
        buttons.push_str(&format!(
            "<span style=\"opacity: {:.2}; margin-right: 1rem;\">● {}</span>\n",
            button.opacity,
            html_escape(key)
        ));
    }

    let orientation = view
        .telemetry
        .as_ref()
        .and_then(|t| t.orientation)
        .map(|o| format!("roll {:.1}° | pitch {:.1}°", o.roll, o.pitch))
        .unwrap_or_else(|| "(no data yet)".to_string());

    format!(
        r#"<!doctype html>
<html>
<head><title>{thing} twin</title><meta http-equiv="refresh" content="2"></head>
<body style="font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee;">
    <h1>{thing}</h1>
    <p>{buttons}</p>
    <p>orientation: {orientation}</p>
    <table style="background: #16213e; padding: 1rem; border-radius: 8px;">
{rows}    </table>
    <p style="color: #888;">last update: {last_update}</p>
</body>
</html>"#,
        thing = html_escape(&view.thing_name),
        buttons = buttons,
        orientation = orientation,
        rows = rows,
        last_update = view.last_update,
    )
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttrValue, Attribute};

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<b>\"x\" & y</b>"), "&lt;b&gt;&quot;x&quot; &amp; y&lt;/b&gt;");
    }

    #[test]
    fn test_dashboard_escapes_text_attributes() {
        let mut view = AppState::new("badge");
        view.apply(
            &Notification::Confirmed {
                attribute: Attribute::QrCode,
                value: AttrValue::Text("<script>".into()),
            },
            1,
        );
        let html = render_dashboard(&view);
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(api_error(TwinError::UnknownAttribute("x".into())).0, StatusCode::NOT_FOUND);
        assert_eq!(api_error(TwinError::ReportOnly("temperature")).0, StatusCode::BAD_REQUEST);
        assert_eq!(api_error(TwinError::Closed("shadow runtime")).0, StatusCode::SERVICE_UNAVAILABLE);
    }
}
