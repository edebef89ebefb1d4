//! HTTP API using Axum
//!
//! - GET  /api/locations - last known state of every node
//! - GET  /api/simulate_extend?id=<id>[&count=<n>] - write a synthetic `Emu_<id>` track
//! - GET  /api/export_route?id=<id> - download `<id>_route.json`
//! - GET  /api/health - health check
//! - GET  /api/status - serial link state and ingest counters
//! - POST /api/connect - open the serial console (`{"port": .., "baud_rate": ..}`)

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use crate::config::{MeshtasticConfig, SimulationConfig};
use crate::errors::{StorageError, TransportError};
use crate::meshtastic::{self, ConnectionStatus, LineSource};
use crate::metrics;
use crate::storage::route_file_name;
use crate::tracker::Tracker;

/// State shared across handlers
pub struct ApiState {
    pub tracker: Tracker,
    status: Arc<watch::Sender<ConnectionStatus>>,
    line_tx: mpsc::UnboundedSender<String>,
    serial: MeshtasticConfig,
    simulation: SimulationConfig,
}

impl ApiState {
    pub fn new(
        tracker: Tracker,
        line_tx: mpsc::UnboundedSender<String>,
        serial: MeshtasticConfig,
        simulation: SimulationConfig,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            tracker,
            status: Arc::new(status),
            line_tx,
            serial,
            simulation,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Open the serial console and start its reader thread.
    ///
    /// `port` falls back to the configured port, then to the first port the
    /// OS reports. Returns the port actually opened.
    pub async fn connect(
        &self,
        port: Option<String>,
        baud_rate: Option<u32>,
    ) -> Result<String, TransportError> {
        let port = match port.filter(|p| !p.trim().is_empty()) {
            Some(p) => p,
            None if !self.serial.port.is_empty() => self.serial.port.clone(),
            None => meshtastic::first_available_port()?,
        };
        let baud = baud_rate.unwrap_or(self.serial.baud_rate);
        let timeout_ms = self.serial.read_timeout_ms;

        self.status.send_replace(ConnectionStatus::Connecting { port: port.clone() });
        let open_port = port.clone();
        let opened = tokio::task::spawn_blocking(move || {
            meshtastic::open_serial(&open_port, baud, timeout_ms)
        })
        .await
        .unwrap_or_else(|e| {
            Err(TransportError::Open {
                port: port.clone(),
                reason: e.to_string(),
            })
        });

        let source = match opened {
            Ok(source) => source,
            Err(e) => {
                self.status.send_replace(ConnectionStatus::Failed {
                    port: port.clone(),
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        self.attach_source(source)?;
        info!("Connected to {} at {} baud", port, baud);
        Ok(port)
    }

    /// Feed an already opened source into the ingest channel.
    pub fn attach_source(&self, source: Box<dyn LineSource>) -> Result<(), TransportError> {
        let name = source.describe();
        meshtastic::spawn_line_reader(
            source,
            self.line_tx.clone(),
            self.status.clone(),
            self.serial.echo_lines,
        )
        .map(|_| ())
        .map_err(|e| TransportError::Open {
            port: name,
            reason: e.to_string(),
        })
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    timestamp: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// One element of `GET /api/locations`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct LocationView {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub alt: Option<i32>,
    pub battery: Option<u32>,
    pub voltage: Option<f64>,
    pub callsign: Option<String>,
    pub time: String,
    pub last_seen: String,
    pub freshness: String,
}

#[derive(Serialize)]
struct SimulateResponse {
    status: &'static str,
    file: String,
    points: usize,
}

#[derive(Serialize)]
struct StatusResponse {
    connection: ConnectionStatus,
    nodes: usize,
    metrics: metrics::Snapshot,
    events_per_node: HashMap<String, u64>,
}

#[derive(Deserialize)]
struct SimulateQuery {
    id: String,
    count: Option<usize>,
}

#[derive(Deserialize)]
struct RouteQuery {
    id: String,
}

#[derive(Deserialize, Default)]
struct ConnectRequest {
    port: Option<String>,
    baud_rate: Option<u32>,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn storage_error_response(e: StorageError) -> Response {
    let status = match &e {
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        StorageError::InvalidId(_) => StatusCode::BAD_REQUEST,
        _ => {
            warn!("Storage request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, e.to_string())
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn locations(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let rows: Vec<LocationView> = state
        .tracker
        .nodes()
        .snapshot()
        .into_iter()
        .map(|row| LocationView {
            id: row.event.node_id.clone(),
            name: row.event.display_name().to_string(),
            lat: row.event.latitude,
            lng: row.event.longitude,
            alt: row.telemetry.altitude,
            battery: row.telemetry.battery,
            voltage: row.telemetry.voltage,
            callsign: row.event.callsign.clone(),
            time: row.event.timestamp.to_rfc3339(),
            last_seen: row.last_seen.to_rfc3339(),
            freshness: row.freshness.as_str().to_string(),
        })
        .collect();
    Json(rows)
}

async fn simulate_extend(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<SimulateQuery>,
) -> Response {
    let count = query
        .count
        .unwrap_or(state.simulation.default_count)
        .min(state.simulation.max_count);
    let store = state.tracker.store().clone();
    let id = query.id;
    match tokio::task::spawn_blocking(move || store.simulate_extend(&id, count)).await {
        Ok(Ok(track)) => Json(SimulateResponse {
            status: "ok",
            file: track.file,
            points: track.points,
        })
        .into_response(),
        Ok(Err(e)) => storage_error_response(e),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn export_route(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<RouteQuery>,
) -> Response {
    let store = state.tracker.store().clone();
    let id = query.id.trim().to_string();
    let lookup = id.clone();
    match tokio::task::spawn_blocking(move || store.export_route(&lookup)).await {
        Ok(Ok(bytes)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/json".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", route_file_name(&id)),
                ),
            ],
            bytes,
        )
            .into_response(),
        Ok(Err(e)) => storage_error_response(e),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(StatusResponse {
        connection: state.status(),
        nodes: state.tracker.nodes().len(),
        metrics: metrics::snapshot(),
        events_per_node: metrics::node_events_snapshot(),
    })
}

async fn connect(
    State(state): State<Arc<ApiState>>,
    body: Option<Json<ConnectRequest>>,
) -> Response {
    if matches!(
        state.status(),
        ConnectionStatus::Connected { .. } | ConnectionStatus::Connecting { .. }
    ) {
        return error_response(StatusCode::CONFLICT, "serial console already connected");
    }
    let req = body.map(|Json(r)| r).unwrap_or_default();
    match state.connect(req.port, req.baud_rate).await {
        Ok(_) => (StatusCode::OK, Json(state.status())).into_response(),
        Err(TransportError::NoPorts) => {
            error_response(StatusCode::NOT_FOUND, TransportError::NoPorts.to_string())
        }
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

/// Create the API router
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/locations", get(locations))
        .route("/api/simulate_extend", get(simulate_extend))
        .route("/api/export_route", get(export_route))
        .route("/api/status", get(status))
        .route("/api/connect", post(connect))
        .with_state(state)
}

/// Serve the API on an already bound listener until the process exits.
pub async fn serve(listener: TcpListener, state: Arc<ApiState>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP API listening on {}", addr);
    }
    axum::serve(listener, create_router(state)).await
}
