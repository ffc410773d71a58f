//! API route handlers
//!
//! Request handling for the operator-facing endpoints. Handlers validate
//! and translate; the orchestrator does the work. Expected failures (bad
//! zone names, malformed masks) come back as 400s, and a dead radio link
//! shows up as a failed outcome payload, never as a 500.

use super::ApiError;
use crate::gateway::frame::{Device, LampId};
use crate::gateway::{Outcome, ZoneOrchestrator};
use crate::storage::{EmergencyEvent, LampRecord, WeatherRecord, WeatherStore};
use crate::weather::WeatherCache;
use crate::zones::{WindDirection, ZoneName};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<ZoneOrchestrator>,
    pub weather_store: Option<WeatherStore>,
    pub weather_cache: WeatherCache,
}

/// Outcome payload in the shape operator clients expect.
fn outcome_json(outcome: &Outcome) -> Value {
    json!({
        "ok": outcome.ok,
        "ack": outcome.ok,
        "retries": outcome.retries,
        "t_ms": outcome.elapsed_ms,
        "error": outcome.error,
    })
}

fn parse_zone(s: &str) -> Result<ZoneName, ApiError> {
    s.parse()
        .map_err(|_| ApiError::bad_request(format!("unknown zone: {s:?}")))
}

fn parse_wind(s: &str) -> Result<WindDirection, ApiError> {
    s.parse()
        .map_err(|_| ApiError::bad_request(format!("unsupported wind direction: {s:?}")))
}

fn parse_device(s: &str) -> Result<Device, ApiError> {
    let mut chars = s.trim().chars();
    let letter = chars
        .next()
        .ok_or_else(|| ApiError::bad_request("device required"))?;
    if chars.next().is_some() {
        return Err(ApiError::bad_request(format!("invalid device: {s:?}")));
    }
    Device::new(letter).map_err(|e| ApiError::bad_request(e.to_string()))
}

fn parse_state(s: &str) -> Result<bool, ApiError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(ApiError::bad_request("state must be 'on' or 'off'")),
    }
}

// ---------------------------------------------------------------------------
// Zones
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ZoneActivationRequest {
    pub zone_name: String,
    pub wind_direction: String,
}

pub async fn activate_zone(
    State(state): State<ApiState>,
    Json(req): Json<ZoneActivationRequest>,
) -> Result<Json<Value>, ApiError> {
    let zone = parse_zone(&req.zone_name)?;
    let wind = parse_wind(&req.wind_direction)?;

    let report = state.orchestrator.activate(zone, wind).await;
    Ok(Json(json!({
        "success": report.ok,
        "zone": report.zone.to_string(),
        "wind_direction": report.wind.to_string(),
        "lamps_acked": report.lamps_acked,
        "lamps_total": report.lamps_total,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ZoneDeactivationRequest {
    pub zone_name: Option<String>,
    pub wind_direction: Option<String>,
}

pub async fn deactivate_zone(
    State(state): State<ApiState>,
    body: Option<Json<ZoneDeactivationRequest>>,
) -> Result<Json<Value>, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();

    // An explicit target needs both halves; otherwise the active zone (or
    // full shutdown) decides.
    let target = match (req.zone_name.as_deref(), req.wind_direction.as_deref()) {
        (Some(zone), Some(wind)) => Some((parse_zone(zone)?, parse_wind(wind)?)),
        _ => None,
    };

    let report = state.orchestrator.deactivate(target).await;
    let response = match &report {
        crate::gateway::DeactivationReport::Zone { ok, zone, wind } => json!({
            "success": ok,
            "zone": zone.to_string(),
            "wind_direction": wind.to_string(),
        }),
        crate::gateway::DeactivationReport::FullSystem { ok, devices_acked } => json!({
            "success": ok,
            "mode": "full_system",
            "devices_acked": devices_acked,
        }),
    };
    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// Manual control
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LampControlRequest {
    pub device: String,
    pub lamp: u8,
    pub state: String,
}

pub async fn control_lamp(
    State(state): State<ApiState>,
    Json(req): Json<LampControlRequest>,
) -> Result<Json<Value>, ApiError> {
    let device = parse_device(&req.device)?;
    let on = parse_state(&req.state)?;
    let lamp = LampId::from_parts(device, req.lamp)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let outcome = state.orchestrator.set_lamp(lamp, on, false).await;
    Ok(Json(outcome_json(&outcome)))
}

#[derive(Debug, Deserialize)]
pub struct LampByIdRequest {
    pub state: String,
    #[serde(default)]
    pub flash: bool,
}

pub async fn control_lamp_by_id(
    State(state): State<ApiState>,
    Path(lamp_id): Path<u16>,
    Json(req): Json<LampByIdRequest>,
) -> Result<Json<Value>, ApiError> {
    let lamp = LampId::new(lamp_id).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let on = parse_state(&req.state)?;

    let outcome = state.orchestrator.set_lamp(lamp, on, req.flash).await;
    Ok(Json(outcome_json(&outcome)))
}

#[derive(Debug, Deserialize)]
pub struct DeviceAllRequest {
    pub device: String,
    pub state: String,
}

pub async fn control_all(
    State(state): State<ApiState>,
    Json(req): Json<DeviceAllRequest>,
) -> Result<Json<Value>, ApiError> {
    let device = parse_device(&req.device)?;
    let on = parse_state(&req.state)?;

    let outcome = state.orchestrator.set_device_all(device, on).await;
    Ok(Json(outcome_json(&outcome)))
}

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub device: String,
    pub route: u8,
}

pub async fn control_route(
    State(state): State<ApiState>,
    Json(req): Json<RouteRequest>,
) -> Result<Json<Value>, ApiError> {
    let device = parse_device(&req.device)?;
    let outcome = state
        .orchestrator
        .set_device_route(device, req.route)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(outcome_json(&outcome)))
}

#[derive(Debug, Deserialize)]
pub struct MaskRequest {
    pub device: String,
    pub mask: String,
}

pub async fn control_mask(
    State(state): State<ApiState>,
    Json(req): Json<MaskRequest>,
) -> Result<Json<Value>, ApiError> {
    let device = parse_device(&req.device)?;
    let outcome = state
        .orchestrator
        .set_device_mask(device, &req.mask)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(outcome_json(&outcome)))
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

pub async fn get_health(State(state): State<ApiState>) -> Json<Value> {
    let snapshot = state.orchestrator.health();
    Json(json!({
        "gateway_connected": snapshot.gateway_connected,
        "queue_depth": snapshot.queue_depth,
        "device_status": snapshot.device_status,
        "connection_status": snapshot.connection_status,
        "last_heartbeat": snapshot.last_heartbeat,
    }))
}

pub async fn get_sync_state(State(state): State<ApiState>) -> Json<crate::gateway::SyncStateSnapshot> {
    Json(state.orchestrator.sync_snapshot())
}

pub async fn get_lamps(State(state): State<ApiState>) -> Json<Vec<LampRecord>> {
    Json(state.orchestrator.lamp_states())
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

pub async fn get_emergency_events(
    State(state): State<ApiState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<EmergencyEvent>> {
    let limit = query.limit.unwrap_or(50).min(500);
    Json(state.orchestrator.recent_events(limit))
}

pub async fn test_connection(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "gateway_connected": state.orchestrator.health().gateway_connected,
    }))
}

// ---------------------------------------------------------------------------
// Weather
// ---------------------------------------------------------------------------

pub async fn get_weather_latest(
    State(state): State<ApiState>,
) -> Result<Json<Option<WeatherRecord>>, ApiError> {
    let cached = state
        .weather_cache
        .lock()
        .ok()
        .and_then(|cache| cache.clone());
    if cached.is_some() {
        return Ok(Json(cached));
    }
    Ok(Json(state.weather_store.as_ref().and_then(|s| s.latest())))
}

pub async fn get_weather_recent(
    State(state): State<ApiState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<WeatherRecord>> {
    let limit = query.limit.unwrap_or(10).clamp(1, 10);
    Json(
        state
            .weather_store
            .as_ref()
            .map(|s| s.recent(limit))
            .unwrap_or_default(),
    )
}
