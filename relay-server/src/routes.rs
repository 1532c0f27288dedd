//! HTTP routes

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::convert::Infallible;

use relay_detect::ScanReport;
use relay_dispatch::{Dispatcher, JobOutcome};
use relay_protocol::{DeviceCommand, DeviceId};
use serde_json::json;
use tracing::{debug, warn};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};

/// Body returned when the identifier is not in the registry
pub const UNRECOGNIZED_DEVICE: &str = "Device ID not recognized.";

/// Create all API routes
pub fn create_routes(
    dispatcher: Dispatcher,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let power_command = power_command_route(dispatcher.clone());
    let power_list = power_list_route(dispatcher.clone());
    let cableflysim_command = cableflysim_command_route(dispatcher.clone());
    let devices_list = devices_list_route(dispatcher.clone());
    let devices_scan = devices_scan_route(dispatcher);

    warp::path("api").and(
        power_command
            .or(power_list)
            .or(cableflysim_command)
            .or(devices_list)
            .or(devices_scan),
    )
}

/// GET /api/power/{relayId}/{cmd} - Send a command to a power relay
fn power_command_route(
    dispatcher: Dispatcher,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    warp::path("power")
        .and(warp::path::param::<String>())
        .and(warp::path::param::<String>())
        .and(warp::get())
        .and(warp::path::end())
        .and(with_dispatcher(dispatcher))
        .and_then(power_command_handler)
}

/// GET /api/power - List power relays
fn power_list_route(
    dispatcher: Dispatcher,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    warp::path("power")
        .and(warp::get())
        .and(warp::path::end())
        .and(with_dispatcher(dispatcher))
        .and_then(power_list_handler)
}

/// GET /api/cableflysim/{cmd} - Send a command to the cable flysim
fn cableflysim_command_route(
    dispatcher: Dispatcher,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    warp::path("cableflysim")
        .and(warp::path::param::<String>())
        .and(warp::get())
        .and(warp::path::end())
        .and(with_dispatcher(dispatcher))
        .and_then(cableflysim_command_handler)
}

/// GET /api/devices - List every registered device
fn devices_list_route(
    dispatcher: Dispatcher,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    warp::path("devices")
        .and(warp::get())
        .and(warp::path::end())
        .and(with_dispatcher(dispatcher))
        .and_then(devices_list_handler)
}

/// POST /api/devices/scan - Rediscover devices
fn devices_scan_route(
    dispatcher: Dispatcher,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    warp::path("devices")
        .and(warp::path("scan"))
        .and(warp::post())
        .and(warp::path::end())
        .and(with_dispatcher(dispatcher))
        .and_then(devices_scan_handler)
}

/// Helper function to pass the dispatcher to handlers
fn with_dispatcher(
    dispatcher: Dispatcher,
) -> impl Filter<Extract = (Dispatcher,), Error = Infallible> + Clone {
    warp::any().map(move || dispatcher.clone())
}

/// Percent-decode a path segment; `+` stays a literal plus
fn decode_segment(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| segment.to_string())
}

fn error_body(reason: impl ToString, status: StatusCode) -> Response {
    let body = json!({
        "status": "error",
        "response": "",
        "error": reason.to_string(),
    });
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

/// Run one command through the dispatcher and render its outcome
async fn dispatch(dispatcher: &Dispatcher, device: &str, payload: &str) -> Response {
    let command = match DeviceCommand::parse(payload) {
        Ok(command) => command,
        Err(e) => {
            debug!("Rejected command {:?} for {}: {}", payload, device, e);
            return error_body(e, StatusCode::BAD_REQUEST);
        }
    };

    match dispatcher.submit(device, command).await {
        Ok(JobOutcome::UnrecognizedDevice) => UNRECOGNIZED_DEVICE.into_response(),
        Ok(outcome) => warp::reply::json(&outcome).into_response(),
        Err(e) => {
            warn!("Dispatcher unavailable: {}", e);
            error_body(e, StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Handler for GET /api/power/{relayId}/{cmd}
async fn power_command_handler(
    device: String,
    cmd: String,
    dispatcher: Dispatcher,
) -> Result<Response, warp::Rejection> {
    let device = decode_segment(&device);
    let cmd = decode_segment(&cmd);
    debug!("Power command {:?} for {}", cmd, device);

    Ok(dispatch(&dispatcher, &device, &cmd).await)
}

/// Handler for GET /api/cableflysim/{cmd}
async fn cableflysim_command_handler(
    cmd: String,
    dispatcher: Dispatcher,
) -> Result<Response, warp::Rejection> {
    let cmd = decode_segment(&cmd);
    debug!("Cable flysim command {:?}", cmd);

    Ok(dispatch(&dispatcher, &DeviceId::CableFlysim.to_string(), &cmd).await)
}

/// Handler for GET /api/power
async fn power_list_handler(dispatcher: Dispatcher) -> Result<Response, warp::Rejection> {
    let relays: BTreeMap<DeviceId, String> = dispatcher
        .registry()
        .snapshot()
        .await
        .into_iter()
        .filter(|(id, _)| id.is_power_relay())
        .collect();

    Ok(warp::reply::json(&json!({ "power": relays })).into_response())
}

/// Handler for GET /api/devices
async fn devices_list_handler(dispatcher: Dispatcher) -> Result<Response, warp::Rejection> {
    let devices = dispatcher.registry().snapshot().await;
    Ok(warp::reply::json(&devices).into_response())
}

/// Handler for POST /api/devices/scan
async fn devices_scan_handler(dispatcher: Dispatcher) -> Result<Response, warp::Rejection> {
    match dispatcher.scan().await {
        Ok(report) => Ok(warp::reply::json(&scan_body(&report)).into_response()),
        Err(e) => {
            warn!("Scan request failed: {}", e);
            Ok(error_body(e, StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

/// Scan report with its devices folded into a registry-shaped map
fn scan_body(report: &ScanReport) -> serde_json::Value {
    let devices: BTreeMap<&DeviceId, &str> = report
        .devices
        .iter()
        .map(|d| (&d.id, d.port.as_str()))
        .collect();

    json!({
        "tried": report.tried,
        "recognized": report.recognized,
        "devices": devices,
    })
}
