//! HTTP API for the walk feature
//!
//! JSON over hyper http1. Routes live under `/api/walk/`; `/health` and
//! `/metrics` are unauthenticated. Every other route resolves the caller from
//! an `Authorization: Bearer <token>` header against the configured token
//! table.

use crate::domain::{AuthContext, ClaimId, ConnectionId, GeoPoint, VolunteerId};
use crate::infra::config::Config;
use crate::infra::error::{WalkError, WalkResult};
use crate::infra::metrics::Metrics;
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::walk::WalkService;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared state for request handlers
pub struct ApiState {
    service: Arc<WalkService>,
    metrics: Arc<Metrics>,
    tokens: HashMap<String, AuthContext>,
    site_id: String,
}

impl ApiState {
    pub fn new(config: &Config, service: Arc<WalkService>, metrics: Arc<Metrics>) -> Self {
        let tokens = config
            .tokens()
            .iter()
            .map(|(token, entry)| {
                (
                    token.clone(),
                    AuthContext { volunteer_id: VolunteerId::new(&entry.volunteer_id), name: entry.name.clone() },
                )
            })
            .collect();
        Self { service, metrics, tokens, site_id: config.site_id().to_string() }
    }

    fn authenticate(&self, headers: &hyper::HeaderMap) -> WalkResult<&AuthContext> {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .and_then(|token| self.tokens.get(token.trim()))
            .ok_or(WalkError::Unauthorized)
    }
}

// ---- request bodies ----

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionalPoint {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl OptionalPoint {
    fn point(&self) -> WalkResult<Option<GeoPoint>> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => GeoPoint::new(lat, lng).map(Some),
            (None, None) => Ok(None),
            _ => Err(WalkError::Validation("latitude and longitude must be given together".to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationRequest {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimHousesRequest {
    addresses: Vec<String>,
    ttl_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimHouseRequest {
    address: String,
    latitude: f64,
    longitude: f64,
    ttl_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteVisitRequest {
    voters_contacted: u32,
    #[serde(default)]
    voters_home: u32,
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptimizeRouteRequest {
    start_latitude: f64,
    start_longitude: f64,
    addresses: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HubConnectionRequest {
    connection_id: String,
    #[serde(flatten)]
    point: OptionalPoint,
}

// ---- responses ----

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let bytes = match serde_json::to_vec(body) {
        Ok(bytes) => bytes,
        Err(e) => return error_response(&WalkError::Internal(e.to_string())),
    };
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(bytes)))
        .expect("static response should not fail")
}

fn ok<T: Serialize>(body: &T) -> WalkResult<Response<Full<Bytes>>> {
    Ok(json_response(StatusCode::OK, body))
}

fn error_response(err: &WalkError) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({ "error": { "kind": err.kind(), "message": err.to_string() } });
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

// ---- request parsing ----

async fn read_json<T, B>(body: B) -> WalkResult<T>
where
    T: DeserializeOwned,
    B: Body,
    B::Error: Into<BoxError>,
{
    let bytes = read_body(body).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Like `read_json` but an empty body yields `T::default()`
async fn read_json_or_default<T, B>(body: B) -> WalkResult<T>
where
    T: DeserializeOwned + Default,
    B: Body,
    B::Error: Into<BoxError>,
{
    let bytes = read_body(body).await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(&bytes)?)
}

async fn read_body<B>(body: B) -> WalkResult<Bytes>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    // Stops reading as soon as the limit is crossed
    let collected = Limited::new(body, MAX_BODY_BYTES).collect().await.map_err(|e| {
        if e.downcast_ref::<LengthLimitError>().is_some() {
            WalkError::Validation(format!("body exceeds {MAX_BODY_BYTES} bytes"))
        } else {
            WalkError::Validation(format!("failed to read body: {e}"))
        }
    })?;
    Ok(collected.to_bytes())
}

/// Decoded `application/x-www-form-urlencoded` query pairs; the last duplicate wins
fn query_params(query: Option<&str>) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.unwrap_or("").as_bytes()).into_owned().collect()
}

fn param<T: std::str::FromStr>(params: &HashMap<String, String>, name: &str) -> WalkResult<Option<T>> {
    params
        .get(name)
        .map(|raw| raw.parse::<T>().map_err(|_| WalkError::Validation(format!("invalid {name}: {raw}"))))
        .transpose()
}

fn required<T: std::str::FromStr>(params: &HashMap<String, String>, name: &str) -> WalkResult<T> {
    param(params, name)?.ok_or_else(|| WalkError::Validation(format!("missing {name}")))
}

fn origin_param(params: &HashMap<String, String>) -> WalkResult<GeoPoint> {
    GeoPoint::new(required(params, "latitude")?, required(params, "longitude")?)
}

// ---- routing ----

async fn route<B>(req: Request<B>, state: &ApiState) -> WalkResult<Response<Full<Bytes>>>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    match (&method, path.as_str()) {
        (&Method::GET, "/health") => {
            return ok(&json!({ "status": "ok", "version": env!("GIT_HASH") }));
        }
        (&Method::GET, "/metrics") => {
            let stats = state.service.stats().await?;
            let summary = state.metrics.snapshot(stats.open_sessions, stats.active_claims, stats.connected);
            return Ok(Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(format_prometheus_metrics(&summary, &state.site_id))))
                .expect("static response should not fail"));
        }
        _ => {}
    }

    let Some(rest) = path.strip_prefix("/api/walk/") else {
        return Err(WalkError::NotFound(format!("route {path}")));
    };
    let auth = state.authenticate(req.headers())?.clone();
    let service = &state.service;
    let segments: Vec<&str> = rest.trim_end_matches('/').split('/').collect();
    let body = req.into_body();

    match (&method, segments.as_slice()) {
        (&Method::POST, ["sessions", "start"]) => {
            let point = read_json_or_default::<OptionalPoint, _>(body).await?.point()?;
            Ok(json_response(StatusCode::CREATED, &service.start_session(&auth, point).await?))
        }
        (&Method::POST, ["sessions", "pause"]) => ok(&service.pause_session(&auth).await?),
        (&Method::POST, ["sessions", "resume"]) => ok(&service.resume_session(&auth).await?),
        (&Method::POST, ["sessions", "end"]) => {
            let point = read_json_or_default::<OptionalPoint, _>(body).await?.point()?;
            ok(&service.end_session(&auth, point).await?)
        }
        (&Method::POST, ["sessions", "abandon"]) => ok(&service.abandon_session(&auth).await?),
        (&Method::GET, ["sessions", "current"]) => ok(&service.current_session(&auth).await?),
        (&Method::GET, ["sessions", "current", "activities"]) => ok(&service.session_activities(&auth).await?),
        (&Method::POST, ["location"]) => {
            let req: LocationRequest = read_json(body).await?;
            let point = GeoPoint::new(req.latitude, req.longitude)?;
            ok(&service.update_location(&auth, point).await?)
        }
        (&Method::GET, ["houses", "available"]) => {
            let params = query_params(query.as_deref());
            let origin = origin_param(&params)?;
            let houses =
                service.available_houses(origin, param(&params, "radiusKm")?, param(&params, "limit")?).await?;
            ok(&houses)
        }
        (&Method::POST, ["houses", "claim"]) => {
            let req: ClaimHousesRequest = read_json(body).await?;
            ok(&service.claim_houses(&auth, &req.addresses, req.ttl_minutes).await?)
        }
        (&Method::POST, ["houses", "claim-single"]) => {
            let req: ClaimHouseRequest = read_json(body).await?;
            let point = GeoPoint::new(req.latitude, req.longitude)?;
            let claim = service.claim_house(&auth, &req.address, point, req.ttl_minutes).await?;
            Ok(json_response(StatusCode::CREATED, &claim))
        }
        (&Method::POST, ["houses", claim_id, "arrive"]) => {
            let claim_id: ClaimId = claim_id.parse()?;
            let point = read_json_or_default::<OptionalPoint, _>(body).await?.point()?;
            ok(&service.arrive_at_house(&auth, claim_id, point).await?)
        }
        (&Method::POST, ["houses", claim_id, "complete"]) => {
            let claim_id: ClaimId = claim_id.parse()?;
            let req: CompleteVisitRequest = read_json(body).await?;
            ok(&service.complete_visit(&auth, claim_id, req.voters_contacted, req.voters_home, req.notes).await?)
        }
        (&Method::POST, ["houses", claim_id, "release"]) => {
            let claim_id: ClaimId = claim_id.parse()?;
            ok(&service.release_claim(&auth, claim_id).await?)
        }
        (&Method::POST, ["routes", "optimize"]) => {
            let req: OptimizeRouteRequest = read_json(body).await?;
            let start = GeoPoint::new(req.start_latitude, req.start_longitude)?;
            ok(&service.optimize_route(&auth, start, &req.addresses).await?)
        }
        (&Method::GET, ["canvassers", "active"]) => {
            let params = query_params(query.as_deref());
            let origin = origin_param(&params)?;
            ok(&service.nearby_canvassers(origin, param(&params, "radiusKm")?).await?)
        }
        (&Method::POST, ["hub", "join"]) => {
            let req: HubConnectionRequest = read_json(body).await?;
            let point = req.point.point()?;
            service.join_hub(&auth, ConnectionId(req.connection_id), point);
            ok(&json!({ "joined": true }))
        }
        (&Method::POST, ["hub", "leave"]) => {
            let req: HubConnectionRequest = read_json(body).await?;
            let volunteer_id = service.leave_hub(&ConnectionId(req.connection_id))?;
            ok(&json!({ "left": true, "volunteerId": volunteer_id }))
        }
        _ => Err(WalkError::NotFound(format!("route {method} {path}"))),
    }
}

/// Handle one HTTP request; errors become JSON bodies, never connection failures
pub async fn handle_request<B>(req: Request<B>, state: Arc<ApiState>) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match route(req, &state).await {
        Ok(response) => response,
        Err(e) => {
            if matches!(e, WalkError::Internal(_)) {
                error!(method = %method, path = %path, error = %e, "http_internal_error");
            }
            error_response(&e)
        }
    };

    let latency_us = start.elapsed().as_micros() as u64;
    let status = response.status();
    state.metrics.record_request(latency_us, status.is_client_error() || status.is_server_error());
    debug!(method = %method, path = %path, status = %status.as_u16(), latency_us = %latency_us, "http_request");
    Ok(response)
}

/// Serve the API on an already bound listener until shutdown
pub async fn serve(
    listener: TcpListener,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle_request(req, state.clone()));
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                warn!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

/// Bind the configured address and serve
pub async fn start_http_server(
    config: &Config,
    state: Arc<ApiState>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.http_bind_address(), config.http_port()).parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state, shutdown).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::metrics::Metrics;
    use crate::services::houses::{House, HouseDirectory};
    use crate::services::hub::Hub;
    use crate::services::store::MemoryWalkStore;
    use serde_json::Value;

    const TOKEN: &str = "secret-1";

    fn state() -> Arc<ApiState> {
        let config = Config::default().with_token(TOKEN, "v-1", "Ann");
        let metrics = Arc::new(Metrics::new());
        let hub = Arc::new(Hub::new(16, 600, metrics.clone()));
        let houses = Arc::new(HouseDirectory::from_houses(vec![House {
            address: "1 Elm St".into(),
            latitude: 38.9001,
            longitude: -77.0,
            voters: Vec::new(),
        }]));
        let service = Arc::new(WalkService::new(
            &config,
            Arc::new(MemoryWalkStore::new()),
            hub,
            houses,
            metrics.clone(),
        ));
        Arc::new(ApiState::new(&config, service, metrics))
    }

    fn request(method: Method, uri: &str, body: &str, token: Option<&str>) -> Request<Full<Bytes>> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Full::new(Bytes::from(body.to_string()))).unwrap()
    }

    async fn call(state: &Arc<ApiState>, req: Request<Full<Bytes>>) -> (StatusCode, Value) {
        let resp = handle_request(req, state.clone()).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health_needs_no_auth() {
        let state = state();
        let (status, body) = call(&state, request(Method::GET, "/health", "", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_unauthorized_without_token() {
        let state = state();
        for token in [None, Some("wrong")] {
            let (status, body) = call(&state, request(Method::GET, "/api/walk/sessions/current", "", token)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["error"]["kind"], "unauthorized");
        }
    }

    #[tokio::test]
    async fn test_session_and_claim_flow() {
        let state = state();
        let (status, session) = call(
            &state,
            request(Method::POST, "/api/walk/sessions/start", r#"{"latitude":38.9,"longitude":-77.0}"#, Some(TOKEN)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(session["status"], "active");
        assert_eq!(session["volunteerId"], "v-1");

        let (status, _) = call(&state, request(Method::POST, "/api/walk/sessions/start", "", Some(TOKEN))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, houses) = call(
            &state,
            request(Method::GET, "/api/walk/houses/available?latitude=38.9&longitude=-77.0", "", Some(TOKEN)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(houses.as_array().unwrap().len(), 1);

        let (status, batch) = call(
            &state,
            request(Method::POST, "/api/walk/houses/claim", r#"{"addresses":["1 Elm St"]}"#, Some(TOKEN)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let claim_id = batch["claimed"][0]["id"].as_str().unwrap().to_string();

        let (status, visit) = call(
            &state,
            request(
                Method::POST,
                &format!("/api/walk/houses/{claim_id}/complete"),
                r#"{"votersContacted":2,"votersHome":1}"#,
                Some(TOKEN),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(visit["claim"]["status"], "visited");
        assert_eq!(visit["session"]["housesVisited"], 1);

        let (status, body) = call(
            &state,
            request(Method::POST, &format!("/api/walk/houses/{claim_id}/release"), "", Some(TOKEN)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let state = state();
        let (status, _) = call(
            &state,
            request(Method::POST, "/api/walk/location", r#"{"latitude":123.0,"longitude":0.0}"#, Some(TOKEN)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&state, request(Method::POST, "/api/walk/location", "{not json", Some(TOKEN))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            call(&state, request(Method::POST, "/api/walk/houses/not-a-uuid/release", "", Some(TOKEN))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            call(&state, request(Method::GET, "/api/walk/houses/available?latitude=38.9", "", Some(TOKEN))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let state = state();
        let (status, _) = call(&state, request(Method::GET, "/api/walk/nope", "", Some(TOKEN))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&state, request(Method::GET, "/elsewhere", "", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_counts_requests() {
        let state = state();
        call(&state, request(Method::GET, "/health", "", None)).await;
        let resp = handle_request(request(Method::GET, "/metrics", "", None), state.clone()).await.unwrap();
        let text = String::from_utf8(resp.into_body().collect().await.unwrap().to_bytes().to_vec()).unwrap();
        assert!(text.contains("walk_http_requests_total{site=\"campaign\"} 1"));
    }

    #[test]
    fn test_query_params() {
        let params = query_params(Some("latitude=1.5&longitude=-2&limit=10&flag"));
        assert_eq!(required::<f64>(&params, "latitude").unwrap(), 1.5);
        assert_eq!(param::<usize>(&params, "limit").unwrap(), Some(10));
        assert_eq!(param::<f64>(&params, "radiusKm").unwrap(), None);
        assert!(param::<usize>(&query_params(Some("limit=x")), "limit").is_err());
        assert!(query_params(None).is_empty());
    }

    #[test]
    fn test_query_params_are_percent_decoded() {
        let params = query_params(Some("latitude=38.9&longitude=%2D77.0&radiusKm=+0.5"));
        let origin = origin_param(&params).unwrap();
        assert_eq!(origin.longitude, -77.0);
        // '+' decodes to a space, which is not a number
        assert!(param::<f64>(&params, "radiusKm").is_err());
        assert_eq!(query_params(Some("q=1+Elm%20St"))["q"], "1 Elm St");
    }

    #[tokio::test]
    async fn test_available_houses_with_encoded_query() {
        let state = state();
        let (status, body) = call(
            &state,
            request(Method::GET, "/api/walk/houses/available?latitude=38.9&longitude=%2D77.0", "", Some(TOKEN)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["address"], "1 Elm St");
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let state = state();
        let body = "a".repeat(MAX_BODY_BYTES + 1);
        let (status, value) =
            call(&state, request(Method::POST, "/api/walk/sessions/start", &body, Some(TOKEN))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["kind"], "validation");
        assert!(value["error"]["message"].as_str().unwrap().contains("exceeds"));
    }
}
