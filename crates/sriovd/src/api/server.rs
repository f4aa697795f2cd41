use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use sriov_common::{SriovError, SriovResult};
use sriov_network::{EndpointRequest, NetworkRegistry};
use tower_http::trace::TraceLayer;

use super::types::{
    ActivateResponse, AllocateNetworkRequest, AllocateNetworkResponse, CapabilitiesResponse,
    CreateEndpointRequest, CreateEndpointResponse, CreateNetworkRequest, DiscoveryNotification,
    EmptyResponse, EndpointRef, ErrorResponse, InfoResponse, JoinRequest, JoinResponse,
    NetworkRequest,
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    registry: Arc<NetworkRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<NetworkRegistry>) -> Self {
        Self { registry }
    }
}

/// Failure of a driver call, rendered as `{"Err": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Driver(SriovError),
    Worker(tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match self {
            Self::Driver(e) => e.to_string(),
            Self::Worker(e) => format!("driver worker failed: {e}"),
        };
        tracing::warn!(error = %message, "Driver call failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse { err: message }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run a registry call on the blocking pool; registry calls do host I/O.
async fn blocking<T, F>(state: &AppState, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&NetworkRegistry) -> SriovResult<T> + Send + 'static,
{
    let registry = Arc::clone(&state.registry);
    tokio::task::spawn_blocking(move || call(&registry))
        .await
        .map_err(ApiError::Worker)?
        .map_err(ApiError::Driver)
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/NetworkDriver.GetCapabilities", post(get_capabilities))
        .route("/NetworkDriver.CreateNetwork", post(create_network))
        .route("/NetworkDriver.AllocateNetwork", post(allocate_network))
        .route("/NetworkDriver.DeleteNetwork", post(delete_network))
        .route("/NetworkDriver.FreeNetwork", post(free_network))
        .route("/NetworkDriver.CreateEndpoint", post(create_endpoint))
        .route("/NetworkDriver.DeleteEndpoint", post(delete_endpoint))
        .route("/NetworkDriver.EndpointOperInfo", post(endpoint_info))
        .route("/NetworkDriver.Join", post(join))
        .route("/NetworkDriver.Leave", post(leave))
        .route("/NetworkDriver.DiscoverNew", post(discover_new))
        .route("/NetworkDriver.DiscoverDelete", post(discover_delete))
        .route(
            "/NetworkDriver.ProgramExternalConnectivity",
            post(program_external_connectivity),
        )
        .route(
            "/NetworkDriver.RevokeExternalConnectivity",
            post(revoke_external_connectivity),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn activate() -> Json<ActivateResponse> {
    Json(ActivateResponse {
        implements: vec!["NetworkDriver".to_string()],
    })
}

async fn get_capabilities(State(state): State<AppState>) -> Json<CapabilitiesResponse> {
    let scope = state.registry.get_capabilities().to_string();
    Json(CapabilitiesResponse {
        connectivity_scope: scope.clone(),
        scope,
    })
}

async fn create_network(
    State(state): State<AppState>,
    Json(request): Json<CreateNetworkRequest>,
) -> ApiResult<EmptyResponse> {
    tracing::debug!(network_id = %request.network_id, "CreateNetwork");
    blocking(&state, move |registry| {
        registry.create_network(&request.network_id, &request.options, &request.ipv4())
    })
    .await?;
    Ok(Json(EmptyResponse::default()))
}

async fn allocate_network(
    State(state): State<AppState>,
    Json(request): Json<AllocateNetworkRequest>,
) -> Json<AllocateNetworkResponse> {
    Json(AllocateNetworkResponse {
        options: state.registry.allocate_network(&request.network_id),
    })
}

async fn delete_network(
    State(state): State<AppState>,
    Json(request): Json<NetworkRequest>,
) -> ApiResult<EmptyResponse> {
    tracing::debug!(network_id = %request.network_id, "DeleteNetwork");
    blocking(&state, move |registry| {
        registry.delete_network(&request.network_id)
    })
    .await?;
    Ok(Json(EmptyResponse::default()))
}

async fn free_network(
    State(state): State<AppState>,
    Json(request): Json<NetworkRequest>,
) -> Json<EmptyResponse> {
    state.registry.free_network(&request.network_id);
    Json(EmptyResponse::default())
}

async fn create_endpoint(
    State(state): State<AppState>,
    Json(request): Json<CreateEndpointRequest>,
) -> ApiResult<CreateEndpointResponse> {
    tracing::debug!(
        network_id = %request.network_id,
        endpoint_id = %request.endpoint_id,
        "CreateEndpoint"
    );
    let request: EndpointRequest = request.into();
    let interface = blocking(&state, move |registry| registry.create_endpoint(&request)).await?;
    Ok(Json(CreateEndpointResponse {
        interface: interface.into(),
    }))
}

async fn delete_endpoint(
    State(state): State<AppState>,
    Json(request): Json<EndpointRef>,
) -> ApiResult<EmptyResponse> {
    tracing::debug!(
        network_id = %request.network_id,
        endpoint_id = %request.endpoint_id,
        "DeleteEndpoint"
    );
    blocking(&state, move |registry| {
        registry.delete_endpoint(&request.network_id, &request.endpoint_id)
    })
    .await?;
    Ok(Json(EmptyResponse::default()))
}

async fn endpoint_info(
    State(state): State<AppState>,
    Json(request): Json<EndpointRef>,
) -> ApiResult<InfoResponse> {
    let value = blocking(&state, move |registry| {
        registry.endpoint_info(&request.network_id, &request.endpoint_id)
    })
    .await?;
    Ok(Json(InfoResponse { value }))
}

async fn join(
    State(state): State<AppState>,
    Json(request): Json<JoinRequest>,
) -> ApiResult<JoinResponse> {
    tracing::debug!(
        network_id = %request.network_id,
        endpoint_id = %request.endpoint_id,
        sandbox_key = %request.sandbox_key,
        "Join"
    );
    let info = blocking(&state, move |registry| {
        registry.join(
            &request.network_id,
            &request.endpoint_id,
            &request.sandbox_key,
        )
    })
    .await?;
    Ok(Json(info.into()))
}

async fn leave(
    State(state): State<AppState>,
    Json(request): Json<EndpointRef>,
) -> ApiResult<EmptyResponse> {
    blocking(&state, move |registry| {
        registry.leave(&request.network_id, &request.endpoint_id)
    })
    .await?;
    Ok(Json(EmptyResponse::default()))
}

async fn discover_new(
    State(state): State<AppState>,
    Json(notification): Json<DiscoveryNotification>,
) -> Json<EmptyResponse> {
    state.registry.discover_new(notification.discovery_type);
    Json(EmptyResponse::default())
}

async fn discover_delete(
    State(state): State<AppState>,
    Json(notification): Json<DiscoveryNotification>,
) -> Json<EmptyResponse> {
    state.registry.discover_delete(notification.discovery_type);
    Json(EmptyResponse::default())
}

async fn program_external_connectivity(
    State(state): State<AppState>,
    Json(request): Json<EndpointRef>,
) -> Json<EmptyResponse> {
    state
        .registry
        .program_external_connectivity(&request.network_id, &request.endpoint_id);
    Json(EmptyResponse::default())
}

async fn revoke_external_connectivity(
    State(state): State<AppState>,
    Json(request): Json<EndpointRef>,
) -> Json<EmptyResponse> {
    state
        .registry
        .revoke_external_connectivity(&request.network_id, &request.endpoint_id);
    Json(EmptyResponse::default())
}
