//! HTTP server setup and the gateway handler.
//!
//! # Responsibilities
//! - Create the Axum router with the gateway handler as its only route
//! - Wire up middleware (request ID, tracing, authentication)
//! - Serve on a listener until the shutdown broadcast fires
//! - Run the per-request pipeline: route, rewrite, dispatch, rewrite back

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware,
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::auth::{self, auth_middleware, Principal};
use crate::config::{GatewayConfig, GatewaySettings};
use crate::dispatch::{collect_limited, BodyError, DispatchError, Dispatcher};
use crate::http::request::{frontend_url, prepare_outbound, GatewayPath, Inbound};
use crate::http::{response, GatewayError};
use crate::observability::metrics;
use crate::resilience::RetryPolicy;
use crate::rewrite::RewriteContext;
use crate::topology::TopologyService;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub topologies: Arc<TopologyService>,
    pub dispatcher: Arc<Dispatcher>,
    pub settings: Arc<GatewaySettings>,
    pub max_request_body: usize,
}

/// The gateway's client-facing HTTP server.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &GatewayConfig, topologies: Arc<TopologyService>) -> Self {
        let state = AppState {
            topologies,
            dispatcher: Arc::new(Dispatcher::new(
                &config.dispatch,
                RetryPolicy::from_config(&config.retries),
            )),
            settings: Arc::new(config.gateway.clone()),
            max_request_body: config.dispatch.max_request_body_bytes,
        };
        let authenticator = auth::from_config(&config.auth);

        let router = Router::new()
            .fallback(gateway_handler)
            .with_state(state)
            .layer(middleware::from_fn_with_state(authenticator, auth_middleware))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get(X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

        Self { router }
    }

    /// The fully layered router, for serving or driving in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Gateway listening");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Gateway draining connections");
            })
            .await?;

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

/// Metric labels learned while routing.
struct Labels {
    topology: String,
    service: String,
}

async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let mut labels = Labels {
        topology: "unknown".to_string(),
        service: "none".to_string(),
    };

    let response = match route(&state, request, &mut labels).await {
        Ok(response) => response,
        Err(e) => {
            let status = e.status();
            if status.is_server_error() {
                tracing::error!(
                    topology = %labels.topology,
                    service = %labels.service,
                    status = status.as_u16(),
                    error = %e,
                    "Gateway request failed"
                );
            } else {
                tracing::debug!(status = status.as_u16(), error = %e, "Gateway request rejected");
            }
            e.into_response()
        }
    };

    metrics::record_request(
        &labels.topology,
        &labels.service,
        response.status().as_u16(),
        start,
    );
    response
}

async fn route(
    state: &AppState,
    request: Request<Body>,
    labels: &mut Labels,
) -> Result<Response, GatewayError> {
    let path = GatewayPath::parse(&state.settings.path, request.uri())
        .ok_or_else(|| GatewayError::NotFound(request.uri().path().to_string()))?;

    // One snapshot serves the whole request, even across a redeploy.
    let context = state
        .topologies
        .active(&path.topology)
        .ok_or_else(|| GatewayError::TopologyNotFound(path.topology.clone()))?;
    labels.topology = context.topology.clone();

    let segments: Vec<&str> = path.segments.iter().map(String::as_str).collect();
    let (service, remaining) =
        context
            .resolve(&segments)
            .ok_or_else(|| GatewayError::ServiceNotFound {
                topology: context.topology.clone(),
                path: format!("/{}", segments.join("/")),
            })?;
    labels.service = service.role.clone();

    let contract = service.contract();
    if !contract.allows(request.method()) {
        return Err(GatewayError::MethodNotAllowed {
            method: request.method().clone(),
            allowed: contract.methods.clone(),
        });
    }

    let principal = request
        .extensions()
        .get::<Principal>()
        .map(|p| p.name.clone());
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ctx = RewriteContext::new(frontend_url(
        &state.settings,
        request.headers(),
        request.uri(),
        &context.topology,
    ))
    .with_username(principal.clone());

    let (parts, body) = request.into_parts();
    let body = collect_limited(body, state.max_request_body)
        .await
        .map_err(|e| match e {
            BodyError::TooLarge { limit } => DispatchError::RequestTooLarge { limit },
            BodyError::Read(reason) => DispatchError::Body(reason),
        })?;

    let outbound = prepare_outbound(
        &service,
        &path,
        remaining,
        Inbound {
            method: parts.method,
            headers: parts.headers,
            body,
            client_ip,
            principal: principal.as_deref(),
        },
        &ctx,
    )?;

    tracing::debug!(
        topology = %context.topology,
        generation = context.generation,
        service = %service.role,
        path = %outbound.relative,
        "Routing request"
    );

    let dispatched = state.dispatcher.dispatch(&service, &outbound, &ctx).await?;
    tracing::debug!(
        target = %dispatched.target_url,
        status = dispatched.response.status().as_u16(),
        attempts = dispatched.attempts,
        "Backend answered"
    );

    response::finish(&state.dispatcher, &service, dispatched, &outbound.method, &ctx).await
}
