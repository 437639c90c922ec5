//! HTTP server implementation
//!
//! hyper http1 over a plain accept loop; every connection gets its own
//! task and a shared `Arc<AppState>`. Routing is a `(Method, path)` match.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::allocation::Allocator;
use crate::config::Args;
use crate::routes;
use crate::store::Store;
use crate::types::UsherError;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub store: Arc<Store>,
    pub allocator: Arc<Allocator>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, store: Arc<Store>, allocator: Arc<Allocator>) -> Self {
        Self {
            args,
            store,
            allocator,
            started_at: Instant::now(),
        }
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), UsherError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Usher listening on {} as node {}",
        state.args.listen, state.args.node_id
    );
    if state.args.dev_mode {
        warn!("Development mode enabled - store may be memory-only");
    }

    // Keep the store's TTL caches swept
    state.store.spawn_cache_sweeps();
    info!("Cache sweeps started (TTL {}s)", state.args.cache_ttl_secs);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    info!("[{}] {} {}", addr, method, path);

    let response = match (method.clone(), path.as_str()) {
        // Liveness probe
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(&state))
        }

        // Readiness probe for load balancers
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            routes::readiness_check(Arc::clone(&state))
        }

        // Version info for deployment verification
        (Method::GET, "/version") => routes::version_info(),

        // CORS preflight
        (Method::OPTIONS, _) => routes::preflight_response(),

        // ====================================================================
        // Allocation webhook
        // ====================================================================
        (Method::POST, "/post/allocate") => {
            let body = read_body(req).await?;
            routes::handle_allocate_request(Arc::clone(&state), body, Some(addr.ip())).await
        }
        (Method::GET, "/post/allocate") => routes::handle_allocate_hint(),

        // ====================================================================
        // Admin CRUD: office closures and capacity overrides
        // ====================================================================
        (m, p) if p == "/closures" || p.starts_with("/closures/") => {
            let body = read_body(req).await?;
            routes::handle_closures_request(Arc::clone(&state), m, &path, body).await
        }
        (m, p) if p == "/capacity_overrides" || p.starts_with("/capacity_overrides/") => {
            let body = read_body(req).await?;
            routes::handle_overrides_request(Arc::clone(&state), m, &path, body).await
        }

        // ====================================================================
        // Availability read views
        // ====================================================================
        (Method::GET, "/availability/earliest") => {
            routes::handle_earliest_request(Arc::clone(&state), query.as_deref()).await
        }
        (Method::GET, "/availability/schedule") => {
            routes::handle_schedule_request(Arc::clone(&state), query.as_deref()).await
        }

        _ => routes::not_found_response(&path),
    };

    Ok(response)
}

async fn read_body(req: Request<Incoming>) -> Result<Bytes, hyper::Error> {
    Ok(req.into_body().collect().await?.to_bytes())
}
