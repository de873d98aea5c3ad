use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::ToSocketAddrs;
use tokio_util::sync::CancellationToken;

use crate::container::Container;
use crate::enrich::ContainerLookup;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind API listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("API server failed: {0}")]
    Serve(#[source] std::io::Error),
}

type Result<T> = std::result::Result<T, Error>;

async fn list_containers<L>(registry: State<Arc<L>>) -> Json<HashMap<String, Arc<Container>>>
where
    L: ContainerLookup + Send + Sync + 'static,
{
    Json(registry.containers())
}

async fn show_container<L>(registry: State<Arc<L>>, Path(key): Path<String>) -> Response
where
    L: ContainerLookup + Send + Sync + 'static,
{
    match registry.container(&key) {
        Some(container) => (axum::http::StatusCode::OK, Json(container)).into_response(),
        None => (axum::http::StatusCode::NOT_FOUND, "container not found").into_response(),
    }
}

/// Read-only HTTP view of the container registry.
pub struct APIServer {
    router: axum::Router,
}

impl APIServer {
    pub fn new<L>(registry: Arc<L>) -> Self
    where
        L: ContainerLookup + Send + Sync + 'static,
    {
        let router = axum::Router::new()
            .route("/containers", get(list_containers::<L>))
            .route("/containers/{key}", get(show_container::<L>))
            .with_state(registry);
        Self { router }
    }

    /// Serves requests on `addr` until `shutdown` is cancelled.
    pub async fn listen(
        self,
        addr: impl ToSocketAddrs,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(Error::Bind)?;
        if let Ok(addr) = listener.local_addr() {
            log::info!("Serving container registry on http://{addr}");
        }
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(Error::Serve)
    }
}
