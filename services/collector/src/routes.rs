//! HTTP surface. Each route gathers the raw request, runs the shared pipeline around the
//! matching [`Endpoint`] and turns the result back into a response.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use pulse_core::{Inbound, Outbound, TransportPipeline};

use crate::backend::CollectorService;
use crate::handlers::{Endpoint, Operation};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CollectorService>,
    pub pipeline: Arc<TransportPipeline>,
}

impl AppState {
    pub fn new(service: Arc<CollectorService>, pipeline: TransportPipeline) -> Self {
        Self { service, pipeline: Arc::new(pipeline) }
    }

    /// Runs the pipeline; failures become their plain-text error response.
    pub async fn dispatch(&self, op: Operation, req: Inbound) -> Outbound {
        let endpoint = Endpoint::new(self.service.clone(), op);
        match self.pipeline.run(req, &endpoint).await {
            Ok(out) => out,
            Err(e) => e.to_outbound(),
        }
    }
}

pub struct HttpReply(pub Outbound);

impl IntoResponse for HttpReply {
    fn into_response(self) -> Response {
        let Outbound { status, headers, body } = self.0;
        (status, headers, body).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ping", get(ping))
        .route("/update/", post(update_json))
        .route("/update/:kind/:id/:value", post(update_path))
        .route("/updates/", post(update_batch))
        .route("/value/", post(value_json))
        .route("/value/:kind/:id", get(value_path))
        .with_state(state)
}

async fn serve(state: &AppState, op: Operation, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> HttpReply {
    HttpReply(state.dispatch(op, Inbound::new(method.as_str(), uri.path(), headers, body)).await)
}

async fn index(State(state): State<AppState>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> HttpReply {
    serve(&state, Operation::Index, method, uri, headers, body).await
}

async fn ping(State(state): State<AppState>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> HttpReply {
    serve(&state, Operation::Ping, method, uri, headers, body).await
}

async fn update_json(State(state): State<AppState>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> HttpReply {
    serve(&state, Operation::UpdateJson, method, uri, headers, body).await
}

async fn update_batch(State(state): State<AppState>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> HttpReply {
    serve(&state, Operation::UpdateBatch, method, uri, headers, body).await
}

async fn value_json(State(state): State<AppState>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> HttpReply {
    serve(&state, Operation::ValueJson, method, uri, headers, body).await
}

async fn update_path(
    State(state): State<AppState>,
    Path((kind, id, value)): Path<(String, String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> HttpReply {
    serve(&state, Operation::UpdatePath { kind, id, value }, method, uri, headers, body).await
}

async fn value_path(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> HttpReply {
    serve(&state, Operation::ValuePath { kind, id }, method, uri, headers, body).await
}
