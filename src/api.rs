use anyhow::anyhow;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;

use crate::error::{ErrorKind, LibError};
use crate::models::{AnalysisQuery, GraphId, JobId, RandomGraphQuery};
use crate::operations::GraphService;
use crate::render::VISUAL_CONTENT_TYPE;

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self(LibError::invalid_with_code(
            "invalid_query_parameter",
            "Query parameters are malformed",
            anyhow!("{}", rejection.body_text()),
        ))
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self(LibError::invalid_with_code(
            "invalid_path_parameter",
            "Path parameters are malformed",
            anyhow!("{}", rejection.body_text()),
        ))
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidRequest | ErrorKind::InvalidConstraint => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidRoot | ErrorKind::UnsupportedInput => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Storage | ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind);
        tracing::error!(kind = ?self.0.kind, code = self.0.code, error = %self.0.source, "graph api request failed");
        let body = json!({
            "error": {
                "code": self.0.code,
                "message": self.0.public,
            }
        });
        (status, Json(body)).into_response()
    }
}

pub trait HasGraphService {
    fn graph_service(&self) -> &GraphService;
}

pub trait GraphApp: HasGraphService {}

impl<T: HasGraphService> GraphApp for T {}

impl HasGraphService for GraphService {
    fn graph_service(&self) -> &GraphService {
        self
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn upload_graph_handler<S>(
    State(app): State<S>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let stored = app.graph_service().upload_graph(&body).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn get_graph_handler<S>(
    State(app): State<S>,
    graph_id: Result<Path<GraphId>, PathRejection>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let Path(graph_id) = graph_id?;
    let payload = app.graph_service().get_graph(graph_id).await?;
    Ok(Json(payload))
}

async fn replace_graph_handler<S>(
    State(app): State<S>,
    graph_id: Result<Path<GraphId>, PathRejection>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let Path(graph_id) = graph_id?;
    let stored = app.graph_service().replace_graph(graph_id, &body).await?;
    Ok(Json(stored))
}

async fn delete_graph_handler<S>(
    State(app): State<S>,
    graph_id: Result<Path<GraphId>, PathRejection>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let Path(graph_id) = graph_id?;
    app.graph_service().delete_graph(graph_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_graphs_handler<S>(State(app): State<S>) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let graphs = app.graph_service().list_graphs().await?;
    Ok(Json(graphs))
}

async fn random_graph_handler<S>(
    State(app): State<S>,
    Path(graph_type): Path<String>,
    query: Result<Query<RandomGraphQuery>, QueryRejection>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let Query(query) = query?;
    let stored = app.graph_service().generate_random(&graph_type, query).await?;
    Ok(Json(stored))
}

async fn visual_handler<S>(
    State(app): State<S>,
    graph_id: Result<Path<GraphId>, PathRejection>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let Path(graph_id) = graph_id?;
    let image = app.graph_service().get_visual(graph_id).await?;
    Ok(([(header::CONTENT_TYPE, VISUAL_CONTENT_TYPE)], image))
}

async fn start_analysis_handler<S>(
    State(app): State<S>,
    path: Result<Path<(GraphId, String)>, PathRejection>,
    query: Result<Query<AnalysisQuery>, QueryRejection>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let Path((graph_id, analysis_type)) = path?;
    let Query(query) = query?;
    let started = app
        .graph_service()
        .start_analysis(graph_id, &analysis_type, query.root.as_deref())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

async fn results_handler<S>(
    State(app): State<S>,
    job_id: Result<Path<JobId>, PathRejection>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let Path(job_id) = job_id?;
    let results = app.graph_service().get_results(job_id).await?;
    Ok(Json(results))
}

async fn list_jobs_handler<S>(State(app): State<S>) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let jobs = app.graph_service().list_jobs().await?;
    Ok(Json(jobs))
}

async fn clear_jobs_handler<S>(State(app): State<S>) -> Result<impl IntoResponse, AppError>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    let cleared = app.graph_service().clear_jobs().await?;
    Ok(Json(cleared))
}

pub fn routes<S>() -> Router<S>
where
    S: GraphApp + Clone + Send + Sync + 'static,
{
    tracing::info!("Registering route /healthz [GET]");
    tracing::info!("Registering route /graph [POST]");
    tracing::info!("Registering route /graph/{{graph_id}} [GET,PUT,DELETE]");
    tracing::info!("Registering route /graphs [GET]");
    tracing::info!("Registering route /random/{{graph_type}} [GET]");
    tracing::info!("Registering route /visual/{{graph_id}} [GET]");
    tracing::info!("Registering route /analysis/{{graph_id}}/{{analysis_type}} [GET]");
    tracing::info!("Registering route /results/{{job_id}} [GET]");
    tracing::info!("Registering route /jobs [GET,DELETE]");

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/graph", post(upload_graph_handler::<S>))
        .route(
            "/graph/{graph_id}",
            get(get_graph_handler::<S>)
                .put(replace_graph_handler::<S>)
                .delete(delete_graph_handler::<S>),
        )
        .route("/graphs", get(list_graphs_handler::<S>))
        .route("/random/{graph_type}", get(random_graph_handler::<S>))
        .route("/visual/{graph_id}", get(visual_handler::<S>))
        .route(
            "/analysis/{graph_id}/{analysis_type}",
            get(start_analysis_handler::<S>),
        )
        .route("/results/{job_id}", get(results_handler::<S>))
        .route(
            "/jobs",
            get(list_jobs_handler::<S>).delete(clear_jobs_handler::<S>),
        )
}
