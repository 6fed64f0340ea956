use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::catalog::{Catalog, graph_not_found};
use crate::codec::{decode_payload, encode_payload};
use crate::config::{AppConfig, GenerationSettings, RenderSettings};
use crate::dispatcher::JobDispatcher;
use crate::error::{ErrorKind, LibError, Result};
use crate::generator;
use crate::models::{
    ClearedJobs, GenerationKind, GraphId, GraphPayload, GraphRecord, JobId, JobRecord,
    JobResults, RandomGraphQuery, StartedJob, StoredGraph,
};
use crate::render;
use crate::store::{BlobKind, BlobStore, new_blob_key};

// A concurrent replace can delete the blob between reading the record and the blob.
const LOAD_ATTEMPTS: usize = 3;

/// Scriptable graph actions, for callers that drive the service with JSON
/// rather than through the HTTP routes. Visuals are binary and not covered.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum GraphOperation {
    Upload {
        payload: GraphPayload,
    },
    Replace {
        graph_id: GraphId,
        payload: GraphPayload,
    },
    Get {
        graph_id: GraphId,
    },
    List,
    Delete {
        graph_id: GraphId,
    },
    GenerateRandom {
        graph_type: String,
        #[serde(default)]
        query: RandomGraphQuery,
    },
    StartAnalysis {
        graph_id: GraphId,
        analysis_type: String,
        root: Option<String>,
    },
    GetResults {
        job_id: JobId,
    },
    ListJobs,
    ClearJobs,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GraphOperationResult {
    Graph { graph: StoredGraph },
    Payload { payload: GraphPayload },
    Graphs { items: Vec<GraphRecord> },
    Deleted,
    JobStarted { job_id: JobId },
    Results { results: JobResults },
    Jobs { items: Vec<JobRecord> },
    JobsCleared { deleted: usize },
}

/// Request-path operations over the catalog and blob store.
#[derive(Clone)]
pub struct GraphService {
    catalog: Arc<dyn Catalog>,
    blobs: Arc<dyn BlobStore>,
    dispatcher: JobDispatcher,
    generation: GenerationSettings,
    render: RenderSettings,
    key_prefix: Arc<str>,
}

impl GraphService {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        blobs: Arc<dyn BlobStore>,
        dispatcher: JobDispatcher,
        config: &AppConfig,
    ) -> Self {
        Self {
            catalog,
            blobs,
            dispatcher,
            generation: config.generation.clone(),
            render: config.render.clone(),
            key_prefix: Arc::from(config.key_prefix.as_str()),
        }
    }

    /// Builds the service together with its analysis worker.
    pub fn spawn(
        catalog: Arc<dyn Catalog>,
        blobs: Arc<dyn BlobStore>,
        config: &AppConfig,
    ) -> (Self, JoinHandle<()>) {
        let (dispatcher, worker) = JobDispatcher::spawn(
            Arc::clone(&catalog),
            Arc::clone(&blobs),
            config.analysis.clone(),
            config.key_prefix.as_str(),
        );
        (Self::new(catalog, blobs, dispatcher, config), worker)
    }

    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }

    pub async fn execute(&self, operation: GraphOperation) -> Result<GraphOperationResult> {
        match operation {
            GraphOperation::Upload { payload } => {
                let graph = self.store_payload(payload).await?;
                Ok(GraphOperationResult::Graph { graph })
            }
            GraphOperation::Replace { graph_id, payload } => {
                let graph = self.replace_payload(graph_id, payload).await?;
                Ok(GraphOperationResult::Graph { graph })
            }
            GraphOperation::Get { graph_id } => {
                let payload = self.get_graph(graph_id).await?;
                Ok(GraphOperationResult::Payload { payload })
            }
            GraphOperation::List => {
                let items = self.list_graphs().await?;
                Ok(GraphOperationResult::Graphs { items })
            }
            GraphOperation::Delete { graph_id } => {
                self.delete_graph(graph_id).await?;
                Ok(GraphOperationResult::Deleted)
            }
            GraphOperation::GenerateRandom { graph_type, query } => {
                let graph = self.generate_random(&graph_type, query).await?;
                Ok(GraphOperationResult::Graph { graph })
            }
            GraphOperation::StartAnalysis {
                graph_id,
                analysis_type,
                root,
            } => {
                let started = self
                    .start_analysis(graph_id, &analysis_type, root.as_deref())
                    .await?;
                Ok(GraphOperationResult::JobStarted {
                    job_id: started.job_id,
                })
            }
            GraphOperation::GetResults { job_id } => {
                let results = self.get_results(job_id).await?;
                Ok(GraphOperationResult::Results { results })
            }
            GraphOperation::ListJobs => {
                let items = self.list_jobs().await?;
                Ok(GraphOperationResult::Jobs { items })
            }
            GraphOperation::ClearJobs => {
                let cleared = self.clear_jobs().await?;
                Ok(GraphOperationResult::JobsCleared {
                    deleted: cleared.deleted,
                })
            }
        }
    }

    pub async fn upload_graph(&self, bytes: &[u8]) -> Result<StoredGraph> {
        let payload = decode_payload(bytes)?;
        self.store_payload(payload).await
    }

    pub async fn replace_graph(&self, graph_id: GraphId, bytes: &[u8]) -> Result<StoredGraph> {
        let payload = decode_payload(bytes)?;
        self.replace_payload(graph_id, payload).await
    }

    pub async fn get_graph(&self, graph_id: GraphId) -> Result<GraphPayload> {
        let (_, payload) = self.load_graph(graph_id).await?;
        Ok(payload)
    }

    pub async fn list_graphs(&self) -> Result<Vec<GraphRecord>> {
        self.catalog.list_graphs().await
    }

    /// Deletes the graph and its jobs, then removes their blobs best-effort.
    pub async fn delete_graph(&self, graph_id: GraphId) -> Result<()> {
        let deleted = self
            .catalog
            .delete_graph(graph_id)
            .await?
            .ok_or_else(|| graph_not_found(graph_id))?;
        info!(graph_id = %graph_id, jobs = deleted.jobs.len(), "graph deleted");

        self.discard_blob(&deleted.graph.data_ref).await;
        if let Some(visual_ref) = &deleted.graph.visual_ref {
            self.discard_blob(visual_ref).await;
        }
        for job in &deleted.jobs {
            if let Some(result_ref) = &job.result_ref {
                self.discard_blob(result_ref).await;
            }
        }
        Ok(())
    }

    pub async fn generate_random(
        &self,
        graph_type: &str,
        query: RandomGraphQuery,
    ) -> Result<StoredGraph> {
        let kind: GenerationKind = graph_type.parse()?;
        let payload = {
            let mut rng = rand::thread_rng();
            generator::generate(kind, query.vertices, query.edges, &self.generation, &mut rng)?
        };
        info!(
            kind = %kind,
            vertices = payload.vertices.len(),
            edges = payload.edges.len(),
            "random graph generated"
        );
        self.store_payload(payload).await
    }

    /// Returns the cached rendering for the graph's current payload, rendering on a miss.
    pub async fn get_visual(&self, graph_id: GraphId) -> Result<Vec<u8>> {
        for _ in 0..LOAD_ATTEMPTS {
            let graph = self.require_graph(graph_id).await?;

            if let Some(visual_ref) = &graph.visual_ref {
                match self.blobs.get(visual_ref).await {
                    Ok(bytes) => return Ok(bytes),
                    Err(err) if err.kind == ErrorKind::NotFound => {
                        warn!(graph_id = %graph_id, visual_ref = %visual_ref, "cached visual is missing, re-rendering");
                        self.catalog.clear_visual_ref(graph_id, visual_ref).await?;
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            let bytes = match self.blobs.get(&graph.data_ref).await {
                Ok(bytes) => bytes,
                Err(err) if err.kind == ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            let settings = self.render.clone();
            let svg = tokio::task::spawn_blocking(move || {
                let payload = decode_payload(&bytes)?;
                Ok::<_, LibError>(render::render_svg(
                    &payload,
                    &settings,
                    &mut rand::thread_rng(),
                ))
            })
            .await
            .map_err(|err| LibError::unknown("Rendering terminated abnormally", anyhow!(err)))??;

            let visual_ref = new_blob_key(&self.key_prefix, BlobKind::Visual);
            self.blobs.put(&visual_ref, svg.clone()).await?;
            match self
                .catalog
                .set_visual_ref(graph_id, &graph.data_ref, &visual_ref)
                .await
            {
                Ok(true) => info!(graph_id = %graph_id, "graph visual rendered"),
                Ok(false) => {
                    info!(graph_id = %graph_id, "graph changed or was rendered concurrently, not caching");
                    self.discard_blob(&visual_ref).await;
                }
                Err(err) => {
                    self.discard_blob(&visual_ref).await;
                    return Err(err);
                }
            }
            return Ok(svg);
        }

        Err(LibError::storage(
            "Graph visual could not be produced",
            anyhow!("graph {} kept changing while rendering", graph_id),
        ))
    }

    pub async fn start_analysis(
        &self,
        graph_id: GraphId,
        analysis_type: &str,
        root: Option<&str>,
    ) -> Result<StartedJob> {
        let job_id = self
            .dispatcher
            .start_analysis(graph_id, analysis_type, root)
            .await?;
        Ok(StartedJob { job_id })
    }

    pub async fn get_results(&self, job_id: JobId) -> Result<JobResults> {
        self.dispatcher.get_results(job_id).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        self.catalog.list_jobs().await
    }

    pub async fn clear_jobs(&self) -> Result<ClearedJobs> {
        let cleared = self.catalog.clear_jobs().await?;
        info!(count = cleared.len(), "analysis jobs cleared");
        for job in &cleared {
            if let Some(result_ref) = &job.result_ref {
                self.discard_blob(result_ref).await;
            }
        }
        Ok(ClearedJobs {
            deleted: cleared.len(),
        })
    }

    async fn require_graph(&self, graph_id: GraphId) -> Result<GraphRecord> {
        self.catalog
            .get_graph(graph_id)
            .await?
            .ok_or_else(|| graph_not_found(graph_id))
    }

    async fn load_graph(&self, graph_id: GraphId) -> Result<(GraphRecord, GraphPayload)> {
        let mut last_err = None;
        for _ in 0..LOAD_ATTEMPTS {
            let graph = self.require_graph(graph_id).await?;
            match self.blobs.get(&graph.data_ref).await {
                Ok(bytes) => {
                    let payload = decode_payload(&bytes)?;
                    return Ok((graph, payload));
                }
                Err(err) if err.kind == ErrorKind::NotFound => last_err = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| graph_not_found(graph_id)))
    }

    async fn store_payload(&self, payload: GraphPayload) -> Result<StoredGraph> {
        let data_ref = new_blob_key(&self.key_prefix, BlobKind::GraphData);
        self.blobs.put(&data_ref, encode_payload(&payload)?).await?;
        let graph = match self.catalog.create_graph(&data_ref).await {
            Ok(graph) => graph,
            Err(err) => {
                self.discard_blob(&data_ref).await;
                return Err(err);
            }
        };
        info!(
            graph_id = %graph.id,
            vertices = payload.vertices.len(),
            edges = payload.edges.len(),
            "graph stored"
        );
        Ok(StoredGraph { graph, payload })
    }

    async fn replace_payload(&self, graph_id: GraphId, payload: GraphPayload) -> Result<StoredGraph> {
        let data_ref = new_blob_key(&self.key_prefix, BlobKind::GraphData);
        self.blobs.put(&data_ref, encode_payload(&payload)?).await?;
        let previous = match self.catalog.replace_graph_data(graph_id, &data_ref).await {
            Ok(Some(previous)) => previous,
            Ok(None) => {
                self.discard_blob(&data_ref).await;
                return Err(graph_not_found(graph_id));
            }
            Err(err) => {
                self.discard_blob(&data_ref).await;
                return Err(err);
            }
        };
        info!(graph_id = %graph_id, "graph payload replaced");

        self.discard_blob(&previous.data_ref).await;
        if let Some(visual_ref) = &previous.visual_ref {
            self.discard_blob(visual_ref).await;
        }
        let graph = self.require_graph(graph_id).await?;
        Ok(StoredGraph { graph, payload })
    }

    async fn discard_blob(&self, key: &str) {
        if let Err(err) = self.blobs.delete(key).await {
            warn!(key, error = %err, "failed to delete blob");
        }
    }
}
