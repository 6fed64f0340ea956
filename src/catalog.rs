use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{LibError, Result};
use crate::models::{
    AnalysisKind, GraphId, GraphRecord, JobId, JobRecord, JobStatus, VertexId,
};

/// A graph row removed together with the job rows that referenced it.
#[derive(Debug, Clone)]
pub struct DeletedGraph {
    pub graph: GraphRecord,
    pub jobs: Vec<JobRecord>,
}

/// Relational storage for graph and job records.
///
/// Job status writes are conditional on the current status so that the
/// lifecycle only moves forward: each transition method returns `false`
/// when the row is missing or not in the expected state.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn create_graph(&self, data_ref: &str) -> Result<GraphRecord>;

    async fn get_graph(&self, graph_id: GraphId) -> Result<Option<GraphRecord>>;

    async fn list_graphs(&self) -> Result<Vec<GraphRecord>>;

    /// Points the graph at a new payload and clears its visual. Returns the previous record.
    async fn replace_graph_data(
        &self,
        graph_id: GraphId,
        data_ref: &str,
    ) -> Result<Option<GraphRecord>>;

    /// Records a render of `data_ref`. Refused when the payload has changed or a
    /// visual is already recorded.
    async fn set_visual_ref(
        &self,
        graph_id: GraphId,
        data_ref: &str,
        visual_ref: &str,
    ) -> Result<bool>;

    /// Clears `visual_ref` if it is still the recorded visual.
    async fn clear_visual_ref(&self, graph_id: GraphId, visual_ref: &str) -> Result<bool>;

    /// Deletes the graph and every job referencing it.
    async fn delete_graph(&self, graph_id: GraphId) -> Result<Option<DeletedGraph>>;

    /// Inserts a `queued` job. Fails with `NotFound` when the graph does not exist.
    async fn create_job(
        &self,
        graph_id: GraphId,
        analysis: AnalysisKind,
        root: Option<VertexId>,
    ) -> Result<JobRecord>;

    async fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>>;

    async fn list_jobs(&self) -> Result<Vec<JobRecord>>;

    /// `queued -> running`.
    async fn claim_job(&self, job_id: JobId) -> Result<bool>;

    /// `running -> completed`, setting the result reference.
    async fn complete_job(&self, job_id: JobId, result_ref: &str) -> Result<bool>;

    /// `queued | running -> error`.
    async fn fail_job(&self, job_id: JobId, diagnostic: &str) -> Result<bool>;

    /// Fails every job in `status` (`queued` or `running`) last updated before `updated_before`.
    async fn fail_stale_jobs(
        &self,
        status: JobStatus,
        updated_before: DateTime<Utc>,
        diagnostic: &str,
    ) -> Result<Vec<JobId>>;

    /// Deletes every job row, returning the removed rows.
    async fn clear_jobs(&self) -> Result<Vec<JobRecord>>;
}

pub(crate) fn graph_not_found(graph_id: GraphId) -> LibError {
    LibError::not_found(
        "Graph not found",
        anyhow!("graphid {} does not exist in the catalog", graph_id),
    )
}

#[derive(Debug, Default)]
struct MemoryState {
    last_graph_id: i64,
    last_job_id: i64,
    graphs: BTreeMap<GraphId, GraphRecord>,
    jobs: BTreeMap<JobId, JobRecord>,
}

impl MemoryState {
    fn transition(
        &mut self,
        job_id: JobId,
        from: &[JobStatus],
        to: JobStatus,
        update: impl FnOnce(&mut JobRecord),
    ) -> bool {
        match self.jobs.get_mut(&job_id) {
            Some(job) if from.contains(&job.status) => {
                job.status = to;
                job.updated_at = Utc::now();
                update(job);
                true
            }
            _ => false,
        }
    }
}

/// Process-local catalog used when no database is configured, and in tests.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<MemoryState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| {
            LibError::storage("Catalog is unavailable", anyhow!("catalog lock poisoned"))
        })
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn create_graph(&self, data_ref: &str) -> Result<GraphRecord> {
        let mut state = self.state()?;
        state.last_graph_id += 1;
        let now = Utc::now();
        let graph = GraphRecord {
            id: GraphId(state.last_graph_id),
            data_ref: data_ref.to_string(),
            visual_ref: None,
            created_at: now,
            updated_at: now,
        };
        state.graphs.insert(graph.id, graph.clone());
        Ok(graph)
    }

    async fn get_graph(&self, graph_id: GraphId) -> Result<Option<GraphRecord>> {
        Ok(self.state()?.graphs.get(&graph_id).cloned())
    }

    async fn list_graphs(&self) -> Result<Vec<GraphRecord>> {
        Ok(self.state()?.graphs.values().cloned().collect())
    }

    async fn replace_graph_data(
        &self,
        graph_id: GraphId,
        data_ref: &str,
    ) -> Result<Option<GraphRecord>> {
        let mut state = self.state()?;
        let Some(graph) = state.graphs.get_mut(&graph_id) else {
            return Ok(None);
        };
        let previous = graph.clone();
        graph.data_ref = data_ref.to_string();
        graph.visual_ref = None;
        graph.updated_at = Utc::now();
        Ok(Some(previous))
    }

    async fn set_visual_ref(
        &self,
        graph_id: GraphId,
        data_ref: &str,
        visual_ref: &str,
    ) -> Result<bool> {
        let mut state = self.state()?;
        match state.graphs.get_mut(&graph_id) {
            Some(graph) if graph.data_ref == data_ref && graph.visual_ref.is_none() => {
                graph.visual_ref = Some(visual_ref.to_string());
                graph.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_visual_ref(&self, graph_id: GraphId, visual_ref: &str) -> Result<bool> {
        let mut state = self.state()?;
        match state.graphs.get_mut(&graph_id) {
            Some(graph) if graph.visual_ref.as_deref() == Some(visual_ref) => {
                graph.visual_ref = None;
                graph.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_graph(&self, graph_id: GraphId) -> Result<Option<DeletedGraph>> {
        let mut state = self.state()?;
        let Some(graph) = state.graphs.remove(&graph_id) else {
            return Ok(None);
        };
        let job_ids: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| job.graph_id == graph_id)
            .map(|job| job.id)
            .collect();
        let jobs = job_ids
            .into_iter()
            .filter_map(|job_id| state.jobs.remove(&job_id))
            .collect();
        Ok(Some(DeletedGraph { graph, jobs }))
    }

    async fn create_job(
        &self,
        graph_id: GraphId,
        analysis: AnalysisKind,
        root: Option<VertexId>,
    ) -> Result<JobRecord> {
        let mut state = self.state()?;
        if !state.graphs.contains_key(&graph_id) {
            return Err(graph_not_found(graph_id));
        }
        state.last_job_id += 1;
        let now = Utc::now();
        let job = JobRecord {
            id: JobId(state.last_job_id),
            graph_id,
            analysis,
            root,
            status: JobStatus::Queued,
            result_ref: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>> {
        Ok(self.state()?.jobs.get(&job_id).cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        Ok(self.state()?.jobs.values().cloned().collect())
    }

    async fn claim_job(&self, job_id: JobId) -> Result<bool> {
        Ok(self
            .state()?
            .transition(job_id, &[JobStatus::Queued], JobStatus::Running, |_| {}))
    }

    async fn complete_job(&self, job_id: JobId, result_ref: &str) -> Result<bool> {
        Ok(self.state()?.transition(
            job_id,
            &[JobStatus::Running],
            JobStatus::Completed,
            |job| job.result_ref = Some(result_ref.to_string()),
        ))
    }

    async fn fail_job(&self, job_id: JobId, diagnostic: &str) -> Result<bool> {
        Ok(self.state()?.transition(
            job_id,
            &[JobStatus::Queued, JobStatus::Running],
            JobStatus::Error,
            |job| job.error = Some(diagnostic.to_string()),
        ))
    }

    async fn fail_stale_jobs(
        &self,
        status: JobStatus,
        updated_before: DateTime<Utc>,
        diagnostic: &str,
    ) -> Result<Vec<JobId>> {
        if status.is_terminal() {
            return Ok(Vec::new());
        }
        let mut state = self.state()?;
        let stale: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| job.status == status && job.updated_at < updated_before)
            .map(|job| job.id)
            .collect();
        for job_id in &stale {
            state.transition(
                *job_id,
                &[JobStatus::Queued, JobStatus::Running],
                JobStatus::Error,
                |job| job.error = Some(diagnostic.to_string()),
            );
        }
        Ok(stale)
    }

    async fn clear_jobs(&self) -> Result<Vec<JobRecord>> {
        let mut state = self.state()?;
        Ok(std::mem::take(&mut state.jobs).into_values().collect())
    }
}
