use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::algorithms;
use crate::catalog::{Catalog, graph_not_found};
use crate::codec::{decode_payload, decode_result, encode_result};
use crate::config::AnalysisSettings;
use crate::error::{LibError, Result};
use crate::models::{AnalysisKind, GraphId, JobId, JobResults, JobStatus, VertexId};
use crate::store::{BlobKind, BlobStore, new_blob_key};

const STATUS_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Unit of work sent from the request path to the analysis worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisTask {
    pub job_id: JobId,
    pub graph_id: GraphId,
    pub kind: AnalysisKind,
    pub root: Option<VertexId>,
}

pub(crate) fn job_not_found(job_id: JobId) -> LibError {
    LibError::not_found(
        "Job not found",
        anyhow!("jobid {} does not exist in the catalog", job_id),
    )
}

fn parse_root(raw: &str) -> Result<VertexId> {
    raw.trim().parse::<VertexId>().map_err(|err| {
        LibError::invalid_with_code(
            "invalid_root_parameter",
            "Root must be an integer vertex identifier",
            anyhow!("root {:?}: {}", raw, err),
        )
    })
}

/// Creates analysis jobs and hands them to a background worker.
///
/// The request path only ever writes `queued`. Every later status write
/// belongs to the single execution that claimed the job (or the watchdog,
/// once that execution is presumed lost).
#[derive(Clone)]
pub struct JobDispatcher {
    executor: Executor,
    queue: mpsc::UnboundedSender<AnalysisTask>,
}

impl JobDispatcher {
    /// Starts the worker loop. It exits once every dispatcher clone is dropped.
    pub fn spawn(
        catalog: Arc<dyn Catalog>,
        blobs: Arc<dyn BlobStore>,
        settings: AnalysisSettings,
        key_prefix: impl Into<Arc<str>>,
    ) -> (Self, JoinHandle<()>) {
        let (queue, receiver) = mpsc::unbounded_channel();
        let executor = Executor {
            catalog,
            blobs,
            settings,
            key_prefix: key_prefix.into(),
        };
        let worker = tokio::spawn(run_worker(executor.clone(), receiver));
        (Self { executor, queue }, worker)
    }

    pub async fn start_analysis(
        &self,
        graph_id: GraphId,
        analysis_type: &str,
        root: Option<&str>,
    ) -> Result<JobId> {
        self.executor
            .catalog
            .get_graph(graph_id)
            .await?
            .ok_or_else(|| graph_not_found(graph_id))?;
        let kind: AnalysisKind = analysis_type.parse()?;
        let root = match root {
            Some(raw) if kind.uses_root() => Some(parse_root(raw)?),
            _ => None,
        };

        let job = self.executor.catalog.create_job(graph_id, kind, root).await?;
        info!(job_id = %job.id, graph_id = %graph_id, kind = %kind, "analysis job queued");

        let task = AnalysisTask {
            job_id: job.id,
            graph_id,
            kind,
            root,
        };
        if self.queue.send(task).is_err() {
            let err = LibError::storage(
                "Analysis queue is unavailable",
                anyhow!("job {} could not be dispatched; worker has stopped", job.id),
            );
            self.executor.fail(job.id, &err.diagnostic()).await;
            return Err(err);
        }

        Ok(job.id)
    }

    pub async fn get_results(&self, job_id: JobId) -> Result<JobResults> {
        let job = self
            .executor
            .catalog
            .get_job(job_id)
            .await?
            .ok_or_else(|| job_not_found(job_id))?;

        let result = match (job.status, job.result_ref.as_deref()) {
            (JobStatus::Completed, Some(result_ref)) => {
                let bytes = self.executor.blobs.get(result_ref).await?;
                let result = decode_result(&bytes)?;
                if result.kind() != job.analysis {
                    return Err(LibError::storage(
                        "Stored analysis result does not match the job",
                        anyhow!(
                            "job {} ran {} but {} holds a {} result",
                            job.id,
                            job.analysis,
                            result_ref,
                            result.kind()
                        ),
                    ));
                }
                Some(result)
            }
            _ => None,
        };

        Ok(JobResults {
            job_id: job.id,
            status: job.status,
            result,
            error: job.error,
        })
    }

    /// Fails running jobs past the run budget and queued jobs past the queue-wait budget,
    /// each extended by one sweep interval.
    pub async fn expire_stale_jobs(&self) -> Result<Vec<JobId>> {
        self.executor.expire_stale_jobs().await
    }

    pub fn spawn_watchdog(&self) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(dispatcher.executor.settings.watchdog_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match dispatcher.expire_stale_jobs().await {
                    Ok(expired) if !expired.is_empty() => {
                        warn!(count = expired.len(), jobs = ?expired, "watchdog failed stale analysis jobs");
                    }
                    Ok(_) => {}
                    Err(err) => error!(error = %err, "watchdog sweep failed"),
                }
            }
        })
    }
}

async fn run_worker(executor: Executor, mut receiver: mpsc::UnboundedReceiver<AnalysisTask>) {
    let permits = Arc::new(Semaphore::new(executor.settings.max_concurrent_jobs.max(1)));
    while let Some(task) = receiver.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let executor = executor.clone();
        tokio::spawn(async move {
            executor.execute(task).await;
            drop(permit);
        });
    }
    info!("analysis queue closed, worker exiting");
}

#[derive(Clone)]
struct Executor {
    catalog: Arc<dyn Catalog>,
    blobs: Arc<dyn BlobStore>,
    settings: AnalysisSettings,
    key_prefix: Arc<str>,
}

impl Executor {
    async fn execute(&self, task: AnalysisTask) {
        let job_id = task.job_id;
        match self.catalog.claim_job(job_id).await {
            Ok(true) => {}
            Ok(false) => {
                info!(job_id = %job_id, "analysis job is no longer queued, skipping");
                return;
            }
            Err(err) => {
                error!(job_id = %job_id, error = %err, "failed to claim analysis job");
                self.fail(job_id, &err.diagnostic()).await;
                return;
            }
        }
        info!(job_id = %job_id, graph_id = %task.graph_id, kind = %task.kind, "analysis job running");

        let budget = self.settings.max_run_duration();
        let mut run = tokio::spawn({
            let executor = self.clone();
            async move { executor.run_analysis(task).await }
        });
        let outcome = match tokio::time::timeout(budget, &mut run).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => Err(LibError::unknown(
                "Analysis execution terminated abnormally",
                anyhow!(join_err),
            )),
            Err(_) => {
                run.abort();
                Err(LibError::unknown(
                    "Analysis exceeded the maximum run duration",
                    anyhow!("job {} still running after {:?}", job_id, budget),
                ))
            }
        };

        match outcome {
            Ok(result_ref) => self.complete(job_id, result_ref).await,
            Err(err) => {
                error!(job_id = %job_id, kind = %task.kind, error = %err, "analysis job failed");
                self.fail(job_id, &err.diagnostic()).await;
            }
        }
    }

    async fn run_analysis(&self, task: AnalysisTask) -> Result<String> {
        let graph = self
            .catalog
            .get_graph(task.graph_id)
            .await?
            .ok_or_else(|| graph_not_found(task.graph_id))?;
        let bytes = self.blobs.get(&graph.data_ref).await?;

        let result = tokio::task::spawn_blocking(move || {
            let payload = decode_payload(&bytes)?;
            algorithms::analyze(&payload, task.kind, task.root)
        })
        .await
        .map_err(|err| LibError::unknown("Analysis execution terminated abnormally", anyhow!(err)))??;

        let result_ref = new_blob_key(&self.key_prefix, BlobKind::AnalysisResult);
        self.blobs.put(&result_ref, encode_result(&result)?).await?;
        Ok(result_ref)
    }

    async fn complete(&self, job_id: JobId, result_ref: String) {
        let written = self
            .with_retries(job_id, || self.catalog.complete_job(job_id, &result_ref))
            .await;
        match written {
            Ok(true) => info!(job_id = %job_id, "analysis job completed"),
            Ok(false) => {
                warn!(job_id = %job_id, "analysis job left running before completion, discarding result");
                self.discard_result(job_id, &result_ref).await;
            }
            Err(err) => {
                error!(job_id = %job_id, error = %err, "failed to record analysis completion");
                self.discard_result(job_id, &result_ref).await;
                self.fail(job_id, &err.diagnostic()).await;
            }
        }
    }

    async fn fail(&self, job_id: JobId, diagnostic: &str) {
        match self
            .with_retries(job_id, || self.catalog.fail_job(job_id, diagnostic))
            .await
        {
            Ok(true) => info!(job_id = %job_id, "analysis job marked as error"),
            Ok(false) => info!(job_id = %job_id, "analysis job already terminal or removed"),
            Err(err) => {
                error!(job_id = %job_id, error = %err, "failed to record analysis failure, leaving it to the watchdog");
            }
        }
    }

    async fn discard_result(&self, job_id: JobId, result_ref: &str) {
        if let Err(err) = self.blobs.delete(result_ref).await {
            warn!(job_id = %job_id, result_ref, error = %err, "failed to delete orphaned analysis result");
        }
    }

    async fn with_retries<F, Fut>(&self, job_id: JobId, mut write: F) -> Result<bool>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let attempts = self.settings.status_write_attempts.max(1);
        let mut attempt = 1;
        loop {
            match write().await {
                Ok(applied) => return Ok(applied),
                Err(err) if attempt < attempts => {
                    warn!(job_id = %job_id, attempt, error = %err, "job status write failed, retrying");
                    tokio::time::sleep(STATUS_RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn expire_stale_jobs(&self) -> Result<Vec<JobId>> {
        let interval = self.settings.watchdog_interval();
        let mut expired = self
            .expire_older_than(
                JobStatus::Running,
                self.settings.max_run_duration() + interval,
                "Analysis did not finish",
            )
            .await?;
        expired.extend(
            self.expire_older_than(
                JobStatus::Queued,
                self.settings.max_queue_wait() + interval,
                "Analysis never started",
            )
            .await?,
        );
        Ok(expired)
    }

    async fn expire_older_than(
        &self,
        status: JobStatus,
        budget: Duration,
        reason: &str,
    ) -> Result<Vec<JobId>> {
        let Some(cutoff) = chrono::Duration::from_std(budget)
            .ok()
            .and_then(|budget| Utc::now().checked_sub_signed(budget))
        else {
            return Ok(Vec::new());
        };
        let diagnostic = format!("{}: no progress recorded within {:?}", reason, budget);
        self.catalog.fail_stale_jobs(status, cutoff, &diagnostic).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tokio::sync::Semaphore;

    use super::JobDispatcher;
    use crate::catalog::{Catalog, MemoryCatalog};
    use crate::codec::{encode_payload, encode_result};
    use crate::config::{AnalysisSettings, GenerationSettings};
    use crate::error::{ErrorKind, LibError, Result};
    use crate::generator;
    use crate::models::{
        AnalysisResult, Edge, GenerationKind, GraphId, GraphPayload, JobId, JobResults,
        JobStatus,
    };
    use crate::store::{BlobKind, BlobStore, MemoryBlobStore, new_blob_key};

    /// Memory store with injectable faults on payload reads and result writes.
    #[derive(Default)]
    struct FaultyBlobStore {
        inner: MemoryBlobStore,
        read_delay: Option<Duration>,
        read_gate: Option<Arc<Semaphore>>,
        reject_results: bool,
        result_puts: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for FaultyBlobStore {
        async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
            let is_result = key.contains("graph_results_file");
            if is_result && self.reject_results {
                return Err(LibError::storage(
                    "Blob storage request failed",
                    anyhow!("injected write failure"),
                ));
            }
            self.inner.put(key, bytes).await?;
            if is_result {
                self.result_puts.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>> {
            if let Some(delay) = self.read_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(gate) = &self.read_gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
    }

    fn settings(max_run_secs: u64) -> AnalysisSettings {
        AnalysisSettings {
            max_run_secs,
            ..AnalysisSettings::default()
        }
    }

    async fn store_graph(
        catalog: &MemoryCatalog,
        blobs: &dyn BlobStore,
        payload: &GraphPayload,
    ) -> GraphId {
        let key = new_blob_key("test", BlobKind::GraphData);
        blobs
            .put(&key, encode_payload(payload).expect("encode"))
            .await
            .expect("put");
        catalog.create_graph(&key).await.expect("create").id
    }

    fn triangle() -> GraphPayload {
        GraphPayload::undirected(
            vec![0, 1, 2],
            vec![Edge::new(0, 1, 1.0), Edge::new(1, 2, 1.0), Edge::new(0, 2, 5.0)],
        )
    }

    async fn wait_for_terminal(dispatcher: &JobDispatcher, job_id: JobId) -> JobResults {
        let mut last_rank = 0;
        for _ in 0..500 {
            let results = dispatcher.get_results(job_id).await.expect("job exists");
            assert!(
                results.status.rank() >= last_rank,
                "status regressed to {:?}",
                results.status
            );
            last_rank = results.status.rank();
            if results.status.is_terminal() {
                return results;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal state", job_id);
    }

    #[tokio::test]
    async fn generated_tree_has_no_cycle() {
        let catalog = Arc::new(MemoryCatalog::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let mut rng = StdRng::seed_from_u64(5);
        let tree = generator::generate(
            GenerationKind::Tree,
            Some(5),
            None,
            &GenerationSettings::default(),
            &mut rng,
        )
        .expect("tree");
        let graph_id = store_graph(&catalog, blobs.as_ref(), &tree).await;
        let (dispatcher, _worker) =
            JobDispatcher::spawn(catalog.clone(), blobs.clone(), settings(30), "test");

        let job_id = dispatcher
            .start_analysis(graph_id, "has_cycle", None)
            .await
            .expect("job starts");
        let results = wait_for_terminal(&dispatcher, job_id).await;
        assert_eq!(results.status, JobStatus::Completed);
        assert_eq!(results.result, Some(AnalysisResult::HasCycle(false)));
        assert_eq!(results.error, None);

        let job = catalog.get_job(job_id).await.expect("get").expect("exists");
        assert!(job.result_ref.is_some());
    }

    #[tokio::test]
    async fn result_of_another_analysis_is_refused() {
        let catalog = Arc::new(MemoryCatalog::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let graph_id = store_graph(&catalog, blobs.as_ref(), &triangle()).await;
        let (dispatcher, _worker) =
            JobDispatcher::spawn(catalog.clone(), blobs.clone(), settings(30), "test");

        let job_id = dispatcher
            .start_analysis(graph_id, "has_cycle", None)
            .await
            .expect("job starts");
        wait_for_terminal(&dispatcher, job_id).await;
        let job = catalog.get_job(job_id).await.expect("get").expect("exists");
        let result_ref = job.result_ref.expect("completed job has a result");
        blobs
            .put(
                &result_ref,
                encode_result(&AnalysisResult::IsConnected(true)).expect("encode"),
            )
            .await
            .expect("overwrite");

        let err = dispatcher
            .get_results(job_id)
            .await
            .expect_err("mismatched result");
        assert_eq!(err.kind, ErrorKind::Storage);
    }

    #[tokio::test]
    async fn absent_root_resolves_to_error() {
        let catalog = Arc::new(MemoryCatalog::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let graph_id = store_graph(&catalog, blobs.as_ref(), &triangle()).await;
        let (dispatcher, _worker) =
            JobDispatcher::spawn(catalog.clone(), blobs.clone(), settings(30), "test");

        for root in [Some("42"), None] {
            let job_id = dispatcher
                .start_analysis(graph_id, "shortest_paths", root)
                .await
                .expect("job starts");
            let results = wait_for_terminal(&dispatcher, job_id).await;
            assert_eq!(results.status, JobStatus::Error);
            assert_eq!(results.result, None);
            assert!(results.error.is_some());
            let job = catalog.get_job(job_id).await.expect("get").expect("exists");
            assert_eq!(job.result_ref, None);
        }
    }

    #[tokio::test]
    async fn shortest_paths_follow_the_root() {
        let catalog = Arc::new(MemoryCatalog::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let graph_id = store_graph(&catalog, blobs.as_ref(), &triangle()).await;
        let (dispatcher, _worker) =
            JobDispatcher::spawn(catalog.clone(), blobs.clone(), settings(30), "test");

        let job_id = dispatcher
            .start_analysis(graph_id, "shortest_paths", Some("0"))
            .await
            .expect("job starts");
        let results = wait_for_terminal(&dispatcher, job_id).await;
        let Some(AnalysisResult::ShortestPaths(paths)) = results.result else {
            panic!("expected shortest paths, got {:?}", results.result);
        };
        assert_eq!(paths.root, 0);
        assert_eq!(paths.paths[&2].distance, Some(2.0));
        assert_eq!(paths.paths[&2].path, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn request_validation_happens_synchronously() {
        let catalog = Arc::new(MemoryCatalog::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let graph_id = store_graph(&catalog, blobs.as_ref(), &triangle()).await;
        let (dispatcher, _worker) =
            JobDispatcher::spawn(catalog.clone(), blobs.clone(), settings(30), "test");

        let err = dispatcher
            .start_analysis(graph_id, "pagerank", None)
            .await
            .expect_err("unknown type");
        assert_eq!(err.kind, ErrorKind::InvalidRequest);

        let err = dispatcher
            .start_analysis(graph_id, "reachable_nodes", Some("north"))
            .await
            .expect_err("unparsable root");
        assert_eq!(err.kind, ErrorKind::InvalidRequest);

        let err = dispatcher
            .start_analysis(GraphId(404), "mst", None)
            .await
            .expect_err("unknown graph");
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err = dispatcher
            .start_analysis(GraphId(404), "pagerank", None)
            .await
            .expect_err("unknown graph and type");
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err = dispatcher
            .start_analysis(GraphId(404), "reachable_nodes", Some("north"))
            .await
            .expect_err("unknown graph and root");
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err = dispatcher
            .get_results(JobId(404))
            .await
            .expect_err("unknown job");
        assert_eq!(err.kind, ErrorKind::NotFound);

        assert!(catalog.list_jobs().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn overrunning_analysis_is_failed() {
        let catalog = Arc::new(MemoryCatalog::new());
        let blobs = Arc::new(FaultyBlobStore {
            read_delay: Some(Duration::from_secs(30)),
            ..FaultyBlobStore::default()
        });
        let graph_id = store_graph(&catalog, blobs.as_ref(), &triangle()).await;
        let (dispatcher, _worker) =
            JobDispatcher::spawn(catalog.clone(), blobs.clone(), settings(1), "test");

        let job_id = dispatcher
            .start_analysis(graph_id, "is_connected", None)
            .await
            .expect("job starts");
        let results = wait_for_terminal(&dispatcher, job_id).await;
        assert_eq!(results.status, JobStatus::Error);
        assert!(
            results
                .error
                .as_deref()
                .is_some_and(|message| message.contains("maximum run duration"))
        );
    }

    #[tokio::test]
    async fn storage_failures_resolve_to_error() {
        let catalog = Arc::new(MemoryCatalog::new());
        let blobs = Arc::new(FaultyBlobStore {
            reject_results: true,
            ..FaultyBlobStore::default()
        });
        let graph_id = store_graph(&catalog, blobs.as_ref(), &triangle()).await;
        let (dispatcher, _worker) =
            JobDispatcher::spawn(catalog.clone(), blobs.clone(), settings(30), "test");

        let job_id = dispatcher
            .start_analysis(graph_id, "mst", None)
            .await
            .expect("job starts");
        let results = wait_for_terminal(&dispatcher, job_id).await;
        assert_eq!(results.status, JobStatus::Error);
        assert_eq!(results.result, None);
    }

    #[tokio::test]
    async fn result_of_removed_job_is_discarded() {
        let catalog = Arc::new(MemoryCatalog::new());
        let gate = Arc::new(Semaphore::new(0));
        let blobs = Arc::new(FaultyBlobStore {
            read_gate: Some(gate.clone()),
            ..FaultyBlobStore::default()
        });
        let graph_id = store_graph(&catalog, blobs.as_ref(), &triangle()).await;
        let (dispatcher, _worker) =
            JobDispatcher::spawn(catalog.clone(), blobs.clone(), settings(30), "test");

        let job_id = dispatcher
            .start_analysis(graph_id, "is_connected", None)
            .await
            .expect("job starts");
        for _ in 0..500 {
            let job = catalog.get_job(job_id).await.expect("get").expect("exists");
            if job.status == JobStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        catalog.clear_jobs().await.expect("clear");
        gate.add_permits(1);

        for _ in 0..500 {
            if blobs.result_puts.load(Ordering::SeqCst) == 1 && blobs.inner.len() == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("orphaned result blob was not removed");
    }

    #[tokio::test]
    async fn closed_queue_fails_the_new_job() {
        let catalog = Arc::new(MemoryCatalog::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let graph_id = store_graph(&catalog, blobs.as_ref(), &triangle()).await;
        let (dispatcher, worker) =
            JobDispatcher::spawn(catalog.clone(), blobs.clone(), settings(30), "test");
        worker.abort();
        let _ = worker.await;

        let err = dispatcher
            .start_analysis(graph_id, "is_connected", None)
            .await
            .expect_err("queue is closed");
        assert_eq!(err.kind, ErrorKind::Storage);

        let jobs = catalog.list_jobs().await.expect("list");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Error);
    }

    #[tokio::test]
    async fn watchdog_expires_abandoned_jobs() {
        let catalog = Arc::new(MemoryCatalog::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let graph_id = store_graph(&catalog, blobs.as_ref(), &triangle()).await;
        let (dispatcher, _worker) = JobDispatcher::spawn(
            catalog.clone(),
            blobs.clone(),
            AnalysisSettings {
                max_run_secs: 0,
                max_queue_wait_secs: 60,
                watchdog_interval_secs: 1,
                ..AnalysisSettings::default()
            },
            "test",
        );

        // Inserted without a task, as if its execution had been lost.
        let abandoned = catalog
            .create_job(graph_id, crate::models::AnalysisKind::Mst, None)
            .await
            .expect("job");
        catalog.claim_job(abandoned.id).await.expect("claim");
        let waiting = catalog
            .create_job(graph_id, crate::models::AnalysisKind::HasCycle, None)
            .await
            .expect("job");

        assert!(dispatcher.expire_stale_jobs().await.expect("sweep").is_empty());
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(
            dispatcher.expire_stale_jobs().await.expect("sweep"),
            vec![abandoned.id]
        );
        let results = dispatcher.get_results(abandoned.id).await.expect("job");
        assert_eq!(results.status, JobStatus::Error);
        assert!(
            results
                .error
                .as_deref()
                .is_some_and(|message| message.starts_with("Analysis did not finish"))
        );
        let queued = dispatcher.get_results(waiting.id).await.expect("job");
        assert_eq!(queued.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn watchdog_expires_jobs_stuck_in_queue() {
        let catalog = Arc::new(MemoryCatalog::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let graph_id = store_graph(&catalog, blobs.as_ref(), &triangle()).await;
        let (dispatcher, _worker) = JobDispatcher::spawn(
            catalog.clone(),
            blobs.clone(),
            AnalysisSettings {
                max_run_secs: 60,
                max_queue_wait_secs: 0,
                watchdog_interval_secs: 1,
                ..AnalysisSettings::default()
            },
            "test",
        );

        let waiting = catalog
            .create_job(graph_id, crate::models::AnalysisKind::Mst, None)
            .await
            .expect("job");
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(
            dispatcher.expire_stale_jobs().await.expect("sweep"),
            vec![waiting.id]
        );
        let results = dispatcher.get_results(waiting.id).await.expect("job");
        assert_eq!(results.status, JobStatus::Error);
        assert!(
            results
                .error
                .as_deref()
                .is_some_and(|message| message.starts_with("Analysis never started"))
        );
    }
}
