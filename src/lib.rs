pub mod algorithms;
#[cfg(feature = "api")]
pub mod api;
pub mod catalog;
pub mod codec;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod generator;
pub mod models;
pub mod operations;
pub mod render;
pub mod store;

pub mod prelude {
    pub use crate::algorithms::{
        analyze, has_cycle, is_connected, mst, reachable_nodes, shortest_paths,
    };
    #[cfg(feature = "api")]
    pub use crate::api::{GraphApp, HasGraphService};
    pub use crate::catalog::{Catalog, MemoryCatalog};
    pub use crate::config::AppConfig;
    #[cfg(feature = "sqlx")]
    pub use crate::db::{PgCatalog, create_graphapp_tables};
    pub use crate::dispatcher::JobDispatcher;
    pub use crate::error::{ErrorKind, LibError, Result};
    pub use crate::models::{
        AnalysisKind, AnalysisResult, Edge, GenerationKind, GraphId, GraphPayload, GraphRecord,
        JobId, JobRecord, JobResults, JobStatus, VertexId,
    };
    pub use crate::operations::{GraphOperation, GraphOperationResult, GraphService};
    pub use crate::store::{BlobStore, FsBlobStore, MemoryBlobStore};
}
