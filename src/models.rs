use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LibError;

pub type VertexId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphId(pub i64);

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GraphId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Error,
}

impl JobStatus {
    pub const fn as_db_value(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    /// Position in the lifecycle; terminal states share the last rank.
    pub const fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Completed | JobStatus::Error => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    IsConnected,
    HasCycle,
    ShortestPaths,
    ReachableNodes,
    Mst,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 5] = [
        AnalysisKind::IsConnected,
        AnalysisKind::HasCycle,
        AnalysisKind::ShortestPaths,
        AnalysisKind::ReachableNodes,
        AnalysisKind::Mst,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            AnalysisKind::IsConnected => "is_connected",
            AnalysisKind::HasCycle => "has_cycle",
            AnalysisKind::ShortestPaths => "shortest_paths",
            AnalysisKind::ReachableNodes => "reachable_nodes",
            AnalysisKind::Mst => "mst",
        }
    }

    pub const fn uses_root(self) -> bool {
        matches!(
            self,
            AnalysisKind::ShortestPaths | AnalysisKind::ReachableNodes
        )
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = LibError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AnalysisKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                LibError::invalid_with_code(
                    "unknown_analysis_type",
                    "Analysis type is not recognized",
                    anyhow!("analysis type {} is invalid", s),
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    Any,
    Connected,
    Complete,
    Acyclic,
    Tree,
    Bipartite,
}

impl GenerationKind {
    pub const ALL: [GenerationKind; 6] = [
        GenerationKind::Any,
        GenerationKind::Connected,
        GenerationKind::Complete,
        GenerationKind::Acyclic,
        GenerationKind::Tree,
        GenerationKind::Bipartite,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            GenerationKind::Any => "any",
            GenerationKind::Connected => "connected",
            GenerationKind::Complete => "complete",
            GenerationKind::Acyclic => "acyclic",
            GenerationKind::Tree => "tree",
            GenerationKind::Bipartite => "bipartite",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationKind {
    type Err = LibError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        GenerationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                LibError::invalid_with_code(
                    "unknown_graph_type",
                    "Graph type is not recognized",
                    anyhow!("graph type {} is invalid", s),
                )
            })
    }
}

/// One edge of a payload. Serialized as `[from, to, weight]`; a two-element
/// array deserializes with the default weight of 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireEdge", into = "WireEdge")]
pub struct Edge {
    pub from: VertexId,
    pub to: VertexId,
    pub weight: f64,
}

impl Edge {
    pub const DEFAULT_WEIGHT: f64 = 1.0;

    pub fn new(from: VertexId, to: VertexId, weight: f64) -> Self {
        Self { from, to, weight }
    }

    pub fn unweighted(from: VertexId, to: VertexId) -> Self {
        Self::new(from, to, Self::DEFAULT_WEIGHT)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum WireEdge {
    Weighted(VertexId, VertexId, f64),
    Unweighted(VertexId, VertexId),
}

impl From<WireEdge> for Edge {
    fn from(value: WireEdge) -> Self {
        match value {
            WireEdge::Weighted(from, to, weight) => Edge::new(from, to, weight),
            WireEdge::Unweighted(from, to) => Edge::unweighted(from, to),
        }
    }
}

impl From<Edge> for WireEdge {
    fn from(value: Edge) -> Self {
        WireEdge::Weighted(value.from, value.to, value.weight)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphPayload {
    #[serde(default)]
    pub directed: bool,
    pub vertices: Vec<VertexId>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl GraphPayload {
    pub fn undirected(vertices: Vec<VertexId>, edges: Vec<Edge>) -> Self {
        Self {
            directed: false,
            vertices,
            edges,
        }
    }

    pub fn directed(vertices: Vec<VertexId>, edges: Vec<Edge>) -> Self {
        Self {
            directed: true,
            vertices,
            edges,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphRecord {
    pub id: GraphId,
    pub data_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub graph_id: GraphId,
    pub analysis: AnalysisKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<VertexId>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AnalysisResult {
    IsConnected(bool),
    HasCycle(bool),
    ShortestPaths(ShortestPaths),
    ReachableNodes(Reachability),
    Mst(SpanningTree),
}

impl AnalysisResult {
    pub const fn kind(&self) -> AnalysisKind {
        match self {
            AnalysisResult::IsConnected(_) => AnalysisKind::IsConnected,
            AnalysisResult::HasCycle(_) => AnalysisKind::HasCycle,
            AnalysisResult::ShortestPaths(_) => AnalysisKind::ShortestPaths,
            AnalysisResult::ReachableNodes(_) => AnalysisKind::ReachableNodes,
            AnalysisResult::Mst(_) => AnalysisKind::Mst,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortestPaths {
    pub root: VertexId,
    pub paths: BTreeMap<VertexId, PathEntry>,
}

/// `distance` is `None` for vertices the root cannot reach (infinite distance).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEntry {
    pub distance: Option<f64>,
    pub predecessor: Option<VertexId>,
    pub path: Vec<VertexId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reachability {
    pub root: VertexId,
    pub reachable: Vec<VertexId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanningTree {
    pub edges: Vec<Edge>,
    pub total_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResults {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredGraph {
    pub graph: GraphRecord,
    pub payload: GraphPayload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedJob {
    pub job_id: JobId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearedJobs {
    pub deleted: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomGraphQuery {
    pub vertices: Option<i64>,
    pub edges: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisQuery {
    pub root: Option<String>,
}
