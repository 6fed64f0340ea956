use std::collections::HashSet;

use anyhow::anyhow;

use crate::error::{LibError, Result};
use crate::models::{AnalysisResult, GraphPayload};

/// Largest accepted edge weight magnitude; keeps path and tree totals finite.
pub const MAX_WEIGHT_MAGNITUDE: f64 = 1e15;

pub fn decode_payload(bytes: &[u8]) -> Result<GraphPayload> {
    let payload: GraphPayload = serde_json::from_slice(bytes).map_err(|err| {
        LibError::invalid_with_code(
            "malformed_graph_payload",
            "Graph payload is not valid graph JSON",
            anyhow!(err),
        )
    })?;
    validate_payload(&payload)?;
    Ok(payload)
}

pub fn encode_payload(payload: &GraphPayload) -> Result<Vec<u8>> {
    serde_json::to_vec(payload)
        .map_err(|err| LibError::unknown("Failed to encode graph payload", anyhow!(err)))
}

pub fn validate_payload(payload: &GraphPayload) -> Result<()> {
    if payload.vertices.is_empty() {
        return Err(LibError::invalid_with_code(
            "graph_without_vertices",
            "At least one vertex is required",
            anyhow!("graph has no vertices"),
        ));
    }

    let mut vertices = HashSet::with_capacity(payload.vertices.len());
    for vertex in &payload.vertices {
        if !vertices.insert(*vertex) {
            return Err(LibError::invalid_with_code(
                "graph_duplicate_vertex",
                "Vertex ids must be unique within a graph",
                anyhow!("duplicate vertex id {}", vertex),
            ));
        }
    }

    for edge in &payload.edges {
        for endpoint in [edge.from, edge.to] {
            if !vertices.contains(&endpoint) {
                return Err(LibError::invalid_with_code(
                    "graph_unknown_vertex_reference",
                    "Edge references a vertex that does not exist",
                    anyhow!(
                        "edge ({}, {}) references missing vertex {}",
                        edge.from,
                        edge.to,
                        endpoint
                    ),
                ));
            }
        }
        if !edge.weight.is_finite() || edge.weight.abs() > MAX_WEIGHT_MAGNITUDE {
            return Err(LibError::invalid_with_code(
                "graph_invalid_weight",
                "Edge weights must be finite numbers no larger than 1e15 in magnitude",
                anyhow!("edge ({}, {}) has weight {}", edge.from, edge.to, edge.weight),
            ));
        }
    }

    Ok(())
}

pub fn decode_result(bytes: &[u8]) -> Result<AnalysisResult> {
    serde_json::from_slice(bytes).map_err(|err| {
        LibError::storage("Stored analysis result is unreadable", anyhow!(err))
    })
}

pub fn encode_result(result: &AnalysisResult) -> Result<Vec<u8>> {
    serde_json::to_vec(result)
        .map_err(|err| LibError::unknown("Failed to encode analysis result", anyhow!(err)))
}
