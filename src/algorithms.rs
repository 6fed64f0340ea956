use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use anyhow::anyhow;

use crate::error::{LibError, Result};
use crate::models::{
    AnalysisKind, AnalysisResult, Edge, GraphPayload, PathEntry, Reachability, ShortestPaths,
    SpanningTree, VertexId,
};

#[derive(Debug, Clone, Copy)]
struct Neighbor {
    vertex: usize,
    weight: f64,
    edge: usize,
}

/// Index-based adjacency lists over a payload, in payload edge order.
struct Adjacency {
    vertices: Vec<VertexId>,
    index: HashMap<VertexId, usize>,
    neighbors: Vec<Vec<Neighbor>>,
}

impl Adjacency {
    /// `follow_direction` keeps directed edges one-way; otherwise every edge is traversable both ways.
    fn build(payload: &GraphPayload, follow_direction: bool) -> Self {
        let vertices = payload.vertices.clone();
        let index: HashMap<VertexId, usize> = vertices
            .iter()
            .enumerate()
            .map(|(position, vertex)| (*vertex, position))
            .collect();
        let mut neighbors = vec![Vec::new(); vertices.len()];
        let one_way = follow_direction && payload.directed;

        for (edge_index, edge) in payload.edges.iter().enumerate() {
            let (Some(&from), Some(&to)) = (index.get(&edge.from), index.get(&edge.to)) else {
                // Stored payloads are validated; dangling edges can only come from direct callers.
                continue;
            };
            neighbors[from].push(Neighbor {
                vertex: to,
                weight: edge.weight,
                edge: edge_index,
            });
            if !one_way && from != to {
                neighbors[to].push(Neighbor {
                    vertex: from,
                    weight: edge.weight,
                    edge: edge_index,
                });
            }
        }

        Self {
            vertices,
            index,
            neighbors,
        }
    }

    fn len(&self) -> usize {
        self.vertices.len()
    }

    fn root_index(&self, root: VertexId) -> Result<usize> {
        self.index.get(&root).copied().ok_or_else(|| {
            LibError::invalid_root(
                "Root vertex is not part of the graph",
                anyhow!("root vertex {} does not exist in the graph", root),
            )
        })
    }

    fn breadth_first(&self, start: usize) -> Vec<usize> {
        let mut visited = vec![false; self.len()];
        let mut order = Vec::new();
        let mut queue = VecDeque::new();
        visited[start] = true;
        queue.push_back(start);

        while let Some(vertex) = queue.pop_front() {
            order.push(vertex);
            for neighbor in &self.neighbors[vertex] {
                if !visited[neighbor.vertex] {
                    visited[neighbor.vertex] = true;
                    queue.push_back(neighbor.vertex);
                }
            }
        }

        order
    }
}

/// Min-heap entry ordered by `(key, seq)`; `seq` preserves insertion order among ties.
struct MinEntry<T> {
    key: f64,
    seq: usize,
    item: T,
}

impl<T> PartialEq for MinEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for MinEntry<T> {}

impl<T> PartialOrd for MinEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for MinEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .total_cmp(&self.key)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub fn analyze(
    payload: &GraphPayload,
    kind: AnalysisKind,
    root: Option<VertexId>,
) -> Result<AnalysisResult> {
    match kind {
        AnalysisKind::IsConnected => Ok(AnalysisResult::IsConnected(is_connected(payload))),
        AnalysisKind::HasCycle => Ok(AnalysisResult::HasCycle(has_cycle(payload))),
        AnalysisKind::ShortestPaths => {
            shortest_paths(payload, require_root(kind, root)?).map(AnalysisResult::ShortestPaths)
        }
        AnalysisKind::ReachableNodes => {
            reachable_nodes(payload, require_root(kind, root)?).map(AnalysisResult::ReachableNodes)
        }
        AnalysisKind::Mst => mst(payload).map(AnalysisResult::Mst),
    }
}

fn require_root(kind: AnalysisKind, root: Option<VertexId>) -> Result<VertexId> {
    root.ok_or_else(|| {
        LibError::invalid_root(
            "Analysis requires a root vertex",
            anyhow!("analysis type {} requires a root vertex identifier", kind),
        )
    })
}

/// Directed payloads are checked for weak connectivity.
pub fn is_connected(payload: &GraphPayload) -> bool {
    let adjacency = Adjacency::build(payload, false);
    if adjacency.len() == 0 {
        return true;
    }
    adjacency.breadth_first(0).len() == adjacency.len()
}

pub fn has_cycle(payload: &GraphPayload) -> bool {
    let adjacency = Adjacency::build(payload, true);
    if payload.directed {
        directed_has_cycle(&adjacency)
    } else {
        undirected_has_cycle(&adjacency)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    OnStack,
    Done,
}

fn directed_has_cycle(adjacency: &Adjacency) -> bool {
    let mut state = vec![Visit::Unvisited; adjacency.len()];

    for start in 0..adjacency.len() {
        if state[start] != Visit::Unvisited {
            continue;
        }
        state[start] = Visit::OnStack;
        let mut stack = vec![(start, 0usize)];

        while let Some(frame) = stack.last_mut() {
            let vertex = frame.0;
            let next = adjacency.neighbors[vertex].get(frame.1).copied();
            frame.1 += 1;

            match next {
                Some(neighbor) => match state[neighbor.vertex] {
                    Visit::OnStack => return true,
                    Visit::Unvisited => {
                        state[neighbor.vertex] = Visit::OnStack;
                        stack.push((neighbor.vertex, 0));
                    }
                    Visit::Done => {}
                },
                None => {
                    state[vertex] = Visit::Done;
                    stack.pop();
                }
            }
        }
    }

    false
}

fn undirected_has_cycle(adjacency: &Adjacency) -> bool {
    let mut visited = vec![false; adjacency.len()];

    for start in 0..adjacency.len() {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        // (vertex, edge used to enter it, next neighbor position)
        let mut stack: Vec<(usize, Option<usize>, usize)> = vec![(start, None, 0)];

        while let Some(frame) = stack.last_mut() {
            let (vertex, parent_edge) = (frame.0, frame.1);
            let next = adjacency.neighbors[vertex].get(frame.2).copied();
            frame.2 += 1;

            let Some(neighbor) = next else {
                stack.pop();
                continue;
            };
            if Some(neighbor.edge) == parent_edge {
                continue;
            }
            if visited[neighbor.vertex] {
                return true;
            }
            visited[neighbor.vertex] = true;
            stack.push((neighbor.vertex, Some(neighbor.edge), 0));
        }
    }

    false
}

fn total_overflow(what: &str, total: f64) -> LibError {
    LibError::unsupported(
        "Edge weights are too large to sum",
        anyhow!("{} weight total is {}", what, total),
    )
}

/// Dijkstra from `root`. Distances are exact; among equal-cost paths the
/// predecessor found first in edge order wins.
pub fn shortest_paths(payload: &GraphPayload, root: VertexId) -> Result<ShortestPaths> {
    let adjacency = Adjacency::build(payload, true);
    let start = adjacency.root_index(root)?;
    if let Some(edge) = payload.edges.iter().find(|edge| edge.weight < 0.0) {
        return Err(LibError::unsupported(
            "Shortest paths require non-negative edge weights",
            anyhow!(
                "edge ({}, {}) has negative weight {}",
                edge.from,
                edge.to,
                edge.weight
            ),
        ));
    }

    let mut distance: Vec<Option<f64>> = vec![None; adjacency.len()];
    let mut predecessor: Vec<Option<usize>> = vec![None; adjacency.len()];
    let mut settled = vec![false; adjacency.len()];
    let mut heap = BinaryHeap::new();
    let mut seq = 0usize;

    distance[start] = Some(0.0);
    heap.push(MinEntry {
        key: 0.0,
        seq,
        item: start,
    });

    while let Some(MinEntry {
        key: cost,
        item: vertex,
        ..
    }) = heap.pop()
    {
        if settled[vertex] {
            continue;
        }
        settled[vertex] = true;

        for neighbor in &adjacency.neighbors[vertex] {
            let candidate = cost + neighbor.weight;
            if !candidate.is_finite() {
                return Err(total_overflow("path", candidate));
            }
            let improves = match distance[neighbor.vertex] {
                Some(current) => candidate < current,
                None => true,
            };
            if improves && !settled[neighbor.vertex] {
                distance[neighbor.vertex] = Some(candidate);
                predecessor[neighbor.vertex] = Some(vertex);
                seq += 1;
                heap.push(MinEntry {
                    key: candidate,
                    seq,
                    item: neighbor.vertex,
                });
            }
        }
    }

    let paths = (0..adjacency.len())
        .map(|position| {
            let path = match distance[position] {
                Some(_) => trace_path(position, &predecessor)
                    .into_iter()
                    .map(|step| adjacency.vertices[step])
                    .collect(),
                None => Vec::new(),
            };
            (
                adjacency.vertices[position],
                PathEntry {
                    distance: distance[position],
                    predecessor: predecessor[position].map(|step| adjacency.vertices[step]),
                    path,
                },
            )
        })
        .collect();

    Ok(ShortestPaths { root, paths })
}

fn trace_path(target: usize, predecessor: &[Option<usize>]) -> Vec<usize> {
    let mut path = vec![target];
    let mut current = target;
    while let Some(previous) = predecessor[current] {
        path.push(previous);
        current = previous;
    }
    path.reverse();
    path
}

pub fn reachable_nodes(payload: &GraphPayload, root: VertexId) -> Result<Reachability> {
    let adjacency = Adjacency::build(payload, true);
    let start = adjacency.root_index(root)?;
    let mut reachable: Vec<VertexId> = adjacency
        .breadth_first(start)
        .into_iter()
        .map(|position| adjacency.vertices[position])
        .collect();
    reachable.sort_unstable();
    Ok(Reachability { root, reachable })
}

/// Prim's algorithm from the first listed vertex. Edge direction is ignored.
pub fn mst(payload: &GraphPayload) -> Result<SpanningTree> {
    let adjacency = Adjacency::build(payload, false);
    if adjacency.len() == 0 {
        return Ok(SpanningTree {
            edges: Vec::new(),
            total_weight: 0.0,
        });
    }

    let mut in_tree = vec![false; adjacency.len()];
    let mut tree_size = 1usize;
    let mut edges = Vec::with_capacity(adjacency.len() - 1);
    let mut total_weight = 0.0;
    let mut heap = BinaryHeap::new();
    let mut seq = 0usize;

    in_tree[0] = true;
    for neighbor in &adjacency.neighbors[0] {
        seq += 1;
        heap.push(MinEntry {
            key: neighbor.weight,
            seq,
            item: (0usize, neighbor.vertex),
        });
    }

    while let Some(MinEntry {
        key: weight,
        item: (from, to),
        ..
    }) = heap.pop()
    {
        if in_tree[to] {
            continue;
        }
        in_tree[to] = true;
        tree_size += 1;
        total_weight += weight;
        edges.push(Edge::new(
            adjacency.vertices[from],
            adjacency.vertices[to],
            weight,
        ));

        for neighbor in &adjacency.neighbors[to] {
            if !in_tree[neighbor.vertex] {
                seq += 1;
                heap.push(MinEntry {
                    key: neighbor.weight,
                    seq,
                    item: (to, neighbor.vertex),
                });
            }
        }
    }

    if tree_size != adjacency.len() {
        return Err(LibError::unsupported(
            "Graph is disconnected, no spanning tree exists",
            anyhow!(
                "spanning tree reached {} of {} vertices",
                tree_size,
                adjacency.len()
            ),
        ));
    }
    if !total_weight.is_finite() {
        return Err(total_overflow("spanning tree", total_weight));
    }

    Ok(SpanningTree {
        edges,
        total_weight,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};

    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;

    use super::*;
    use crate::error::ErrorKind;

    fn path_graph() -> GraphPayload {
        GraphPayload::undirected(
            vec![0, 1, 2, 3],
            vec![Edge::unweighted(0, 1), Edge::unweighted(1, 2), Edge::unweighted(2, 3)],
        )
    }

    fn weighted_graph() -> GraphPayload {
        GraphPayload::undirected(
            vec![0, 1, 2, 3, 4],
            vec![
                Edge::new(0, 1, 4.0),
                Edge::new(0, 2, 1.0),
                Edge::new(2, 1, 2.0),
                Edge::new(1, 3, 5.0),
                Edge::new(2, 3, 8.0),
                Edge::new(3, 4, 3.0),
                Edge::new(2, 4, 9.0),
            ],
        )
    }

    fn bfs_distances(payload: &GraphPayload, root: VertexId) -> HashMap<VertexId, usize> {
        let mut distances = HashMap::from([(root, 0usize)]);
        let mut queue = VecDeque::from([root]);
        while let Some(vertex) = queue.pop_front() {
            let depth = distances[&vertex];
            for edge in &payload.edges {
                let next = if edge.from == vertex {
                    Some(edge.to)
                } else if edge.to == vertex && !payload.directed {
                    Some(edge.from)
                } else {
                    None
                };
                if let Some(next) = next {
                    if !distances.contains_key(&next) {
                        distances.insert(next, depth + 1);
                        queue.push_back(next);
                    }
                }
            }
        }
        distances
    }

    #[test]
    fn path_is_connected_and_acyclic() {
        let graph = path_graph();
        assert!(is_connected(&graph));
        assert!(!has_cycle(&graph));
    }

    #[test]
    fn isolated_vertex_disconnects_graph() {
        let mut graph = path_graph();
        graph.vertices.push(9);
        assert!(!is_connected(&graph));
    }

    #[test]
    fn directed_connectivity_is_weak() {
        let graph = GraphPayload::directed(
            vec![0, 1, 2],
            vec![Edge::unweighted(0, 1), Edge::unweighted(2, 1)],
        );
        assert!(is_connected(&graph));
    }

    #[test]
    fn undirected_triangle_has_cycle() {
        let mut graph = path_graph();
        graph.edges.push(Edge::unweighted(3, 1));
        assert!(has_cycle(&graph));
    }

    #[test]
    fn parallel_undirected_edges_form_cycle() {
        let graph = GraphPayload::undirected(
            vec![0, 1],
            vec![Edge::unweighted(0, 1), Edge::unweighted(1, 0)],
        );
        assert!(has_cycle(&graph));
    }

    #[test]
    fn self_loop_is_cycle() {
        let undirected = GraphPayload::undirected(vec![0], vec![Edge::unweighted(0, 0)]);
        let directed = GraphPayload::directed(vec![0], vec![Edge::unweighted(0, 0)]);
        assert!(has_cycle(&undirected));
        assert!(has_cycle(&directed));
    }

    #[test]
    fn directed_diamond_is_acyclic_until_back_edge() {
        let mut graph = GraphPayload::directed(
            vec![0, 1, 2, 3],
            vec![
                Edge::unweighted(0, 1),
                Edge::unweighted(0, 2),
                Edge::unweighted(1, 3),
                Edge::unweighted(2, 3),
            ],
        );
        assert!(!has_cycle(&graph));
        graph.edges.push(Edge::unweighted(3, 0));
        assert!(has_cycle(&graph));
    }

    #[test]
    fn dijkstra_prefers_cheaper_detour() {
        let result = shortest_paths(&weighted_graph(), 0).expect("paths should compute");
        assert_eq!(result.paths[&1].distance, Some(3.0));
        assert_eq!(result.paths[&1].predecessor, Some(2));
        assert_eq!(result.paths[&1].path, vec![0, 2, 1]);
        assert_eq!(result.paths[&3].distance, Some(8.0));
        assert_eq!(result.paths[&4].distance, Some(10.0));
        assert_eq!(result.paths[&0].distance, Some(0.0));
        assert_eq!(result.paths[&0].predecessor, None);
    }

    #[test]
    fn unit_weights_match_breadth_first_distances() {
        let mut rng = StdRng::seed_from_u64(11);
        let settings = crate::config::GenerationSettings::default();
        for kind in [
            crate::models::GenerationKind::Connected,
            crate::models::GenerationKind::Acyclic,
            crate::models::GenerationKind::Any,
        ] {
            let mut graph = crate::generator::generate(kind, Some(12), None, &settings, &mut rng)
                .expect("generation should succeed");
            for edge in &mut graph.edges {
                edge.weight = 1.0;
            }
            let expected = bfs_distances(&graph, 0);
            let result = shortest_paths(&graph, 0).expect("paths should compute");
            for (vertex, entry) in &result.paths {
                match expected.get(vertex) {
                    Some(depth) => assert_eq!(entry.distance, Some(*depth as f64)),
                    None => assert_eq!(entry.distance, None),
                }
            }
        }
    }

    #[test]
    fn unreachable_vertices_have_no_distance() {
        let graph = GraphPayload::directed(vec![0, 1, 2], vec![Edge::unweighted(1, 0)]);
        let result = shortest_paths(&graph, 0).expect("paths should compute");
        assert_eq!(result.paths[&1].distance, None);
        assert_eq!(result.paths[&1].predecessor, None);
        assert!(result.paths[&2].path.is_empty());
    }

    #[test]
    fn shortest_paths_reject_missing_root() {
        let err = shortest_paths(&path_graph(), 42).expect_err("root should be validated");
        assert_eq!(err.kind, ErrorKind::InvalidRoot);
    }

    #[test]
    fn shortest_paths_reject_negative_weights() {
        let graph = GraphPayload::undirected(vec![0, 1], vec![Edge::new(0, 1, -2.0)]);
        let err = shortest_paths(&graph, 0).expect_err("negative weight should fail");
        assert_eq!(err.kind, ErrorKind::UnsupportedInput);
    }

    #[test]
    fn overflowing_totals_are_unsupported() {
        let graph = GraphPayload::undirected(
            vec![0, 1, 2],
            vec![Edge::new(0, 1, 1e308), Edge::new(1, 2, 1e308)],
        );
        let err = shortest_paths(&graph, 0).expect_err("path total overflows");
        assert_eq!(err.kind, ErrorKind::UnsupportedInput);
        let err = mst(&graph).expect_err("tree total overflows");
        assert_eq!(err.kind, ErrorKind::UnsupportedInput);
    }

    #[test]
    fn reachable_nodes_follow_direction() {
        let graph = GraphPayload::directed(
            vec![0, 1, 2, 3],
            vec![Edge::unweighted(0, 1), Edge::unweighted(1, 2), Edge::unweighted(3, 0)],
        );
        let result = reachable_nodes(&graph, 1).expect("reachability should compute");
        assert_eq!(result.reachable, vec![1, 2]);
        let err = reachable_nodes(&graph, 7).expect_err("root should be validated");
        assert_eq!(err.kind, ErrorKind::InvalidRoot);
    }

    #[test]
    fn mst_picks_minimum_weight_edges() {
        let tree = mst(&weighted_graph()).expect("graph is connected");
        assert_eq!(tree.edges.len(), 4);
        assert_eq!(tree.total_weight, 11.0);
    }

    #[test]
    fn mst_total_is_invariant_under_edge_order() {
        let mut rng = StdRng::seed_from_u64(5);
        let baseline = mst(&weighted_graph()).expect("connected").total_weight;
        for _ in 0..20 {
            let mut graph = weighted_graph();
            graph.edges.shuffle(&mut rng);
            assert_eq!(mst(&graph).expect("connected").total_weight, baseline);
        }
    }

    #[test]
    fn mst_rejects_disconnected_graph() {
        let mut graph = path_graph();
        graph.vertices.push(10);
        let err = mst(&graph).expect_err("disconnected graph has no spanning tree");
        assert_eq!(err.kind, ErrorKind::UnsupportedInput);
    }

    #[test]
    fn single_vertex_graph_is_trivially_spanned() {
        let graph = GraphPayload::undirected(vec![3], Vec::new());
        let tree = mst(&graph).expect("single vertex is connected");
        assert!(tree.edges.is_empty());
        assert_eq!(tree.total_weight, 0.0);
        assert!(is_connected(&graph));
    }

    #[test]
    fn analyze_requires_root_for_root_dependent_kinds() {
        let err = analyze(&path_graph(), AnalysisKind::ReachableNodes, None)
            .expect_err("missing root should fail");
        assert_eq!(err.kind, ErrorKind::InvalidRoot);
        let result = analyze(&path_graph(), AnalysisKind::HasCycle, None).expect("no root needed");
        assert_eq!(result, AnalysisResult::HasCycle(false));
    }
}
