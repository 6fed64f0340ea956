use std::collections::HashSet;

use anyhow::anyhow;
use rand::Rng;
use rand::seq::SliceRandom;
use rand::seq::index;

use crate::config::GenerationSettings;
use crate::error::{LibError, Result};
use crate::models::{Edge, GenerationKind, GraphPayload, VertexId};

/// Inclusive bounds on the edge count a generation kind permits for `n` vertices.
pub fn edge_bounds(kind: GenerationKind, n: usize) -> (usize, usize) {
    let all_pairs = n * n.saturating_sub(1) / 2;
    match kind {
        GenerationKind::Any | GenerationKind::Acyclic => (0, all_pairs),
        GenerationKind::Connected => (n.saturating_sub(1), all_pairs),
        GenerationKind::Complete => (all_pairs, all_pairs),
        GenerationKind::Tree => (n.saturating_sub(1), n.saturating_sub(1)),
        GenerationKind::Bipartite => (0, (n / 2) * n.div_ceil(2)),
    }
}

pub fn default_edge_count(kind: GenerationKind, n: usize) -> usize {
    let (min, max) = edge_bounds(kind, n);
    (max / 2).max(min)
}

pub fn generate<R>(
    kind: GenerationKind,
    vertices: Option<i64>,
    edges: Option<i64>,
    settings: &GenerationSettings,
    rng: &mut R,
) -> Result<GraphPayload>
where
    R: Rng + ?Sized,
{
    let (n, edge_count) = resolve_counts(kind, vertices, edges, settings)?;
    let vertex_ids: Vec<VertexId> = (0..n as VertexId).collect();

    let payload = match kind {
        GenerationKind::Any => {
            let pairs = all_pairs(&vertex_ids);
            GraphPayload::undirected(vertex_ids, sample_edges(&pairs, edge_count, settings, rng))
        }
        GenerationKind::Complete => {
            let edges = all_pairs(&vertex_ids)
                .into_iter()
                .map(|(from, to)| weighted(from, to, settings, rng))
                .collect();
            GraphPayload::undirected(vertex_ids, edges)
        }
        GenerationKind::Connected => {
            let edges = connected_edges(&vertex_ids, edge_count, settings, rng);
            GraphPayload::undirected(vertex_ids, edges)
        }
        GenerationKind::Acyclic => {
            let mut order = vertex_ids.clone();
            order.shuffle(rng);
            // every pair points from the earlier to the later vertex in `order`
            let pairs = all_pairs(&order);
            GraphPayload::directed(vertex_ids, sample_edges(&pairs, edge_count, settings, rng))
        }
        GenerationKind::Tree => {
            let edges = (1..n)
                .map(|child| {
                    let parent = rng.gen_range(0..child);
                    weighted(vertex_ids[parent], vertex_ids[child], settings, rng)
                })
                .collect();
            GraphPayload::undirected(vertex_ids, edges)
        }
        GenerationKind::Bipartite => {
            let edges = bipartite_edges(&vertex_ids, edge_count, settings, rng);
            GraphPayload::undirected(vertex_ids, edges)
        }
    };

    Ok(payload)
}

fn resolve_counts(
    kind: GenerationKind,
    vertices: Option<i64>,
    edges: Option<i64>,
    settings: &GenerationSettings,
) -> Result<(usize, usize)> {
    if edges.is_some() && vertices.is_none() {
        return Err(LibError::invalid(
            "Cannot specify number of edges but not number of vertices",
            anyhow!("edges={:?} without vertices", edges),
        ));
    }

    let n = vertices.unwrap_or(settings.default_vertices as i64);
    if n < 1 {
        return Err(LibError::invalid_constraint(
            "Vertex count must be positive",
            anyhow!("vertex count {} is not positive", n),
        ));
    }
    let n = n as usize;
    if n > settings.max_vertices {
        return Err(LibError::invalid_constraint(
            "Vertex count exceeds the configured maximum",
            anyhow!("vertex count {} exceeds {}", n, settings.max_vertices),
        ));
    }
    if kind == GenerationKind::Bipartite && n < 2 {
        return Err(LibError::invalid_constraint(
            "Bipartite graphs need at least two vertices",
            anyhow!("bipartite graph requested with {} vertex", n),
        ));
    }

    let (min, max) = edge_bounds(kind, n);
    if kind == GenerationKind::Complete {
        return Ok((n, max));
    }

    let requested = match edges {
        Some(count) if count < 0 => {
            return Err(LibError::invalid_constraint(
                "Edge count must not be negative",
                anyhow!("edge count {} is negative", count),
            ));
        }
        Some(count) => usize::try_from(count).unwrap_or(usize::MAX),
        None => default_edge_count(kind, n),
    };
    if requested < min || requested > max {
        return Err(LibError::invalid_constraint(
            "Number of vertices and edges is illegal for this graph type",
            anyhow!(
                "{} graph on {} vertices needs between {} and {} edges, got {}",
                kind,
                n,
                min,
                max,
                requested
            ),
        ));
    }

    Ok((n, requested))
}

fn weighted<R>(from: VertexId, to: VertexId, settings: &GenerationSettings, rng: &mut R) -> Edge
where
    R: Rng + ?Sized,
{
    Edge::new(from, to, f64::from(rng.gen_range(1..=settings.max_weight)))
}

/// Unordered pairs `(order[i], order[j])` with `i < j`.
fn all_pairs(order: &[VertexId]) -> Vec<(VertexId, VertexId)> {
    let mut pairs = Vec::with_capacity(order.len() * order.len().saturating_sub(1) / 2);
    for (position, from) in order.iter().enumerate() {
        for to in &order[position + 1..] {
            pairs.push((*from, *to));
        }
    }
    pairs
}

fn sample_edges<R>(
    pairs: &[(VertexId, VertexId)],
    count: usize,
    settings: &GenerationSettings,
    rng: &mut R,
) -> Vec<Edge>
where
    R: Rng + ?Sized,
{
    let mut chosen = index::sample(rng, pairs.len(), count).into_vec();
    chosen.sort_unstable();
    chosen
        .into_iter()
        .map(|position| {
            let (from, to) = pairs[position];
            weighted(from, to, settings, rng)
        })
        .collect()
}

fn connected_edges<R>(
    vertex_ids: &[VertexId],
    count: usize,
    settings: &GenerationSettings,
    rng: &mut R,
) -> Vec<Edge>
where
    R: Rng + ?Sized,
{
    let mut chain = vertex_ids.to_vec();
    chain.shuffle(rng);

    let mut used = HashSet::with_capacity(count);
    let mut edges = Vec::with_capacity(count);
    for position in 1..chain.len() {
        let anchor = chain[rng.gen_range(0..position)];
        let vertex = chain[position];
        used.insert((anchor.min(vertex), anchor.max(vertex)));
        edges.push(weighted(anchor, vertex, settings, rng));
    }

    let remaining: Vec<(VertexId, VertexId)> = all_pairs(vertex_ids)
        .into_iter()
        .filter(|pair| !used.contains(pair))
        .collect();
    let extra = count - edges.len();
    edges.extend(sample_edges(&remaining, extra, settings, rng));
    edges
}

fn bipartite_edges<R>(
    vertex_ids: &[VertexId],
    count: usize,
    settings: &GenerationSettings,
    rng: &mut R,
) -> Vec<Edge>
where
    R: Rng + ?Sized,
{
    let n = vertex_ids.len();
    let sizes: Vec<usize> = (1..n).filter(|left| left * (n - left) >= count).collect();
    let left_size = sizes
        .choose(rng)
        .copied()
        .unwrap_or(n / 2);

    let mut shuffled = vertex_ids.to_vec();
    shuffled.shuffle(rng);
    let (left, right) = shuffled.split_at(left_size);

    let mut pairs = Vec::with_capacity(left.len() * right.len());
    for from in left {
        for to in right {
            pairs.push(((*from).min(*to), (*from).max(*to)));
        }
    }
    pairs.sort_unstable();
    sample_edges(&pairs, count, settings, rng)
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet, VecDeque};

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::{default_edge_count, edge_bounds, generate};
    use crate::algorithms::{has_cycle, is_connected};
    use crate::config::GenerationSettings;
    use crate::error::ErrorKind;
    use crate::models::{GenerationKind, GraphPayload, VertexId};

    fn settings() -> GenerationSettings {
        GenerationSettings::default()
    }

    fn two_coloring(payload: &GraphPayload) -> Option<HashMap<VertexId, bool>> {
        let mut colors: HashMap<VertexId, bool> = HashMap::new();
        for start in &payload.vertices {
            if colors.contains_key(start) {
                continue;
            }
            colors.insert(*start, false);
            let mut queue = VecDeque::from([*start]);
            while let Some(vertex) = queue.pop_front() {
                let color = colors[&vertex];
                for edge in &payload.edges {
                    let other = if edge.from == vertex {
                        edge.to
                    } else if edge.to == vertex {
                        edge.from
                    } else {
                        continue;
                    };
                    match colors.get(&other) {
                        Some(existing) if *existing == color => return None,
                        Some(_) => {}
                        None => {
                            colors.insert(other, !color);
                            queue.push_back(other);
                        }
                    }
                }
            }
        }
        Some(colors)
    }

    fn assert_simple(payload: &GraphPayload) {
        let mut seen = HashSet::new();
        for edge in &payload.edges {
            assert_ne!(edge.from, edge.to, "self-loop generated");
            let key = (edge.from.min(edge.to), edge.from.max(edge.to));
            assert!(seen.insert(key), "duplicate edge {:?}", key);
            assert!(edge.weight >= 1.0 && edge.weight <= 100.0);
        }
    }

    #[test]
    fn trees_have_n_minus_one_edges_and_are_connected_and_acyclic() {
        let mut rng = StdRng::seed_from_u64(1);
        for n in 1..=30 {
            let tree = generate(GenerationKind::Tree, Some(n), None, &settings(), &mut rng)
                .expect("tree should generate");
            assert_eq!(tree.edges.len(), (n - 1) as usize);
            assert!(is_connected(&tree));
            assert!(!has_cycle(&tree));
        }
    }

    #[test]
    fn complete_graphs_have_every_pair() {
        let mut rng = StdRng::seed_from_u64(2);
        for n in 1..=15i64 {
            let graph = generate(GenerationKind::Complete, Some(n), Some(0), &settings(), &mut rng)
                .expect("complete graph should generate");
            assert_eq!(graph.edges.len(), (n * (n - 1) / 2) as usize);
            assert_simple(&graph);
        }
    }

    #[test]
    fn bipartite_graphs_never_join_same_side() {
        let mut rng = StdRng::seed_from_u64(3);
        for n in 2..=16i64 {
            let (_, max) = edge_bounds(GenerationKind::Bipartite, n as usize);
            for edges in [0, max / 3, max] {
                let graph = generate(
                    GenerationKind::Bipartite,
                    Some(n),
                    Some(edges as i64),
                    &settings(),
                    &mut rng,
                )
                .expect("bipartite graph should generate");
                assert_eq!(graph.edges.len(), edges);
                assert!(two_coloring(&graph).is_some(), "odd cycle in bipartite graph");
                assert_simple(&graph);
            }
        }
    }

    #[test]
    fn connected_graphs_are_connected_with_requested_edges() {
        let mut rng = StdRng::seed_from_u64(4);
        for n in 1..=20i64 {
            let (min, max) = edge_bounds(GenerationKind::Connected, n as usize);
            for edges in [min, (min + max) / 2, max] {
                let graph = generate(
                    GenerationKind::Connected,
                    Some(n),
                    Some(edges as i64),
                    &settings(),
                    &mut rng,
                )
                .expect("connected graph should generate");
                assert_eq!(graph.edges.len(), edges);
                assert!(is_connected(&graph));
                assert_simple(&graph);
            }
        }
    }

    #[test]
    fn acyclic_graphs_are_directed_and_cycle_free() {
        let mut rng = StdRng::seed_from_u64(5);
        for n in 1..=20i64 {
            let (_, max) = edge_bounds(GenerationKind::Acyclic, n as usize);
            let graph = generate(
                GenerationKind::Acyclic,
                Some(n),
                Some(max as i64),
                &settings(),
                &mut rng,
            )
            .expect("acyclic graph should generate");
            assert!(graph.directed);
            assert!(!has_cycle(&graph));
        }
    }

    #[test]
    fn any_graphs_are_simple() {
        let mut rng = StdRng::seed_from_u64(6);
        let graph = generate(GenerationKind::Any, Some(12), Some(30), &settings(), &mut rng)
            .expect("graph should generate");
        assert_eq!(graph.vertices, (0..12).collect::<Vec<VertexId>>());
        assert_eq!(graph.edges.len(), 30);
        assert_simple(&graph);
    }

    #[test]
    fn defaults_come_from_settings() {
        let mut rng = StdRng::seed_from_u64(7);
        let graph = generate(GenerationKind::Connected, None, None, &settings(), &mut rng)
            .expect("defaults should generate");
        assert_eq!(graph.vertices.len(), 10);
        assert_eq!(
            graph.edges.len(),
            default_edge_count(GenerationKind::Connected, 10)
        );
    }

    #[test]
    fn too_many_tree_edges_are_rejected_not_clamped() {
        let mut rng = StdRng::seed_from_u64(8);
        let err = generate(GenerationKind::Tree, Some(5), Some(5), &settings(), &mut rng)
            .expect_err("tree with n edges is impossible");
        assert_eq!(err.kind, ErrorKind::InvalidConstraint);
    }

    #[test]
    fn impossible_counts_are_rejected() {
        let mut rng = StdRng::seed_from_u64(9);
        let cases = [
            (GenerationKind::Any, Some(0), None),
            (GenerationKind::Any, Some(4), Some(7)),
            (GenerationKind::Connected, Some(5), Some(3)),
            (GenerationKind::Bipartite, Some(1), None),
            (GenerationKind::Bipartite, Some(5), Some(7)),
            (GenerationKind::Any, Some(3), Some(-1)),
            (GenerationKind::Tree, Some(1_000_000), None),
        ];
        for (kind, vertices, edges) in cases {
            let err = generate(kind, vertices, edges, &settings(), &mut rng)
                .expect_err("constraint should be rejected");
            assert_eq!(err.kind, ErrorKind::InvalidConstraint, "{:?}", (kind, vertices, edges));
        }
    }

    #[test]
    fn edges_without_vertices_are_rejected() {
        let mut rng = StdRng::seed_from_u64(10);
        let err = generate(GenerationKind::Any, None, Some(3), &settings(), &mut rng)
            .expect_err("edges need vertices");
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }
}
