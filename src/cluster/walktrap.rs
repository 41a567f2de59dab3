//! Walktrap community detection (Pons & Latapy).
//!
//! Short random walks of a fixed step count tend to stay inside densely
//! connected vertex groups, so vertices whose t-step walk distributions are
//! close belong to the same community.  Communities start as singletons and
//! are merged bottom-up by smallest Ward distance, with merging restricted
//! to adjacent communities.
//!
//! The merge dendrogram is cut with [`CutCriteria`]: a connected component
//! that is already small enough or densely connected enough is reported
//! whole, and only components failing both limits are cut at the merge step
//! of maximum weighted modularity.  A bridged pair of cliques therefore
//! stays one community under a permissive size limit and splits at the
//! bridge once the limits demand it.
//!
//! The implementation is fully deterministic: there is no random number
//! generator, adjacency is kept in ordered maps, and merge ties are broken
//! by community id.  Runs on the same input always yield the same partition.

use std::collections::{BTreeMap, BinaryHeap};

use petgraph::graph::{NodeIndex, UnGraph};

/// Decides where the merge dendrogram is cut.  A connected component
/// satisfying either limit needs no splitting and is kept whole; a
/// component failing both is replaced by its modularity-optimal
/// sub-communities.
#[derive(Debug, Clone, Copy)]
pub struct CutCriteria {
    /// Edge density (connected pairs over all pairs) at or above which a
    /// component is kept whole.
    pub min_connected_threshold: f64,
    /// Component size at or below which a component is kept whole.
    pub max_network_size: usize,
}

/// One community candidate merge; ordered by ascending distance, then ids.
#[derive(Debug, PartialEq)]
struct Merge {
    delta: f64,
    first: usize,
    second: usize,
}

impl Eq for Merge {}

impl Ord for Merge {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.delta
            .total_cmp(&other.delta)
            .then_with(|| self.first.cmp(&other.first))
            .then_with(|| self.second.cmp(&other.second))
    }
}

impl PartialOrd for Merge {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A community during agglomeration.  Communities are immutable once
/// created; a merge deactivates its two inputs and appends a new entry.
struct Community {
    members: Vec<usize>,
    /// Averaged t-step walk distribution of the members.
    walk: Vec<f64>,
    /// Sum of weights of edges with both endpoints inside.
    internal_weight: f64,
    /// Sum of member vertex strengths.
    strength: f64,
    /// Adjacent community -> total cross edge weight.  Keys may be stale
    /// after later merges and are resolved through the merge forest.
    links: BTreeMap<usize, f64>,
}

/// Compute a flat partition of `graph` into communities using random walks
/// of `steps` steps, cutting the merge dendrogram per `criteria`.  Every
/// vertex is assigned to exactly one community; communities are returned
/// ordered by their smallest vertex index.
pub fn walktrap<N>(
    graph: &UnGraph<N, f64>,
    steps: usize,
    criteria: CutCriteria,
) -> Vec<Vec<NodeIndex>> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }

    // Aggregate parallel edges; the walk sees summed evidence per pair.
    let mut adjacency: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n];
    let mut total_weight = 0f64;
    for edge in graph.edge_indices() {
        let (a, b) = graph.edge_endpoints(edge).expect("edge exists");
        if a == b {
            continue;
        }
        let weight = graph[edge];
        *adjacency[a.index()].entry(b.index()).or_insert(0.0) += weight;
        *adjacency[b.index()].entry(a.index()).or_insert(0.0) += weight;
        total_weight += weight;
    }
    if total_weight <= 0.0 {
        return graph.node_indices().map(|index| vec![index]).collect();
    }
    let strength: Vec<f64> = adjacency.iter().map(|row| row.values().sum()).collect();

    let mut communities: Vec<Community> = (0..n)
        .map(|v| Community {
            members: vec![v],
            walk: walk_distribution(v, steps, &adjacency, &strength),
            internal_weight: 0.0,
            strength: strength[v],
            links: adjacency[v].clone(),
        })
        .collect();
    // Merge forest: `merged_into[c]` points to the community that consumed c.
    let mut merged_into: Vec<Option<usize>> = vec![None; n];

    let mut heap = BinaryHeap::new();
    for first in 0..n {
        for (&second, _) in adjacency[first].range(first + 1..) {
            heap.push(std::cmp::Reverse(Merge {
                delta: ward_distance(n, &communities[first], &communities[second], &strength),
                first,
                second,
            }));
        }
    }

    let modularity_term = |community: &Community| {
        community.internal_weight / total_weight
            - (community.strength / (2.0 * total_weight)).powi(2)
    };

    let mut modularity: f64 = communities.iter().map(modularity_term).sum();
    let mut best_modularity = modularity;
    let mut best_step = 0usize;
    let mut merges: Vec<(usize, usize)> = Vec::new();

    while let Some(std::cmp::Reverse(candidate)) = heap.pop() {
        let Merge { first, second, .. } = candidate;
        if merged_into[first].is_some() || merged_into[second].is_some() {
            continue;
        }

        let merged_id = communities.len();
        let merged = merge_communities(
            &communities[first],
            &communities[second],
            (first, second),
            &mut merged_into,
        );
        modularity += modularity_term(&merged)
            - modularity_term(&communities[first])
            - modularity_term(&communities[second]);

        communities.push(merged);
        merged_into.push(None);
        merged_into[first] = Some(merged_id);
        merged_into[second] = Some(merged_id);
        merges.push((first, second));

        if modularity > best_modularity {
            best_modularity = modularity;
            best_step = merges.len();
        }

        for (&neighbor, _) in &communities[merged_id].links {
            let (low, high) = (neighbor.min(merged_id), neighbor.max(merged_id));
            heap.push(std::cmp::Reverse(Merge {
                delta: ward_distance(n, &communities[low], &communities[high], &strength),
                first: low,
                second: high,
            }));
        }
    }

    tracing::debug!(
        "walktrap: {} vertices, {} merges, best modularity {:.4} after {} merges",
        n,
        merges.len(),
        best_modularity,
        best_step
    );

    // The fully merged forest has one community per connected component.
    let mut component_consumed = vec![false; communities.len()];
    for &(first, second) in &merges {
        component_consumed[first] = true;
        component_consumed[second] = true;
    }
    // The modularity-optimal communities, used for components forced apart.
    let mut cut_consumed = vec![false; communities.len()];
    for &(first, second) in &merges[..best_step] {
        cut_consumed[first] = true;
        cut_consumed[second] = true;
    }
    let cut_ids: Vec<usize> = (0..n + best_step)
        .filter(|&id| !cut_consumed[id])
        .collect();
    let mut component_root = vec![0usize; n];
    for (vertex, root) in component_root.iter_mut().enumerate() {
        *root = resolve(&mut merged_into, vertex);
    }

    let mut member_sets: Vec<Vec<usize>> = Vec::new();
    for component in (0..communities.len()).filter(|&id| !component_consumed[id]) {
        let members = &communities[component].members;
        let size = members.len();
        let connected_pairs: usize =
            members.iter().map(|&v| adjacency[v].len()).sum::<usize>() / 2;
        let density = if size <= 2 {
            1.0
        } else {
            connected_pairs as f64 / (size * (size - 1) / 2) as f64
        };
        if size <= criteria.max_network_size || density >= criteria.min_connected_threshold {
            // Nothing forces a split; report the component whole.
            member_sets.push(members.clone());
        } else {
            let root = component_root[members[0]];
            for &id in &cut_ids {
                if component_root[communities[id].members[0]] == root {
                    member_sets.push(communities[id].members.clone());
                }
            }
        }
    }

    let mut partition: Vec<Vec<NodeIndex>> = member_sets
        .into_iter()
        .map(|mut members| {
            members.sort_unstable();
            members.into_iter().map(NodeIndex::new).collect()
        })
        .collect();
    partition.sort_by_key(|members: &Vec<NodeIndex>| members[0].index());
    partition
}

/// The t-step random-walk distribution starting at `start`.  Mass on a
/// vertex without edges stays in place.
fn walk_distribution(
    start: usize,
    steps: usize,
    adjacency: &[BTreeMap<usize, f64>],
    strength: &[f64],
) -> Vec<f64> {
    let n = adjacency.len();
    let mut current = vec![0f64; n];
    current[start] = 1.0;
    let mut next = vec![0f64; n];
    for _ in 0..steps {
        next.iter_mut().for_each(|x| *x = 0.0);
        for (vertex, &mass) in current.iter().enumerate() {
            if mass == 0.0 {
                continue;
            }
            if strength[vertex] == 0.0 {
                next[vertex] += mass;
                continue;
            }
            for (&target, &weight) in &adjacency[vertex] {
                next[target] += mass * weight / strength[vertex];
            }
        }
        std::mem::swap(&mut current, &mut next);
    }
    current
}

/// Ward merge cost between two communities: the squared distance of their
/// degree-normalized walk distributions, scaled by the harmonic size factor.
fn ward_distance(n: usize, first: &Community, second: &Community, strength: &[f64]) -> f64 {
    let mut r2 = 0f64;
    for (k, &s) in strength.iter().enumerate() {
        if s > 0.0 {
            let diff = first.walk[k] - second.walk[k];
            r2 += diff * diff / s;
        }
    }
    let size_first = first.members.len() as f64;
    let size_second = second.members.len() as f64;
    size_first * size_second / (size_first + size_second) * r2 / n as f64
}

fn merge_communities(
    first: &Community,
    second: &Community,
    ids: (usize, usize),
    merged_into: &mut [Option<usize>],
) -> Community {
    let size_first = first.members.len() as f64;
    let size_second = second.members.len() as f64;
    let total = size_first + size_second;

    let mut members = first.members.clone();
    members.extend_from_slice(&second.members);

    let walk = first
        .walk
        .iter()
        .zip(&second.walk)
        .map(|(a, b)| (size_first * a + size_second * b) / total)
        .collect();

    let mut links = BTreeMap::new();
    let mut cross_weight = 0f64;
    for (&key, &weight) in first.links.iter().chain(second.links.iter()) {
        let resolved = resolve(merged_into, key);
        if resolved == ids.0 || resolved == ids.1 {
            cross_weight += weight;
        } else {
            *links.entry(resolved).or_insert(0.0) += weight;
        }
    }
    // Every cross edge was seen from both sides.
    cross_weight /= 2.0;

    Community {
        members,
        walk,
        internal_weight: first.internal_weight + second.internal_weight + cross_weight,
        strength: first.strength + second.strength,
        links,
    }
}

/// Follow the merge forest to the currently active community, compressing
/// the visited path.
fn resolve(merged_into: &mut [Option<usize>], id: usize) -> usize {
    let mut root = id;
    while let Some(parent) = merged_into[root] {
        root = parent;
    }
    let mut cursor = id;
    while let Some(parent) = merged_into[cursor] {
        merged_into[cursor] = Some(root);
        cursor = parent;
    }
    root
}

#[cfg(test)]
mod test {
    use petgraph::graph::UnGraph;
    use pretty_assertions::assert_eq;

    fn graph_from_edges(n: usize, edges: &[(usize, usize, f64)]) -> UnGraph<usize, f64> {
        let mut graph = UnGraph::new_undirected();
        for v in 0..n {
            graph.add_node(v);
        }
        for &(a, b, w) in edges {
            graph.add_edge(
                petgraph::graph::NodeIndex::new(a),
                petgraph::graph::NodeIndex::new(b),
                w,
            );
        }
        graph
    }

    fn clique_edges(vertices: &[usize], weight: f64) -> Vec<(usize, usize, f64)> {
        let mut edges = Vec::new();
        for (i, &a) in vertices.iter().enumerate() {
            for &b in &vertices[i + 1..] {
                edges.push((a, b, weight));
            }
        }
        edges
    }

    fn sizes(partition: &[Vec<petgraph::graph::NodeIndex>]) -> Vec<usize> {
        let mut sizes = partition.iter().map(Vec::len).collect::<Vec<_>>();
        sizes.sort_unstable();
        sizes
    }

    /// The tool's default limits.
    fn default_cut() -> super::CutCriteria {
        super::CutCriteria {
            min_connected_threshold: 0.5,
            max_network_size: 30,
        }
    }

    /// Limits tight enough to force the modularity cut on any non-trivial
    /// component.
    fn forced_cut() -> super::CutCriteria {
        super::CutCriteria {
            min_connected_threshold: 1.1,
            max_network_size: 2,
        }
    }

    #[test]
    fn empty_graph_yields_no_communities() {
        let graph = graph_from_edges(0, &[]);
        assert!(super::walktrap(&graph, 3, default_cut()).is_empty());
    }

    #[test]
    fn single_edge_forms_one_community() {
        let graph = graph_from_edges(2, &[(0, 1, 5.0)]);
        let partition = super::walktrap(&graph, 3, default_cut());
        assert_eq!(sizes(&partition), vec![2]);
    }

    #[test]
    fn complete_graph_stays_together() {
        let graph = graph_from_edges(5, &clique_edges(&[0, 1, 2, 3, 4], 5.0));
        let partition = super::walktrap(&graph, 3, forced_cut());
        // even under forcing limits the modularity optimum keeps a clique
        // in one piece
        assert_eq!(sizes(&partition), vec![5]);
    }

    #[test]
    fn disjoint_cliques_form_separate_communities() {
        let mut edges = clique_edges(&[0, 1, 2, 3, 4, 5], 5.0);
        edges.extend(clique_edges(&[6, 7, 8], 5.0));
        let graph = graph_from_edges(9, &edges);

        let partition = super::walktrap(&graph, 3, default_cut());

        assert_eq!(sizes(&partition), vec![3, 6]);
        let large = partition.iter().find(|c| c.len() == 6).unwrap();
        let members = large.iter().map(|n| n.index()).collect::<Vec<_>>();
        assert_eq!(members, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn barbell_is_kept_whole_under_permissive_size_limit() {
        let mut edges = clique_edges(&[0, 1, 2, 3], 5.0);
        edges.extend(clique_edges(&[4, 5, 6, 7], 5.0));
        edges.push((3, 4, 5.0));
        let graph = graph_from_edges(8, &edges);

        let partition = super::walktrap(
            &graph,
            3,
            super::CutCriteria {
                min_connected_threshold: 0.5,
                max_network_size: 10,
            },
        );

        // 13 of 28 pairs are connected, but the size limit accepts the
        // component as it is
        assert_eq!(sizes(&partition), vec![8]);
    }

    #[test]
    fn barbell_splits_at_the_bridge_when_limits_demand_it() {
        let mut edges = clique_edges(&[0, 1, 2, 3], 5.0);
        edges.extend(clique_edges(&[4, 5, 6, 7], 5.0));
        edges.push((3, 4, 5.0));
        let graph = graph_from_edges(8, &edges);

        let partition = super::walktrap(
            &graph,
            3,
            super::CutCriteria {
                min_connected_threshold: 0.9,
                max_network_size: 3,
            },
        );

        assert_eq!(sizes(&partition), vec![4, 4]);
        let first = partition[0].iter().map(|n| n.index()).collect::<Vec<_>>();
        assert_eq!(first, vec![0, 1, 2, 3]);
    }

    #[test]
    fn isolated_vertex_stays_singleton() {
        let mut edges = clique_edges(&[0, 1, 2], 5.0);
        edges.push((4, 5, 5.0));
        let graph = graph_from_edges(6, &edges);

        let partition = super::walktrap(&graph, 3, default_cut());

        assert_eq!(sizes(&partition), vec![1, 2, 3]);
    }

    #[test]
    fn parallel_edges_count_as_aggregate_weight() {
        // Vertex 2 is pulled toward {0, 1} by two parallel light edges that
        // together outweigh the single edge toward {3, 4}.
        let edges = [
            (0, 1, 5.0),
            (0, 2, 3.0),
            (0, 2, 3.0),
            (1, 2, 3.0),
            (1, 2, 3.0),
            (2, 3, 1.0),
            (3, 4, 5.0),
        ];
        let graph = graph_from_edges(5, &edges);

        let partition = super::walktrap(&graph, 3, forced_cut());

        let with_two = partition
            .iter()
            .find(|c| c.iter().any(|n| n.index() == 2))
            .unwrap();
        assert!(with_two.iter().any(|n| n.index() == 0));
        assert!(with_two.iter().any(|n| n.index() == 1));
        assert!(partition.len() > 1);
    }

    #[test]
    fn partition_is_deterministic() {
        let mut edges = clique_edges(&[0, 1, 2, 3], 5.0);
        edges.extend(clique_edges(&[4, 5, 6, 7], 5.0));
        edges.push((0, 4, 2.0));
        edges.push((2, 6, 2.0));
        let graph = graph_from_edges(8, &edges);

        let first = super::walktrap(&graph, 3, forced_cut());
        let second = super::walktrap(&graph, 3, forced_cut());
        assert_eq!(first, second);
    }
}
