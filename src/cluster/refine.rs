//! Cluster construction and the bounded refinement loop.
//!
//! The first Walktrap pass yields candidate clusters.  A cluster that is
//! both too large and too sparsely connected is queued for another
//! clustering round on its induced subgraph; sub-clusters inherit a dotted
//! id from their parent.  When a re-clustering round fails to split a
//! cluster at all, hub vertices (members bridging many poorly
//! interconnected neighbors) are pruned and the round is repeated once on
//! the pruned subgraph.  After `max_rechecks` rounds the surviving clusters
//! are accepted as they are.

use std::collections::{BTreeSet, HashSet};

use petgraph::graph::NodeIndex;

use super::graph::{induced_subgraph, HaplotypeGraph};
use super::walktrap::walktrap;
use super::Config;

/// One final cluster of haplotypes.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Dotted id path; top-level clusters carry plain integers, a cluster
    /// refined from parent `P` at child index `k` is `P.k`.
    pub id: String,
    /// Id of the refined parent cluster, if any.
    pub parent_id: Option<String>,
    /// Member vertex ids, sorted ascending.
    pub member_vids: Vec<usize>,
    /// Member haplotype identifiers, aligned with `member_vids`.
    pub member_haps: Vec<String>,
    /// Distinct member individual ids.
    pub member_iids: BTreeSet<String>,
    /// Number of connected member pairs.
    pub true_positive_edges: usize,
    /// Connected member pairs over all possible member pairs.
    pub true_positive_ratio: f64,
    /// Edges from a member to a vertex outside the cluster.
    pub false_negative_edges: usize,
    /// Refinement round in which the cluster was finalized (0 = first pass).
    pub recheck_round: usize,
}

/// A cluster queued for another refinement round.
#[derive(Debug)]
struct Pending {
    id: String,
    member_vids: Vec<usize>,
}

/// Run clustering plus refinement over the haplotype graph and return the
/// final cluster list in discovery order.
pub fn find_clusters(graph: &HaplotypeGraph, config: &Config) -> Vec<Cluster> {
    let mut engine = Engine {
        graph,
        config,
        rechecks_done: 0,
        queue: vec![Vec::new()],
        finals: Vec::new(),
    };

    tracing::info!(
        "running random walk with step size {} over {} vertices",
        config.step,
        graph.node_count()
    );
    let partition = walktrap(graph, config.step, config.cut_criteria());
    let surviving = engine.surviving(partition);
    tracing::info!("first pass found {} clusters", surviving.len());
    for (index, members) in surviving.into_iter().enumerate() {
        engine.evaluate(index.to_string(), None, &members, graph);
    }

    while engine.rechecks_done < config.max_rechecks
        && !engine.queue[engine.rechecks_done].is_empty()
    {
        engine.rechecks_done += 1;
        engine.queue.push(Vec::new());
        tracing::info!("recheck: {}", engine.rechecks_done);

        let pending = std::mem::take(&mut engine.queue[engine.rechecks_done - 1]);
        for cluster in pending {
            engine.refine(cluster);
        }
    }

    engine.finals
}

struct Engine<'a> {
    graph: &'a HaplotypeGraph,
    config: &'a Config,
    rechecks_done: usize,
    queue: Vec<Vec<Pending>>,
    finals: Vec<Cluster>,
}

impl<'a> Engine<'a> {
    /// Drop communities at or below the minimum cluster size.
    fn surviving(&self, partition: Vec<Vec<NodeIndex>>) -> Vec<Vec<NodeIndex>> {
        partition
            .into_iter()
            .filter(|members| members.len() > self.config.min_cluster_size)
            .collect()
    }

    /// Compute metrics for one candidate cluster and either finalize it or
    /// queue it for the next refinement round.
    fn evaluate(
        &mut self,
        id: String,
        parent_id: Option<String>,
        members: &[NodeIndex],
        detection_graph: &HaplotypeGraph,
    ) {
        let member_set: HashSet<NodeIndex> = members.iter().copied().collect();
        let size = members.len();

        let true_positive_edges = connected_pairs(detection_graph, &member_set);
        let true_positive_ratio = if size <= 2 {
            1.0
        } else {
            true_positive_edges as f64 / pair_count(size) as f64
        };
        let false_negative_edges = boundary_edge_count(detection_graph, &member_set);

        if self.rechecks_done < self.config.max_rechecks
            && true_positive_ratio < self.config.min_connected_threshold
            && size > self.config.max_network_size
        {
            tracing::debug!(
                "cluster {id}: size {size}, ratio {true_positive_ratio:.4} -> recheck"
            );
            self.queue[self.rechecks_done].push(Pending {
                id,
                member_vids: members
                    .iter()
                    .map(|&node| detection_graph[node].vid)
                    .collect(),
            });
            return;
        }

        let mut member_vids: Vec<usize> = members
            .iter()
            .map(|&node| detection_graph[node].vid)
            .collect();
        member_vids.sort_unstable();
        let member_haps: Vec<String> = member_vids
            .iter()
            .map(|&vid| self.graph[NodeIndex::new(vid)].hap.clone())
            .collect();
        let member_iids: BTreeSet<String> = member_vids
            .iter()
            .map(|&vid| self.graph[NodeIndex::new(vid)].iid.clone())
            .collect();

        tracing::debug!(
            "cluster {id}: {} haplotypes from {} individuals, ratio {true_positive_ratio:.4}",
            member_vids.len(),
            member_iids.len()
        );
        self.finals.push(Cluster {
            id,
            parent_id,
            member_vids,
            member_haps,
            member_iids,
            true_positive_edges,
            true_positive_ratio,
            false_negative_edges,
            recheck_round: self.rechecks_done,
        });
    }

    /// Re-cluster one queued cluster on its induced subgraph.
    fn refine(&mut self, pending: Pending) {
        let member_vids: HashSet<usize> = pending.member_vids.iter().copied().collect();
        let mut subgraph = induced_subgraph(self.graph, &member_vids);
        let mut partition = walktrap(&subgraph, self.config.step, self.config.cut_criteria());

        if partition.len() == 1 {
            // Walktrap failed to split; prune hub vertices and try once more.
            if let Some(pruned) = prune_hubs(&subgraph, self.config) {
                tracing::debug!(
                    "cluster {}: pruned {} hub vertices",
                    pending.id,
                    subgraph.node_count() - pruned.node_count()
                );
                subgraph = pruned;
                partition = walktrap(&subgraph, self.config.step, self.config.cut_criteria());
            }
        }

        let surviving = self.surviving(partition);
        tracing::info!(
            "cluster {}: re-clustering found {} sub-clusters",
            pending.id,
            surviving.len()
        );
        for (child, members) in surviving.into_iter().enumerate() {
            let id = format!("{}.{}", pending.id, child);
            self.evaluate(id, Some(pending.id.clone()), &members, &subgraph);
        }
    }
}

/// Number of unordered vertex pairs among `size` vertices.
fn pair_count(size: usize) -> usize {
    size * (size - 1) / 2
}

/// Count distinct member pairs connected by at least one edge.
fn connected_pairs(graph: &HaplotypeGraph, members: &HashSet<NodeIndex>) -> usize {
    let mut pairs = HashSet::new();
    for edge in graph.edge_indices() {
        let (a, b) = graph.edge_endpoints(edge).expect("edge exists");
        if members.contains(&a) && members.contains(&b) {
            let (low, high) = (a.index().min(b.index()), a.index().max(b.index()));
            pairs.insert((low, high));
        }
    }
    pairs.len()
}

/// Count edges leaving the member set, parallel edges counted individually.
fn boundary_edge_count(graph: &HaplotypeGraph, members: &HashSet<NodeIndex>) -> usize {
    graph
        .edge_indices()
        .filter(|&edge| {
            let (a, b) = graph.edge_endpoints(edge).expect("edge exists");
            members.contains(&a) != members.contains(&b)
        })
        .count()
}

/// Identify and remove hub vertices from `subgraph`.
///
/// A hub touches an outsized share of the members, its neighbors are poorly
/// interconnected among themselves, and its inverse-weight connectivity
/// score ranks in the configured top share of all members.  Returns `None`
/// when no vertex matches all three criteria.
fn prune_hubs(subgraph: &HaplotypeGraph, config: &Config) -> Option<HaplotypeGraph> {
    let size = subgraph.node_count();
    if size == 0 {
        return None;
    }

    let mut neighbor_sets: Vec<BTreeSet<NodeIndex>> = vec![BTreeSet::new(); size];
    let mut inv_weight = vec![0f64; size];
    for edge in subgraph.edge_indices() {
        let (a, b) = subgraph.edge_endpoints(edge).expect("edge exists");
        if a == b {
            continue;
        }
        let weight = subgraph[edge];
        neighbor_sets[a.index()].insert(b);
        neighbor_sets[b.index()].insert(a);
        if weight > 0.0 {
            inv_weight[a.index()] += 1.0 / weight;
            inv_weight[b.index()] += 1.0 / weight;
        }
    }

    // Connectivity score ranked at the configured top share of members.
    let mut ranked = inv_weight.clone();
    ranked.sort_by(|a, b| b.total_cmp(a));
    let rank_index = (config.hub_threshold * size as f64) as usize;
    let rank_reference = ranked[rank_index.min(size - 1)];

    let neighbor_limit = config.segment_distribution_threshold * size as f64;
    let mut hubs: HashSet<usize> = HashSet::new();
    for node in subgraph.node_indices() {
        let neighbors = &neighbor_sets[node.index()];
        let degree = neighbors.len();
        if (degree as f64) <= neighbor_limit || inv_weight[node.index()] <= rank_reference {
            continue;
        }

        let local_ratio = if degree <= 1 {
            1.0
        } else {
            let mut connected = 0usize;
            let neighbors: Vec<NodeIndex> = neighbors.iter().copied().collect();
            for (i, &u) in neighbors.iter().enumerate() {
                for &v in &neighbors[i + 1..] {
                    if subgraph.find_edge(u, v).is_some() {
                        connected += 1;
                    }
                }
            }
            connected as f64 / pair_count(degree) as f64
        };

        if local_ratio < config.min_connected_threshold {
            hubs.insert(node.index());
        }
    }

    if hubs.is_empty() {
        return None;
    }

    let keep: HashSet<usize> = subgraph
        .node_indices()
        .filter(|node| !hubs.contains(&node.index()))
        .map(|node| subgraph[node].vid)
        .collect();
    Some(induced_subgraph(subgraph, &keep))
}
