//! Construction of the weighted haplotype graph.

use std::collections::HashSet;

use petgraph::graph::{NodeIndex, UnGraph};

use crate::segments::{filter::FilteredSegments, VertexInfo};

/// Undirected graph with haplotypes as vertices and IBD segments as edges,
/// weighted by segment length in centimorgans.  Node indices coincide with
/// the interner's dense vertex ids.  A pair sharing multiple segments is
/// connected by parallel edges.
pub type HaplotypeGraph = UnGraph<VertexInfo, f64>;

/// Build the haplotype graph from the filtered segments.
pub fn build_graph(filtered: &FilteredSegments) -> HaplotypeGraph {
    let mut graph =
        HaplotypeGraph::with_capacity(filtered.interner.len(), filtered.segments.len());
    for vertex in filtered.interner.vertices() {
        graph.add_node(vertex.clone());
    }
    for segment in &filtered.segments {
        graph.add_edge(
            NodeIndex::new(segment.vid1),
            NodeIndex::new(segment.vid2),
            segment.length_cm,
        );
    }

    tracing::debug!(
        "built graph with {} vertices and {} edges",
        graph.node_count(),
        graph.edge_count()
    );

    graph
}

/// Build the subgraph induced by the vertices with the given vids, carrying
/// over vertex metadata and all edges whose two endpoints are members.
pub fn induced_subgraph(graph: &HaplotypeGraph, member_vids: &HashSet<usize>) -> HaplotypeGraph {
    let mut subgraph = HaplotypeGraph::with_capacity(member_vids.len(), 0);
    let mut node_map = vec![None; graph.node_count()];
    for node in graph.node_indices() {
        let vertex = &graph[node];
        if member_vids.contains(&vertex.vid) {
            node_map[node.index()] = Some(subgraph.add_node(vertex.clone()));
        }
    }
    for edge in graph.edge_indices() {
        let (a, b) = graph.edge_endpoints(edge).expect("edge exists");
        if let (Some(sub_a), Some(sub_b)) = (node_map[a.index()], node_map[b.index()]) {
            subgraph.add_edge(sub_a, sub_b, graph[edge]);
        }
    }
    subgraph
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;

    use crate::segments::filter::FilteredSegments;
    use crate::segments::Segment;

    fn segment(vid1: usize, vid2: usize, length_cm: f64) -> Segment {
        Segment {
            vid1,
            vid2,
            hap1: format!("g{vid1}.1"),
            hap2: format!("g{vid2}.1"),
            iid1: format!("g{vid1}"),
            iid2: format!("g{vid2}"),
            chrom: "7".to_string(),
            start: 500,
            end: 2500,
            length_cm,
        }
    }

    fn filtered(segments: Vec<Segment>) -> FilteredSegments {
        let mut result = FilteredSegments::default();
        for s in &segments {
            for (hap, iid) in [(&s.hap1, &s.iid1), (&s.hap2, &s.iid2)] {
                result.interner.intern(hap, iid);
            }
        }
        result.segments = segments;
        result
    }

    #[test]
    fn build_graph_preserves_parallel_edges() {
        let input = filtered(vec![
            segment(0, 1, 5.0),
            segment(0, 1, 7.0),
            segment(1, 2, 4.0),
        ]);
        let graph = super::build_graph(&input);

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph[petgraph::graph::NodeIndex::new(0)].hap, "g0.1");
    }

    #[test]
    fn induced_subgraph_keeps_member_edges_only() {
        let input = filtered(vec![
            segment(0, 1, 5.0),
            segment(1, 2, 4.0),
            segment(2, 3, 4.0),
        ]);
        let graph = super::build_graph(&input);

        let members: HashSet<usize> = [0, 1, 2].into_iter().collect();
        let subgraph = super::induced_subgraph(&graph, &members);

        assert_eq!(subgraph.node_count(), 3);
        // the 2-3 edge leaves the member set and must be gone
        assert_eq!(subgraph.edge_count(), 2);
        let vids = subgraph
            .node_indices()
            .map(|n| subgraph[n].vid)
            .collect::<HashSet<_>>();
        assert_eq!(vids, members);
    }
}
