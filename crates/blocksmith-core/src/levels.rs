//! Vertical level assignment for diagram elements.
//!
//! Level 0 is the top row. With the default [`LevelStrategy::LongestPath`]
//! sinks end up at the top and sources at the bottom, so consumers read above
//! the things that feed them.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelStrategy {
    /// Longest-path layering from the sources, then inverted. Unbounded depth.
    #[default]
    LongestPath,
    /// Older three-row classification: pure sinks, everything else, pure sources.
    DegreeBuckets,
}

/// Assign levels with the default strategy.
pub fn assign_levels(ids: &[&str], edges: &[(&str, &str)]) -> HashMap<String, usize> {
    assign_levels_with(LevelStrategy::default(), ids, edges)
}

/// Map every id to its level. Edges naming an unknown id are ignored.
///
/// A self-loop never propagates a level, but under
/// [`LevelStrategy::LongestPath`] it counts as one of its node's incoming
/// edges. That node therefore never drains, and it and everything only it
/// feeds stay at depth 0 before inversion.
pub fn assign_levels_with(
    strategy: LevelStrategy,
    ids: &[&str],
    edges: &[(&str, &str)],
) -> HashMap<String, usize> {
    let graph = Graph::new(ids, edges);
    let levels = match strategy {
        LevelStrategy::LongestPath => invert(graph.longest_path_depths()),
        LevelStrategy::DegreeBuckets => graph.degree_buckets(),
    };
    graph
        .nodes
        .iter()
        .zip(levels)
        .map(|(id, level)| (id.to_string(), level))
        .collect()
}

struct Graph<'a> {
    nodes: Vec<&'a str>,
    adjacency: Vec<Vec<usize>>,
    /// Incoming edges from other nodes
    in_degree: Vec<usize>,
    self_loop: Vec<bool>,
}

impl<'a> Graph<'a> {
    fn new(ids: &[&'a str], edges: &[(&str, &str)]) -> Self {
        let mut seen = HashSet::new();
        let nodes: Vec<&str> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        let index: HashMap<&str, usize> = nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut adjacency = vec![Vec::new(); nodes.len()];
        let mut in_degree = vec![0; nodes.len()];
        let mut self_loop = vec![false; nodes.len()];
        for (source, target) in edges {
            let (Some(&s), Some(&t)) = (index.get(source), index.get(target)) else {
                continue;
            };
            if s == t {
                self_loop[s] = true;
                continue;
            }
            adjacency[s].push(t);
            in_degree[t] += 1;
        }

        Self {
            nodes,
            adjacency,
            in_degree,
            self_loop,
        }
    }

    /// Depth of each node along the longest path from any in-degree-0 node.
    ///
    /// A node is queued once, when its last incoming edge has been consumed;
    /// nodes that only sit on cycles are never queued, and neither are nodes
    /// with a self-loop, whose own edge is never consumed. Nodes that no
    /// processed edge ever reached default to 0. With no sources at all, every
    /// node is 0.
    fn longest_path_depths(&self) -> Vec<usize> {
        let n = self.nodes.len();
        let mut remaining: Vec<usize> = self
            .in_degree
            .iter()
            .zip(&self.self_loop)
            .map(|(&d, &looped)| d + usize::from(looped))
            .collect();
        let mut depth: Vec<Option<usize>> = vec![None; n];
        let mut queued = vec![false; n];
        let mut queue = VecDeque::new();

        for node in 0..n {
            if remaining[node] == 0 {
                depth[node] = Some(0);
                queued[node] = true;
                queue.push_back(node);
            }
        }

        while let Some(node) = queue.pop_front() {
            let next = depth[node].unwrap_or(0) + 1;
            for &neighbor in &self.adjacency[node] {
                if depth[neighbor].map_or(true, |d| d < next) {
                    depth[neighbor] = Some(next);
                }
                remaining[neighbor] = remaining[neighbor].saturating_sub(1);
                if remaining[neighbor] == 0 && !queued[neighbor] {
                    queued[neighbor] = true;
                    queue.push_back(neighbor);
                }
            }
        }

        depth.into_iter().map(|d| d.unwrap_or(0)).collect()
    }

    /// Self-loops are left out of the degree counts here.
    fn degree_buckets(&self) -> Vec<usize> {
        let mut out_degree = vec![0; self.nodes.len()];
        for (node, targets) in self.adjacency.iter().enumerate() {
            out_degree[node] = targets.len();
        }

        let buckets: Vec<usize> = (0..self.nodes.len())
            .map(|node| match (self.in_degree[node] > 0, out_degree[node] > 0) {
                (true, false) => 0,
                (false, true) => 2,
                _ => 1,
            })
            .collect();

        // Keep rows dense when a bucket is empty.
        let used: BTreeSet<usize> = buckets.iter().copied().collect();
        let rank: HashMap<usize, usize> = used.into_iter().enumerate().map(|(r, b)| (b, r)).collect();
        buckets.into_iter().map(|b| rank[&b]).collect()
    }
}

fn invert(depths: Vec<usize>) -> Vec<usize> {
    let max = depths.iter().copied().max().unwrap_or(0);
    depths.into_iter().map(|d| max - d).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn level(levels: &HashMap<String, usize>, id: &str) -> usize {
        levels[id]
    }

    #[test]
    fn empty_graph_has_no_levels() {
        assert!(assign_levels(&[], &[]).is_empty());
    }

    #[test]
    fn sink_is_on_top() {
        let levels = assign_levels(&["a", "b"], &[("a", "b")]);
        assert_eq!(level(&levels, "a"), 1);
        assert_eq!(level(&levels, "b"), 0);
    }

    #[test]
    fn chain_counts_down_to_the_sink() {
        let levels = assign_levels(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("c", "d")]);
        assert_eq!(
            ["a", "b", "c", "d"].map(|id| level(&levels, id)),
            [3, 2, 1, 0]
        );
    }

    #[test]
    fn diamond_uses_the_longest_branch() {
        // a -> b -> c -> d and a -> d
        let ids = ["a", "b", "c", "d"];
        let edges = [("a", "b"), ("b", "c"), ("c", "d"), ("a", "d")];
        let levels = assign_levels(&ids, &edges);
        assert_eq!(level(&levels, "d"), 0);
        assert_eq!(level(&levels, "a"), 3);
    }

    #[test]
    fn pure_cycle_is_flat() {
        let levels = assign_levels(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "a")]);
        assert!(levels.values().all(|&l| l == 0));
        assert_eq!(levels.len(), 3);
    }

    #[test]
    fn isolated_self_loop_sits_with_the_sources() {
        let levels = assign_levels(&["a", "b", "s"], &[("a", "b"), ("s", "s")]);
        assert_eq!(level(&levels, "b"), 0);
        assert_eq!(level(&levels, "a"), 1);
        assert_eq!(level(&levels, "s"), 1);
    }

    #[test]
    fn self_loop_holds_back_its_node_and_downstream() {
        // b keeps one undrained incoming edge (its own), so c is never reached.
        let ids = ["a", "b", "c"];
        let edges = [("a", "b"), ("b", "b"), ("b", "c")];
        assert_eq!(Graph::new(&ids, &edges).longest_path_depths(), [0, 1, 0]);
        let levels = assign_levels(&ids, &edges);
        assert_eq!(ids.map(|id| level(&levels, id)), [1, 0, 1]);
    }

    #[test]
    fn self_loop_only_node_is_never_a_source() {
        let levels = assign_levels(&["s", "t"], &[("s", "s"), ("s", "t")]);
        assert_eq!(level(&levels, "s"), 0);
        assert_eq!(level(&levels, "t"), 0);
    }

    #[test]
    fn degree_buckets_ignore_self_loops() {
        let levels = assign_levels_with(
            LevelStrategy::DegreeBuckets,
            &["a", "b"],
            &[("a", "b"), ("b", "b")],
        );
        assert_eq!(level(&levels, "b"), 0);
        assert_eq!(level(&levels, "a"), 1);
    }

    #[test]
    fn cycle_entered_from_a_root_keeps_partial_depth() {
        // r -> x, x <-> y, y -> z: x is proposed by r but never drains, so y and z
        // are never reached.
        let ids = ["r", "x", "y", "z"];
        let edges = [("r", "x"), ("x", "y"), ("y", "x"), ("y", "z")];
        let depths = Graph::new(&ids, &edges).longest_path_depths();
        assert_eq!(depths, [0, 1, 0, 0]);
    }

    #[test]
    fn unknown_endpoints_are_ignored() {
        let levels = assign_levels(&["a"], &[("a", "ghost"), ("ghost", "a")]);
        assert_eq!(level(&levels, "a"), 0);
    }

    #[test]
    fn degree_buckets_use_three_rows() {
        let ids = ["src", "mid", "sink", "alone"];
        let edges = [("src", "mid"), ("mid", "sink")];
        let levels = assign_levels_with(LevelStrategy::DegreeBuckets, &ids, &edges);
        assert_eq!(level(&levels, "sink"), 0);
        assert_eq!(level(&levels, "mid"), 1);
        assert_eq!(level(&levels, "alone"), 1);
        assert_eq!(level(&levels, "src"), 2);
    }

    #[test]
    fn degree_buckets_compact_empty_rows() {
        let levels = assign_levels_with(LevelStrategy::DegreeBuckets, &["a", "b"], &[]);
        assert_eq!(level(&levels, "a"), 0);
        assert_eq!(level(&levels, "b"), 0);
    }

    /// Longest path from any source, computed by memoized recursion over predecessors.
    fn reference_depths(n: usize, edges: &[(usize, usize)]) -> Vec<usize> {
        fn depth(v: usize, preds: &[Vec<usize>], memo: &mut [Option<usize>]) -> usize {
            if let Some(d) = memo[v] {
                return d;
            }
            let d = preds[v]
                .iter()
                .map(|&p| depth(p, preds, memo) + 1)
                .max()
                .unwrap_or(0);
            memo[v] = Some(d);
            d
        }
        let mut preds = vec![Vec::new(); n];
        for &(s, t) in edges {
            preds[t].push(s);
        }
        let mut memo = vec![None; n];
        (0..n).map(|v| depth(v, &preds, &mut memo)).collect()
    }

    fn dag() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
        (1usize..14).prop_flat_map(|n| {
            let edges = prop::collection::vec((0..n, 0..n), 0..(n * 3)).prop_map(|pairs| {
                pairs
                    .into_iter()
                    .filter(|(a, b)| a != b)
                    .map(|(a, b)| (a.min(b), a.max(b)))
                    .collect::<Vec<_>>()
            });
            (Just(n), edges)
        })
    }

    proptest! {
        #[test]
        fn dag_depth_matches_longest_path((n, edges) in dag()) {
            let names: Vec<String> = (0..n).map(|i| format!("n{i}")).collect();
            let ids: Vec<&str> = names.iter().map(String::as_str).collect();
            let named: Vec<(&str, &str)> = edges.iter().map(|&(s, t)| (ids[s], ids[t])).collect();

            let expected = reference_depths(n, &edges);
            let depths = Graph::new(&ids, &named).longest_path_depths();
            prop_assert_eq!(&depths, &expected);

            let max = expected.iter().copied().max().unwrap_or(0);
            let levels = assign_levels(&ids, &named);
            for (i, id) in ids.iter().enumerate() {
                prop_assert_eq!(levels[*id], max - expected[i]);
            }
        }
    }
}
