//! BFS/DFS traversal, shortest/all paths, and sampled community/centrality
//! analysis (spec §4.9, C9).

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tgdb_core::TgdbResult;
use tgdb_storage::StoreConnection;

/// Which edge direction(s) a traversal follows (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Hierarchy children only.
    Down,
    /// Hierarchy parents only.
    Up,
    /// Both hierarchy directions.
    Both,
}

/// Knobs for BFS/DFS traversal (spec §4.9).
#[derive(Debug, Clone)]
pub struct TraversalOptions {
    /// Maximum hop distance from the start node.
    pub max_depth: u32,
    /// Stop after visiting this many nodes (0 = unbounded).
    pub visit_limit: usize,
    /// Which hierarchy direction(s) to follow.
    pub direction: Direction,
    /// Also follow reference edges (both directions) as traversal edges.
    pub include_references: bool,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        TraversalOptions {
            max_depth: 10,
            visit_limit: 0,
            direction: Direction::Down,
            include_references: false,
        }
    }
}

struct AdjacencyView {
    hierarchy_down: FxHashMap<String, Vec<String>>,
    hierarchy_up: FxHashMap<String, Vec<String>>,
    references: FxHashMap<String, Vec<String>>,
}

fn load_adjacency(conn: &Arc<StoreConnection>) -> TgdbResult<AdjacencyView> {
    let edges: Vec<(String, String)> = conn.query(
        "SELECT parent_id, child_id FROM hierarchy_edges ORDER BY parent_id, position",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let mut hierarchy_down: FxHashMap<String, Vec<String>> = FxHashMap::default();
    let mut hierarchy_up: FxHashMap<String, Vec<String>> = FxHashMap::default();
    for (parent, child) in edges {
        hierarchy_down.entry(parent.clone()).or_default().push(child.clone());
        hierarchy_up.entry(child).or_default().push(parent);
    }

    let refs: Vec<(String, String)> = conn.query(
        "SELECT source_id, target_id FROM node_references",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let mut references: FxHashMap<String, Vec<String>> = FxHashMap::default();
    for (source, target) in refs {
        references.entry(source.clone()).or_default().push(target.clone());
        references.entry(target).or_default().push(source);
    }

    Ok(AdjacencyView { hierarchy_down, hierarchy_up, references })
}

impl AdjacencyView {
    fn neighbors(&self, id: &str, direction: Direction, include_references: bool) -> Vec<String> {
        let mut out = Vec::new();
        match direction {
            Direction::Down => {
                if let Some(v) = self.hierarchy_down.get(id) {
                    out.extend(v.iter().cloned());
                }
            }
            Direction::Up => {
                if let Some(v) = self.hierarchy_up.get(id) {
                    out.extend(v.iter().cloned());
                }
            }
            Direction::Both => {
                if let Some(v) = self.hierarchy_down.get(id) {
                    out.extend(v.iter().cloned());
                }
                if let Some(v) = self.hierarchy_up.get(id) {
                    out.extend(v.iter().cloned());
                }
            }
        }
        if include_references {
            if let Some(v) = self.references.get(id) {
                out.extend(v.iter().cloned());
            }
        }
        out
    }
}

/// The engine holding a read-only view over the hierarchy/reference graph
/// for BFS/DFS, path-finding, and sampled analysis (spec §4.9).
pub struct TraversalEngine<'a> {
    conn: &'a Arc<StoreConnection>,
}

impl<'a> TraversalEngine<'a> {
    /// Wrap a connection for traversal reads.
    pub fn new(conn: &'a Arc<StoreConnection>) -> Self {
        TraversalEngine { conn }
    }

    /// Breadth-first traversal from `start`, cycle-safe via a visited set,
    /// bounded by `options.max_depth`/`options.visit_limit` (spec §4.9).
    pub fn bfs(&self, start: &str, options: &TraversalOptions) -> TgdbResult<Vec<String>> {
        let adjacency = load_adjacency(self.conn)?;
        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut order = Vec::new();
        let mut queue: VecDeque<(String, u32)> = VecDeque::new();
        queue.push_back((start.to_string(), 0));
        visited.insert(start.to_string());

        while let Some((node, depth)) = queue.pop_front() {
            order.push(node.clone());
            if options.visit_limit > 0 && order.len() >= options.visit_limit {
                break;
            }
            if depth >= options.max_depth {
                continue;
            }
            for next in adjacency.neighbors(&node, options.direction, options.include_references) {
                if visited.insert(next.clone()) {
                    queue.push_back((next, depth + 1));
                }
            }
        }
        Ok(order)
    }

    /// Depth-first traversal from `start`, same bounds as [`bfs`](Self::bfs).
    pub fn dfs(&self, start: &str, options: &TraversalOptions) -> TgdbResult<Vec<String>> {
        let adjacency = load_adjacency(self.conn)?;
        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut order = Vec::new();
        let mut stack: Vec<(String, u32)> = vec![(start.to_string(), 0)];
        visited.insert(start.to_string());

        while let Some((node, depth)) = stack.pop() {
            order.push(node.clone());
            if options.visit_limit > 0 && order.len() >= options.visit_limit {
                break;
            }
            if depth >= options.max_depth {
                continue;
            }
            let mut neighbors = adjacency.neighbors(&node, options.direction, options.include_references);
            neighbors.reverse();
            for next in neighbors {
                if visited.insert(next.clone()) {
                    stack.push((next, depth + 1));
                }
            }
        }
        Ok(order)
    }

    /// Shortest path between `from` and `to`. Tries hierarchy-only first;
    /// if `include_references` is set and no hierarchy path exists, retries
    /// with reference edges included. Hierarchy beats reference beats
    /// mixed; among equal-length paths, the earlier-discovered one wins
    /// (spec §4.9).
    pub fn shortest_path(
        &self,
        from: &str,
        to: &str,
        include_references: bool,
    ) -> TgdbResult<Option<PathResult>> {
        let adjacency = load_adjacency(self.conn)?;

        if let Some(path) = bfs_shortest(&adjacency, from, to, Direction::Both, false) {
            return Ok(Some(PathResult {
                distance: (path.len() - 1) as u32,
                path,
                path_type: PathType::Hierarchy,
            }));
        }
        if include_references {
            if let Some(path) = bfs_shortest(&adjacency, from, to, Direction::Both, true) {
                return Ok(Some(PathResult {
                    distance: (path.len() - 1) as u32,
                    path,
                    path_type: PathType::Reference,
                }));
            }
        }
        Ok(None)
    }

    /// Every simple path between `from` and `to`, shortest first, capped at
    /// `max_paths` and `max_depth` (spec §4.9).
    pub fn all_paths(
        &self,
        from: &str,
        to: &str,
        max_depth: u32,
        max_paths: usize,
        include_references: bool,
    ) -> TgdbResult<Vec<PathResult>> {
        let adjacency = load_adjacency(self.conn)?;
        let mut results = Vec::new();
        let mut queue: VecDeque<Vec<String>> = VecDeque::new();
        queue.push_back(vec![from.to_string()]);

        while let Some(path) = queue.pop_front() {
            if results.len() >= max_paths {
                break;
            }
            let current = path.last().expect("path always non-empty").clone();
            if current == to && path.len() > 1 {
                results.push(PathResult {
                    distance: (path.len() - 1) as u32,
                    path,
                    path_type: PathType::Mixed,
                });
                continue;
            }
            if (path.len() as u32 - 1) >= max_depth {
                continue;
            }
            for next in adjacency.neighbors(&current, Direction::Both, include_references) {
                if !path.contains(&next) {
                    let mut extended = path.clone();
                    extended.push(next);
                    queue.push_back(extended);
                }
            }
        }
        results.sort_by_key(|p| p.distance);
        results.truncate(max_paths);
        Ok(results)
    }

    /// Connected components over hierarchy ∪ reference edges, kept when
    /// size >= `min_cluster_size`, ranked by internal density
    /// (spec §4.9).
    pub fn detect_communities(&self, min_cluster_size: usize) -> TgdbResult<Vec<Community>> {
        let adjacency = load_adjacency(self.conn)?;
        let node_ids: FxHashSet<String> = self
            .conn
            .query("SELECT id FROM nodes", [], |row| row.get(0))?
            .into_iter()
            .collect();

        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut components = Vec::new();

        for id in &node_ids {
            if visited.contains(id) {
                continue;
            }
            let mut members = Vec::new();
            let mut queue = VecDeque::new();
            queue.push_back(id.clone());
            visited.insert(id.clone());
            while let Some(node) = queue.pop_front() {
                members.push(node.clone());
                for next in adjacency.neighbors(&node, Direction::Both, true) {
                    if node_ids.contains(&next) && visited.insert(next.clone()) {
                        queue.push_back(next);
                    }
                }
            }
            if members.len() >= min_cluster_size {
                components.push(members);
            }
        }

        let mut communities: Vec<Community> = components
            .into_iter()
            .map(|members| {
                let n = members.len();
                let member_set: FxHashSet<&String> = members.iter().collect();
                let mut internal_edges = 0usize;
                let mut degree: FxHashMap<String, usize> = FxHashMap::default();
                for m in &members {
                    let neighbors = adjacency.neighbors(m, Direction::Both, true);
                    let inside = neighbors.iter().filter(|n| member_set.contains(n)).count();
                    internal_edges += inside;
                    degree.insert(m.clone(), inside);
                }
                internal_edges /= 2; // each undirected edge counted from both ends
                let possible = if n >= 2 { n * (n - 1) / 2 } else { 1 };
                let density = internal_edges as f64 / possible as f64;
                let central_node = degree
                    .into_iter()
                    .max_by_key(|(_, d)| *d)
                    .map(|(id, _)| id)
                    .unwrap_or_default();
                Community { members, density, central_node }
            })
            .collect();
        communities.sort_by(|a, b| b.density.partial_cmp(&a.density).unwrap_or(std::cmp::Ordering::Equal));
        Ok(communities)
    }

    /// Sampled centrality metrics (spec §4.9): degree is exact; betweenness
    /// is sampled pair-shortest-paths on <= 50 vertices; closeness is
    /// `reachable / sum_distance` from `id`. Stable for a fixed input graph.
    pub fn centrality(&self, id: &str) -> TgdbResult<CentralityReport> {
        let adjacency = load_adjacency(self.conn)?;
        let degree = adjacency.neighbors(id, Direction::Both, true).len();

        let node_ids: Vec<String> = self
            .conn
            .query("SELECT id FROM nodes ORDER BY id", [], |row| row.get(0))?;
        let sample: Vec<String> = node_ids.into_iter().take(50).collect();

        let distances = bfs_distances(&adjacency, id, &sample);
        let reachable = distances.values().filter(|d| **d > 0).count();
        let sum_distance: u64 = distances.values().map(|d| *d as u64).sum();
        let closeness = if sum_distance > 0 {
            reachable as f64 / sum_distance as f64
        } else {
            0.0
        };

        let mut betweenness_hits = 0usize;
        let mut pairs_considered = 0usize;
        for s in &sample {
            for t in &sample {
                if s == t || s == id || t == id {
                    continue;
                }
                pairs_considered += 1;
                if let Some(path) = bfs_shortest(&adjacency, s, t, Direction::Both, true) {
                    if path.len() > 2 && path[1..path.len() - 1].iter().any(|n| n == id) {
                        betweenness_hits += 1;
                    }
                }
            }
        }
        let betweenness = if pairs_considered > 0 {
            betweenness_hits as f64 / pairs_considered as f64
        } else {
            0.0
        };

        Ok(CentralityReport { degree, betweenness, closeness })
    }
}

fn bfs_shortest(
    adjacency: &AdjacencyView,
    from: &str,
    to: &str,
    direction: Direction,
    include_references: bool,
) -> Option<Vec<String>> {
    if from == to {
        return Some(vec![from.to_string()]);
    }
    let mut visited: FxHashSet<String> = FxHashSet::default();
    let mut prev: FxHashMap<String, String> = FxHashMap::default();
    let mut queue = VecDeque::new();
    queue.push_back(from.to_string());
    visited.insert(from.to_string());

    while let Some(node) = queue.pop_front() {
        if node == to {
            let mut path = vec![node.clone()];
            let mut cursor = node;
            while let Some(p) = prev.get(&cursor) {
                path.push(p.clone());
                cursor = p.clone();
            }
            path.reverse();
            return Some(path);
        }
        for next in adjacency.neighbors(&node, direction, include_references) {
            if visited.insert(next.clone()) {
                prev.insert(next.clone(), node.clone());
                queue.push_back(next);
            }
        }
    }
    None
}

fn bfs_distances(adjacency: &AdjacencyView, from: &str, targets: &[String]) -> FxHashMap<String, u32> {
    let mut distances: FxHashMap<String, u32> = FxHashMap::default();
    let mut queue = VecDeque::new();
    queue.push_back((from.to_string(), 0u32));
    distances.insert(from.to_string(), 0);

    while let Some((node, depth)) = queue.pop_front() {
        for next in adjacency.neighbors(&node, Direction::Both, true) {
            if !distances.contains_key(&next) {
                distances.insert(next.clone(), depth + 1);
                queue.push_back((next, depth + 1));
            }
        }
    }
    targets
        .iter()
        .filter_map(|t| distances.get(t).map(|d| (t.clone(), *d)))
        .collect()
}

/// Which edge kind(s) a [`PathResult`] is made of (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathType {
    /// Entirely hierarchy edges.
    Hierarchy,
    /// Entirely reference edges.
    Reference,
    /// A mix of hierarchy and reference edges.
    Mixed,
}

/// One discovered path between two nodes (spec §4.9).
#[derive(Debug, Clone)]
pub struct PathResult {
    /// Node ids from source to destination, inclusive.
    pub path: Vec<String>,
    /// Hop count (`path.len() - 1`).
    pub distance: u32,
    /// What kind of edges this path is made of.
    pub path_type: PathType,
}

/// One detected community (spec §4.9).
#[derive(Debug, Clone)]
pub struct Community {
    /// Node ids in this component.
    pub members: Vec<String>,
    /// `internal_edges / C(n, 2)`.
    pub density: f64,
    /// The highest-degree vertex within the component.
    pub central_node: String,
}

/// Sampled centrality metrics for one node (spec §4.9).
#[derive(Debug, Clone, Copy)]
pub struct CentralityReport {
    /// Exact degree (hierarchy + reference neighbors).
    pub degree: usize,
    /// Sampled betweenness fraction over <= 50-vertex pairs.
    pub betweenness: f64,
    /// `reachable / sum_distance` within the sampled set.
    pub closeness: f64,
}
