//! Multi-level Louvain modularity optimisation
//!
//! Each level moves nodes, in a random order, to the neighbouring community
//! with the largest modularity gain `k_i,in - γ k_i Σ_tot / 2m` until no move
//! improves; communities are then collapsed into nodes and the next level
//! runs on the aggregated graph. A run is repeated `n_iterations` times from
//! its own result and the whole procedure from `n_starts` random starts; the
//! partition with the highest modularity wins.

use serde::{Deserialize, Serialize};

use super::neighbors::SnnGraph;
use crate::error::{Result, SpatialError};
use crate::rng::RMersenneTwister;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LouvainParams {
    pub n_starts: usize,
    pub n_iterations: usize,
    pub seed: u32,
}

impl Default for LouvainParams {
    fn default() -> Self {
        Self {
            n_starts: 10,
            n_iterations: 10,
            seed: 0,
        }
    }
}

impl LouvainParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_starts == 0 {
            return Err(SpatialError::parameter("louvain.n_starts", "must be at least 1"));
        }
        if self.n_iterations == 0 {
            return Err(SpatialError::parameter("louvain.n_iterations", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LouvainResult {
    /// Community per node, 0 = largest
    pub labels: Vec<u32>,
    pub n_clusters: usize,
    pub modularity: f64,
}

/// Weighted graph with explicit self-loop weights (needed after aggregation)
#[derive(Debug, Clone)]
struct WorkGraph {
    adjacency: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
    degree: Vec<f64>,
    two_m: f64,
}

impl WorkGraph {
    fn new(adjacency: Vec<Vec<(usize, f64)>>, self_loops: Vec<f64>) -> Self {
        let degree: Vec<f64> = adjacency
            .iter()
            .zip(self_loops.iter())
            .map(|(adj, s)| adj.iter().map(|&(_, w)| w).sum::<f64>() + 2.0 * s)
            .collect();
        let two_m = degree.iter().sum();
        Self {
            adjacency,
            self_loops,
            degree,
            two_m,
        }
    }

    fn from_snn(graph: &SnnGraph) -> Self {
        let n = graph.n_nodes();
        let adjacency = (0..n).map(|i| graph.neighbors(i).to_vec()).collect();
        Self::new(adjacency, vec![0.0; n])
    }

    fn n(&self) -> usize {
        self.adjacency.len()
    }

    fn modularity(&self, community: &[usize], resolution: f64) -> f64 {
        if self.two_m <= 0.0 {
            return 0.0;
        }
        let n_comm = community.iter().copied().max().map_or(0, |m| m + 1);
        let mut internal = vec![0.0; n_comm];
        let mut total = vec![0.0; n_comm];
        for i in 0..self.n() {
            let c = community[i];
            total[c] += self.degree[i];
            internal[c] += 2.0 * self.self_loops[i];
            for &(j, w) in &self.adjacency[i] {
                if community[j] == c {
                    internal[c] += w;
                }
            }
        }
        internal
            .iter()
            .zip(total.iter())
            .map(|(&inn, &tot)| inn / self.two_m - resolution * (tot / self.two_m).powi(2))
            .sum()
    }

    /// Collapse communities (numbered 0..n_comm) into nodes
    fn aggregate(&self, community: &[usize], n_comm: usize) -> WorkGraph {
        let mut self_loops = vec![0.0; n_comm];
        let mut maps: Vec<std::collections::BTreeMap<usize, f64>> =
            vec![std::collections::BTreeMap::new(); n_comm];
        for i in 0..self.n() {
            let ci = community[i];
            self_loops[ci] += self.self_loops[i];
            for &(j, w) in &self.adjacency[i] {
                let cj = community[j];
                if ci == cj {
                    // each internal edge is seen from both ends
                    self_loops[ci] += w / 2.0;
                } else {
                    *maps[ci].entry(cj).or_insert(0.0) += w;
                }
            }
        }
        let adjacency = maps.into_iter().map(|m| m.into_iter().collect()).collect();
        WorkGraph::new(adjacency, self_loops)
    }

    /// Local moving phase; returns whether any node changed community
    fn move_nodes(&self, community: &mut [usize], resolution: f64, rng: &mut RMersenneTwister) -> bool {
        let n = self.n();
        let mut total = vec![0.0; n];
        for i in 0..n {
            total[community[i]] += self.degree[i];
        }

        let mut weight_to = vec![0.0; n];
        let mut touched: Vec<usize> = Vec::new();
        let mut any_move = false;
        loop {
            let order = rng.permutation(n);
            let mut moved = false;
            for &i in &order {
                let current = community[i];
                let k_i = self.degree[i];
                total[current] -= k_i;

                for &c in &touched {
                    weight_to[c] = 0.0;
                }
                touched.clear();
                for &(j, w) in &self.adjacency[i] {
                    let c = community[j];
                    if weight_to[c] == 0.0 {
                        touched.push(c);
                    }
                    weight_to[c] += w;
                }

                let gain = |c: usize| weight_to[c] - resolution * k_i * total[c] / self.two_m;
                let mut best = current;
                let mut best_gain = gain(current);
                for &c in &touched {
                    let g = gain(c);
                    if g > best_gain + 1e-12 {
                        best = c;
                        best_gain = g;
                    }
                }

                total[best] += k_i;
                if best != current {
                    community[i] = best;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
            any_move = true;
        }
        any_move
    }
}

/// Renumber to 0..n_comm in order of first appearance
fn compact(community: &mut [usize]) -> usize {
    let mut map = std::collections::HashMap::new();
    for c in community.iter_mut() {
        let next = map.len();
        *c = *map.entry(*c).or_insert(next);
    }
    map.len()
}

/// One multi-level pass starting from `initial` on the original graph
fn multilevel(base: &WorkGraph, initial: &[usize], resolution: f64, rng: &mut RMersenneTwister) -> Vec<usize> {
    let mut membership = initial.to_vec();
    let n_comm = compact(&mut membership);
    let mut graph = base.aggregate(&membership, n_comm);

    loop {
        let mut community: Vec<usize> = (0..graph.n()).collect();
        if !graph.move_nodes(&mut community, resolution, rng) {
            break;
        }
        let n_comm = compact(&mut community);
        for m in membership.iter_mut() {
            *m = community[*m];
        }
        graph = graph.aggregate(&community, n_comm);
        if n_comm <= 1 {
            break;
        }
    }
    membership
}

/// Louvain clustering of `graph` at the given resolution
pub fn louvain(graph: &SnnGraph, resolution: f64, params: &LouvainParams) -> Result<LouvainResult> {
    params.validate()?;
    if !(resolution > 0.0) {
        return Err(SpatialError::parameter("resolution", "must be positive"));
    }
    let base = WorkGraph::from_snn(graph);
    let n = base.n();
    if n == 0 {
        return Err(SpatialError::EmptyData {
            reason: "cannot cluster an empty graph".to_string(),
        });
    }

    let singletons: Vec<usize> = (0..n).collect();
    if base.two_m <= 0.0 {
        log::warn!("Graph has no edges; every spot is its own cluster");
        return Ok(finish(singletons, 0.0));
    }

    let mut rng = RMersenneTwister::new(params.seed);
    let mut best: Option<(Vec<usize>, f64)> = None;
    for start in 0..params.n_starts {
        let mut membership = singletons.clone();
        let mut q = f64::NEG_INFINITY;
        for _ in 0..params.n_iterations {
            let next = multilevel(&base, &membership, resolution, &mut rng);
            let next_q = base.modularity(&next, resolution);
            if next_q <= q + 1e-12 {
                break;
            }
            membership = next;
            q = next_q;
        }
        log::debug!("Louvain start {}: modularity {:.6} (resolution {})", start + 1, q, resolution);
        if best.as_ref().map_or(true, |(_, bq)| q > *bq + 1e-12) {
            best = Some((membership, q));
        }
    }

    let (membership, q) = best.unwrap_or((singletons, 0.0));
    Ok(finish(membership, q))
}

/// Relabel so that 0 is the largest community; equal sizes keep first-appearance order
fn finish(mut membership: Vec<usize>, modularity: f64) -> LouvainResult {
    let n_comm = compact(&mut membership);
    let mut sizes = vec![0usize; n_comm];
    for &c in &membership {
        sizes[c] += 1;
    }
    let mut order: Vec<usize> = (0..n_comm).collect();
    order.sort_by(|&a, &b| sizes[b].cmp(&sizes[a]).then(a.cmp(&b)));
    let mut rank = vec![0u32; n_comm];
    for (r, &c) in order.iter().enumerate() {
        rank[c] = r as u32;
    }
    LouvainResult {
        labels: membership.iter().map(|&c| rank[c]).collect(),
        n_clusters: n_comm,
        modularity,
    }
}
