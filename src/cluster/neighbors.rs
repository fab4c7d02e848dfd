//! Exact nearest neighbors and the shared-nearest-neighbor graph

use std::collections::HashMap;

use ndarray::ArrayView2;
use rayon::prelude::*;

use crate::error::{Result, SpatialError};

/// Neighbor lists in increasing distance order
#[derive(Debug, Clone)]
pub struct NeighborLists {
    pub indices: Vec<Vec<usize>>,
    pub distances: Vec<Vec<f64>>,
}

/// Brute-force Euclidean k-nearest neighbors over the rows of `data`.
///
/// With `include_self` the point itself is the first neighbor, so each list
/// holds `k` entries in total; otherwise the point is skipped and `k` other
/// points are returned. Distance ties are broken by index.
pub fn knn(data: ArrayView2<f64>, k: usize, include_self: bool) -> Result<NeighborLists> {
    let n = data.nrows();
    let available = if include_self { n } else { n.saturating_sub(1) };
    if k == 0 || k > available {
        return Err(SpatialError::parameter(
            "neighbor_k",
            format!("{} neighbors requested for {} points", k, n),
        ));
    }

    let rows: Vec<(Vec<usize>, Vec<f64>)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let ri = data.row(i);
            let mut dists: Vec<(usize, f64)> = (0..n)
                .filter(|&j| include_self || j != i)
                .map(|j| {
                    let d2: f64 = ri
                        .iter()
                        .zip(data.row(j).iter())
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum();
                    (j, if j == i { 0.0 } else { d2.sqrt() })
                })
                .collect();
            dists.sort_by(|a, b| {
                crate::stats::cmp_f64(a.1, b.1)
                    .then_with(|| (a.0 != i).cmp(&(b.0 != i)))
                    .then_with(|| a.0.cmp(&b.0))
            });
            dists.truncate(k);
            dists.into_iter().unzip()
        })
        .collect();

    let (indices, distances) = rows.into_iter().unzip();
    Ok(NeighborLists { indices, distances })
}

/// Undirected weighted graph without self loops, stored as adjacency lists
#[derive(Debug, Clone)]
pub struct SnnGraph {
    adjacency: Vec<Vec<(usize, f64)>>,
}

impl SnnGraph {
    pub fn from_adjacency(adjacency: Vec<Vec<(usize, f64)>>) -> Self {
        Self { adjacency }
    }

    pub fn n_nodes(&self) -> usize {
        self.adjacency.len()
    }

    pub fn n_edges(&self) -> usize {
        self.adjacency.iter().map(|a| a.len()).sum::<usize>() / 2
    }

    pub fn neighbors(&self, node: usize) -> &[(usize, f64)] {
        &self.adjacency[node]
    }

    pub fn total_weight(&self) -> f64 {
        self.adjacency
            .iter()
            .flat_map(|a| a.iter().map(|&(_, w)| w))
            .sum::<f64>()
            / 2.0
    }

    pub fn weight(&self, a: usize, b: usize) -> f64 {
        self.adjacency[a]
            .iter()
            .find(|&&(j, _)| j == b)
            .map(|&(_, w)| w)
            .unwrap_or(0.0)
    }
}

/// Shared-nearest-neighbor graph on the rows of `embedding`.
///
/// Each spot's neighborhood is its `k` nearest spots including itself. Two
/// spots are connected with the Jaccard overlap of their neighborhoods,
/// `|A ∩ B| / (2k - |A ∩ B|)`; edges below `prune` are dropped.
pub fn build_snn_graph(embedding: ArrayView2<f64>, k: usize, prune: f64) -> Result<SnnGraph> {
    let nn = knn(embedding, k, true)?;
    let n = nn.indices.len();

    let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, list) in nn.indices.iter().enumerate() {
        for &j in list {
            reverse[j].push(i);
        }
    }

    let kf = k as f64;
    let adjacency: Vec<Vec<(usize, f64)>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut shared: HashMap<usize, usize> = HashMap::new();
            for &j in &nn.indices[i] {
                for &l in &reverse[j] {
                    if l != i {
                        *shared.entry(l).or_insert(0) += 1;
                    }
                }
            }
            let mut edges: Vec<(usize, f64)> = shared
                .into_iter()
                .map(|(l, c)| {
                    let c = c as f64;
                    (l, c / (2.0 * kf - c))
                })
                .filter(|&(_, w)| w >= prune)
                .collect();
            edges.sort_by_key(|&(l, _)| l);
            edges
        })
        .collect();

    let graph = SnnGraph { adjacency };
    log::info!(
        "SNN graph: {} spots, {} edges (k = {}, prune < {:.4})",
        n,
        graph.n_edges(),
        k,
        prune
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_knn_includes_self_first() {
        let data = array![[0.0, 0.0], [1.0, 0.0], [5.0, 0.0], [1.5, 0.0]];
        let nn = knn(data.view(), 3, true).unwrap();
        assert_eq!(nn.indices[0], vec![0, 1, 3]);
        assert_eq!(nn.indices[2], vec![2, 3, 1]);
        assert_eq!(nn.distances[0][0], 0.0);

        let nn = knn(data.view(), 2, false).unwrap();
        assert_eq!(nn.indices[1], vec![3, 0]);
    }

    #[test]
    fn test_knn_too_many_neighbors() {
        let data = array![[0.0], [1.0]];
        assert!(knn(data.view(), 3, true).is_err());
        assert!(knn(data.view(), 2, false).is_err());
    }

    #[test]
    fn test_snn_weights_and_pruning() {
        // two tight groups of three on a line
        let data = array![[0.0], [0.1], [0.2], [10.0], [10.1], [10.2]];
        let graph = build_snn_graph(data.view(), 3, 1.0 / 15.0).unwrap();
        // within a group all three neighborhoods coincide: 3 / (6 - 3) = 1
        assert!((graph.weight(0, 1) - 1.0).abs() < 1e-12);
        assert!((graph.weight(1, 2) - 1.0).abs() < 1e-12);
        // no shared neighbors across groups
        assert_eq!(graph.weight(2, 3), 0.0);
        assert_eq!(graph.n_edges(), 6);
        assert!(graph.neighbors(0).iter().all(|&(j, _)| j != 0));
    }

    #[test]
    fn test_snn_is_symmetric() {
        let data = array![[0.0, 1.0], [0.3, 0.8], [1.0, 0.1], [2.0, 2.0], [2.1, 1.7], [0.9, 0.5]];
        let graph = build_snn_graph(data.view(), 3, 0.0).unwrap();
        for a in 0..6 {
            for &(b, w) in graph.neighbors(a) {
                assert!((graph.weight(b, a) - w).abs() < 1e-12);
            }
        }
    }
}
