use std::collections::BTreeMap;

use serde::Serialize;

/// One marker gene of one cluster
#[derive(Debug, Clone, Serialize)]
pub struct MarkerRecord {
    pub gene: String,
    pub cluster: u32,
    pub avg_log2fc: f64,
    pub p_value: f64,
    pub p_value_adj: f64,
    /// Fraction of the cluster's spots with the gene detected
    pub pct_in: f64,
    /// Same fraction for all other spots
    pub pct_out: f64,
}

/// Markers per cluster, each list ranked by fold change (descending), ties
/// by gene name
#[derive(Debug, Clone, Default)]
pub struct MarkerTable {
    by_cluster: BTreeMap<u32, Vec<MarkerRecord>>,
}

impl MarkerTable {
    pub fn new(records: Vec<MarkerRecord>) -> Self {
        let mut by_cluster: BTreeMap<u32, Vec<MarkerRecord>> = BTreeMap::new();
        for record in records {
            by_cluster.entry(record.cluster).or_default().push(record);
        }
        for list in by_cluster.values_mut() {
            list.sort_by(|a, b| {
                crate::stats::cmp_f64(b.avg_log2fc, a.avg_log2fc).then_with(|| a.gene.cmp(&b.gene))
            });
        }
        Self { by_cluster }
    }

    /// Clusters with at least one marker
    pub fn clusters(&self) -> Vec<u32> {
        self.by_cluster.keys().copied().collect()
    }

    /// Ranked markers of `cluster` (empty when it has none)
    pub fn records(&self, cluster: u32) -> &[MarkerRecord] {
        self.by_cluster.get(&cluster).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The first `n` ranked markers of `cluster`
    pub fn top_n(&self, cluster: u32, n: usize) -> &[MarkerRecord] {
        let records = self.records(cluster);
        &records[..n.min(records.len())]
    }

    /// All markers, cluster by cluster
    pub fn iter(&self) -> impl Iterator<Item = &MarkerRecord> {
        self.by_cluster.values().flatten()
    }

    /// Top `n` of every cluster, cluster by cluster
    pub fn top_n_all(&self, n: usize) -> Vec<&MarkerRecord> {
        self.by_cluster
            .keys()
            .flat_map(|&c| self.top_n(c, n).iter())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_cluster.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(gene: &str, cluster: u32, fc: f64) -> MarkerRecord {
        MarkerRecord {
            gene: gene.to_string(),
            cluster,
            avg_log2fc: fc,
            p_value: 0.01,
            p_value_adj: 0.1,
            pct_in: 0.9,
            pct_out: 0.1,
        }
    }

    #[test]
    fn test_ranking_with_name_ties() {
        let table = MarkerTable::new(vec![
            record("KRT5", 0, 1.0),
            record("COL1A1", 1, 2.0),
            record("TP63", 0, 2.5),
            record("KRT14", 0, 1.0),
        ]);
        let genes: Vec<&str> = table.records(0).iter().map(|r| r.gene.as_str()).collect();
        assert_eq!(genes, vec!["TP63", "KRT14", "KRT5"]);
        assert_eq!(table.clusters(), vec![0, 1]);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_top_n_is_prefix() {
        let records = (0..12).map(|i| record(&format!("G{:02}", i), 3, i as f64)).collect();
        let table = MarkerTable::new(records);
        let top = table.top_n(3, 10);
        assert_eq!(top.len(), 10);
        assert_eq!(top[0].gene, "G11");
        assert!(top.windows(2).all(|w| w[0].avg_log2fc >= w[1].avg_log2fc));
        assert_eq!(table.top_n(3, 50).len(), 12);
        assert!(table.top_n(7, 5).is_empty());
        assert_eq!(table.top_n_all(5).len(), 5);
    }
}
