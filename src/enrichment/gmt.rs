//! Offline over-representation analysis against a GMT gene-set collection

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use statrs::function::factorial::ln_binomial;

use super::{EnrichmentBackend, EnrichmentQuery, EnrichmentTerm};
use crate::error::{Result, SpatialError};
use crate::stats::cmp_f64;
use crate::testing::benjamini_hochberg;

#[derive(Debug, Clone)]
pub struct GeneSet {
    pub id: String,
    pub name: String,
    pub genes: HashSet<String>,
}

/// Hypergeometric test of each query against every gene set.
///
/// The universe defaults to the union of all set members and can be narrowed
/// to the genes actually measured with [`GmtBackend::with_universe`]. Ordered
/// queries take the best p-value over all prefixes of the ranked list.
#[derive(Debug, Clone)]
pub struct GmtBackend {
    sets: Vec<GeneSet>,
    universe: HashSet<String>,
    source: String,
}

impl GmtBackend {
    pub fn new(sets: Vec<GeneSet>, source: &str) -> Self {
        let universe = sets.iter().flat_map(|s| s.genes.iter().cloned()).collect();
        Self {
            sets,
            universe,
            source: source.to_string(),
        }
    }

    /// Read `id<TAB>description<TAB>gene...` lines
    pub fn from_path<P: AsRef<Path>>(path: P, source: &str) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut sets = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 3 {
                return Err(SpatialError::InvalidInput {
                    reason: format!("{}:{}: GMT line needs an id, a description and genes", path.display(), i + 1),
                });
            }
            let name = if fields[1].is_empty() || fields[1].starts_with("http") {
                fields[0]
            } else {
                fields[1]
            };
            sets.push(GeneSet {
                id: fields[0].to_string(),
                name: name.to_string(),
                genes: fields[2..].iter().filter(|g| !g.is_empty()).map(|g| g.to_string()).collect(),
            });
        }
        if sets.is_empty() {
            return Err(SpatialError::EmptyData {
                reason: format!("no gene sets in {}", path.display()),
            });
        }
        log::info!("Loaded {} gene sets from {}", sets.len(), path.display());
        Ok(Self::new(sets, source))
    }

    /// Restrict the universe to the given genes; ignored when empty
    pub fn with_universe(mut self, genes: &[String]) -> Self {
        if !genes.is_empty() {
            self.universe = genes.iter().cloned().collect();
        }
        self
    }

    pub fn n_sets(&self) -> usize {
        self.sets.len()
    }
}

/// P(X >= x) for X ~ Hypergeometric(population, successes, draws)
pub fn hypergeometric_upper(x: u64, population: u64, successes: u64, draws: u64) -> f64 {
    if x == 0 {
        return 1.0;
    }
    let hi = successes.min(draws);
    if x > hi {
        return 0.0;
    }
    let denom = ln_binomial(population, draws);
    let terms: Vec<f64> = (x..=hi)
        .filter(|&i| draws - i <= population - successes)
        .map(|i| ln_binomial(successes, i) + ln_binomial(population - successes, draws - i) - denom)
        .collect();
    let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return 0.0;
    }
    let sum: f64 = terms.iter().map(|t| (t - max).exp()).sum();
    (max + sum.ln()).exp().min(1.0)
}

struct SetHit {
    set: usize,
    p_value: f64,
    term_size: usize,
    intersection: usize,
}

impl EnrichmentBackend for GmtBackend {
    fn name(&self) -> &str {
        "gmt"
    }

    fn enrich(&self, query: &EnrichmentQuery) -> Result<Vec<EnrichmentTerm>> {
        let genes: Vec<&String> = query.genes.iter().filter(|g| self.universe.contains(*g)).collect();
        if genes.is_empty() {
            return Err(SpatialError::Enrichment {
                backend: "gmt".to_string(),
                reason: format!("none of the {} query genes are in the universe", query.genes.len()),
            });
        }
        let population = self.universe.len() as u64;

        let mut hits = Vec::new();
        for (idx, set) in self.sets.iter().enumerate() {
            let term_size = set.genes.iter().filter(|g| self.universe.contains(*g)).count();
            if term_size == 0 {
                continue;
            }
            let prefixes: Vec<usize> = if query.ordered {
                (1..=genes.len()).collect()
            } else {
                vec![genes.len()]
            };
            let mut best: Option<(f64, usize)> = None;
            let mut overlap = 0usize;
            let mut counted = 0usize;
            for m in prefixes {
                while counted < m {
                    if set.genes.contains(genes[counted]) {
                        overlap += 1;
                    }
                    counted += 1;
                }
                if overlap == 0 {
                    continue;
                }
                let p = hypergeometric_upper(overlap as u64, population, term_size as u64, m as u64);
                if best.map_or(true, |(bp, _)| p < bp) {
                    best = Some((p, overlap));
                }
            }
            if let Some((p_value, intersection)) = best {
                hits.push(SetHit {
                    set: idx,
                    p_value,
                    term_size,
                    intersection,
                });
            }
        }

        let raw: Vec<f64> = hits.iter().map(|h| h.p_value).collect();
        let adjusted = benjamini_hochberg(&raw);
        let mut kept: Vec<(f64, &SetHit)> = adjusted
            .into_iter()
            .zip(hits.iter())
            .filter(|(p, _)| *p <= query.user_threshold)
            .collect();
        kept.sort_by(|a, b| {
            cmp_f64(a.0, b.0).then_with(|| self.sets[a.1.set].id.cmp(&self.sets[b.1.set].id))
        });

        log::debug!(
            "Cluster {}: {} of {} tested sets significant",
            query.cluster,
            kept.len(),
            hits.len()
        );

        Ok(kept
            .into_iter()
            .enumerate()
            .map(|(i, (p, hit))| EnrichmentTerm {
                cluster: query.cluster,
                rank: i + 1,
                term_id: self.sets[hit.set].id.clone(),
                term_name: self.sets[hit.set].name.clone(),
                source: self.source.clone(),
                p_value: p,
                term_size: hit.term_size,
                intersection_size: hit.intersection,
            })
            .collect())
    }
}
