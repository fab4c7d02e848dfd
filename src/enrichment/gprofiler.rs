//! g:Profiler g:GOSt client
//!
//! One POST to `/api/gost/profile/` per cluster. Transport failures are
//! retried with a short linear backoff; anything still failing is returned
//! as an error for the caller to record against that cluster.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{EnrichmentBackend, EnrichmentQuery, EnrichmentTerm};
use crate::error::{Result, SpatialError};
use crate::stats::cmp_f64;

#[derive(Debug, Clone)]
pub struct GProfiler {
    base_url: String,
    timeout: Duration,
    max_retries: usize,
}

#[derive(Debug, Serialize)]
struct GostRequest<'a> {
    organism: &'a str,
    query: &'a [String],
    sources: &'a [String],
    user_threshold: f64,
    ordered: bool,
    significance_threshold_method: &'static str,
    all_results: bool,
    no_evidences: bool,
}

#[derive(Debug, Deserialize)]
struct GostResponse {
    #[serde(default)]
    result: Vec<GostTerm>,
}

#[derive(Debug, Deserialize)]
struct GostTerm {
    native: String,
    name: String,
    source: String,
    p_value: f64,
    #[serde(default)]
    term_size: usize,
    #[serde(default)]
    intersection_size: usize,
    #[serde(default = "default_significant")]
    significant: bool,
}

fn default_significant() -> bool {
    true
}

impl GProfiler {
    pub fn new(base_url: &str, timeout: Duration, max_retries: usize) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            max_retries,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/gost/profile/", self.base_url)
    }

    fn post(&self, request: &GostRequest<'_>) -> Result<GostResponse> {
        let response = ureq::post(&self.endpoint())
            .set("content-type", "application/json")
            .timeout(self.timeout)
            .send_json(request)
            .map_err(|e| failure(e.to_string()))?;
        response
            .into_json()
            .map_err(|e| failure(format!("malformed response: {}", e)))
    }
}

fn failure(reason: String) -> SpatialError {
    SpatialError::Enrichment {
        backend: "gprofiler".to_string(),
        reason,
    }
}

fn terms_from_response(response: GostResponse, query: &EnrichmentQuery) -> Vec<EnrichmentTerm> {
    let mut terms: Vec<GostTerm> = response
        .result
        .into_iter()
        .filter(|t| t.significant && t.p_value <= query.user_threshold)
        .collect();
    terms.sort_by(|a, b| {
        cmp_f64(a.p_value, b.p_value).then_with(|| a.native.cmp(&b.native))
    });
    terms
        .into_iter()
        .enumerate()
        .map(|(i, t)| EnrichmentTerm {
            cluster: query.cluster,
            rank: i + 1,
            term_id: t.native,
            term_name: t.name,
            source: t.source,
            p_value: t.p_value,
            term_size: t.term_size,
            intersection_size: t.intersection_size,
        })
        .collect()
}

impl EnrichmentBackend for GProfiler {
    fn name(&self) -> &str {
        "gprofiler"
    }

    fn enrich(&self, query: &EnrichmentQuery) -> Result<Vec<EnrichmentTerm>> {
        let request = GostRequest {
            organism: &query.organism,
            query: &query.genes,
            sources: &query.sources,
            user_threshold: query.user_threshold,
            ordered: query.ordered,
            significance_threshold_method: "g_SCS",
            all_results: false,
            no_evidences: true,
        };

        let mut attempt = 0;
        loop {
            match self.post(&request) {
                Ok(response) => {
                    let terms = terms_from_response(response, query);
                    log::debug!("Cluster {}: g:Profiler returned {} terms", query.cluster, terms.len());
                    return Ok(terms);
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    log::warn!(
                        "Cluster {}: g:Profiler request failed ({}), retry {}/{}",
                        query.cluster,
                        e,
                        attempt,
                        self.max_retries
                    );
                    thread::sleep(Duration::from_millis(500 * attempt as u64));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
