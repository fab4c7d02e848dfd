//! Statistical tests and multiple-testing adjustment

mod fdr;
mod pvalue;
mod wilcoxon;

pub use fdr::{benjamini_hochberg, bonferroni};
pub use pvalue::normal_two_sided;
pub use wilcoxon::{wilcoxon_rank_sum, GeneRanks};
