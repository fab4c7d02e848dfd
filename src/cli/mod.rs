//! Command-line interface for rust_visium

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rust_visium")]
#[command(version)]
#[command(about = "Spatial transcriptomics (10x Visium) analysis pipeline")]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full analysis
    #[command(
        about = "Run the full analysis",
        long_about = "Run the full analysis\n\n\
            Loads every sample in the configuration, reports QC, normalizes and\n\
            reduces the data, removes sample effects with Harmony, clusters spots\n\
            at every configured resolution, then finds markers, scores gene panels\n\
            and runs functional enrichment at the active resolution.",
        after_long_help = "\
Examples:
  # Full run with the settings from the configuration file
  rust_visium run -c organoid.toml

  # Choose the active resolution after inspecting `rust_visium resolutions`
  rust_visium run -c organoid.toml --active-resolution 0.3 -o results_r03

  # Offline run without the enrichment service
  rust_visium run -c organoid.toml --skip-enrichment --threads 8"
    )]
    Run {
        /// Path to the configuration file (TOML or JSON)
        #[arg(short, long,
            long_help = "Path to the configuration file.\n\
                TOML by default; files ending in .json are read as JSON.\n\
                Relative sample paths are resolved against `root_path`.")]
        config: PathBuf,

        /// Output directory [default: from configuration]
        #[arg(short, long,
            long_help = "Output directory.\n\
                Tables are written to <DIR>/tables and an empty <DIR>/figures is created.\n\
                Overrides `output_dir` from the configuration.")]
        output: Option<PathBuf>,

        /// Resolution used for markers, scores and enrichment
        #[arg(long, value_name = "R",
            long_help = "Resolution used for markers, module scores and enrichment.\n\
                Must be one of the configured `resolutions`.\n\
                Overrides `active_resolution` from the configuration.")]
        active_resolution: Option<f64>,

        /// Do not run functional enrichment
        #[arg(long)]
        skip_enrichment: bool,

        /// Markers per cluster printed in the run summary
        #[arg(long, value_name = "N", default_value = "5",
            long_help = "Markers per cluster printed in the run summary.\n\
                Marker tables are still written for every value of `top_n_values`.")]
        top_markers: usize,

        /// Number of threads [default: 0 = all cores]
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Load samples and report quality-control metrics only
    #[command(
        about = "Load samples and report quality-control metrics",
        long_about = "Load samples and report quality-control metrics\n\n\
            Reads every sample, merges them onto a shared gene vocabulary and\n\
            writes per-spot and per-sample UMI and gene counts. No spot is removed."
    )]
    Qc {
        /// Path to the configuration file (TOML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory [default: from configuration]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Cluster at every resolution and print the cluster counts
    #[command(
        about = "Cluster at every resolution and print the cluster counts",
        long_about = "Cluster at every resolution and print the cluster counts\n\n\
            Runs the pipeline through multi-resolution clustering and prints the\n\
            number of clusters and modularity per resolution, the diagnostic used\n\
            to choose `active_resolution`. Clustering tables are written as well."
    )]
    Resolutions {
        /// Path to the configuration file (TOML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory [default: from configuration]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of threads [default: 0 = all cores]
        #[arg(long, default_value = "0")]
        threads: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "rust_visium",
            "run",
            "-c",
            "organoid.toml",
            "--active-resolution",
            "0.3",
            "--skip-enrichment",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Some(Commands::Run {
                config,
                output,
                active_resolution,
                skip_enrichment,
                top_markers,
                threads,
            }) => {
                assert_eq!(config, PathBuf::from("organoid.toml"));
                assert!(output.is_none());
                assert_eq!(active_resolution, Some(0.3));
                assert!(skip_enrichment);
                assert_eq!(top_markers, 5);
                assert_eq!(threads, 0);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_top_markers() {
        let cli = Cli::try_parse_from(["rust_visium", "run", "-c", "o.toml", "--top-markers", "10"]).unwrap();
        match cli.command {
            Some(Commands::Run { top_markers, .. }) => assert_eq!(top_markers, 10),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_config_is_required() {
        assert!(Cli::try_parse_from(["rust_visium", "qc"]).is_err());
    }
}
