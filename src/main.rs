//! rust_visium command-line interface

use std::path::{Path, PathBuf};

use clap::Parser;
use log::{info, LevelFilter};

use rust_visium::cli::{Cli, Commands};
use rust_visium::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Find the first non-flag argument (potential subcommand)
    let first_positional = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let subcommands = ["run", "qc", "resolutions", "help"];
    let has_subcommand = first_positional.map_or(false, |a| subcommands.contains(&a.as_str()));

    if !has_subcommand {
        if args.len() == 1 {
            print_no_args();
            return;
        }
        if args.iter().any(|a| a == "--help") {
            print_long_help();
            return;
        }
        if args.iter().any(|a| a == "-h") {
            print_short_help();
            return;
        }
        if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("rust_visium {}", VERSION);
            return;
        }
        print_no_args();
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Run {
            config,
            output,
            active_resolution,
            skip_enrichment,
            top_markers,
            threads,
        }) => run_analysis(
            &config,
            output,
            active_resolution,
            skip_enrichment,
            top_markers,
            threads,
        ),
        Some(Commands::Qc { config, output }) => run_qc(&config, output),
        Some(Commands::Resolutions {
            config,
            output,
            threads,
        }) => run_resolutions(&config, output, threads),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("rust_visium v{}", VERSION);
    println!("Run `rust_visium -h` for usage or `rust_visium --help` for detailed information.");
}

fn print_short_help() {
    println!("rust_visium v{}", VERSION);
    println!();
    println!("Usage: rust_visium <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run          Run the full analysis");
    println!("  qc           Load samples and report QC metrics");
    println!("  resolutions  Cluster at every resolution and print cluster counts");
    println!();
    println!("Run `rust_visium <COMMAND> -h` for command-specific options.");
}

fn print_long_help() {
    println!("rust_visium v{}", VERSION);
    println!("Spatial transcriptomics (10x Visium) analysis pipeline");
    println!();
    println!("Usage: rust_visium <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run          Run the full analysis");
    println!("                 - Log-normalization, variable genes, PCA");
    println!("                 - Harmony integration across samples");
    println!("                 - UMAP and Louvain clustering at several resolutions");
    println!("                 - Wilcoxon cluster markers (top 5/10/50 tables)");
    println!("                 - Gene panel module scores");
    println!("                 - g:Profiler or GMT functional enrichment per cluster");
    println!("  qc           Load samples and report per-spot UMI and gene counts");
    println!("  resolutions  Cluster at every resolution and print cluster counts");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose    Enable verbose output");
    println!("  -h               Print short help");
    println!("      --help       Print detailed help");
    println!("  -V, --version    Print version");
    println!();
    println!("Examples:");
    println!("  rust_visium resolutions -c organoid.toml");
    println!();
    println!("  rust_visium run -c organoid.toml --active-resolution 0.5 -o results");
    println!();
    println!("  rust_visium run -c organoid.toml --skip-enrichment --threads 8");
    println!();
    println!("  rust_visium qc -c organoid.toml -o qc_only");
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn configure_threads(threads: usize) {
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok();
    }
}

fn load_config(path: &Path, output: Option<PathBuf>) -> Result<PipelineConfig> {
    info!("Reading configuration from: {}", path.display());
    let mut config = PipelineConfig::from_path(path)?;
    if let Some(dir) = output {
        config.output_dir = dir;
    }
    Ok(config)
}

fn run_analysis(
    config_path: &Path,
    output: Option<PathBuf>,
    active_resolution: Option<f64>,
    skip_enrichment: bool,
    top_markers: usize,
    threads: usize,
) -> Result<()> {
    configure_threads(threads);

    let mut config = load_config(config_path, output)?;
    if let Some(r) = active_resolution {
        config.active_resolution = r;
    }
    if skip_enrichment {
        config.enrichment.backend = EnrichmentBackendKind::None;
    }
    config.validate()?;

    let layout = OutputLayout::create(&config.output_dir)?;
    let results = run_pipeline(&config, None)?;
    write_outputs(&layout, &results, &config.top_n_values)?;

    println!();
    println!("{}", results.clustering.ladder.summary());
    println!(
        "Active resolution {}: {} clusters",
        results.active.resolution, results.active.n_clusters
    );
    for &cluster in &results.active.cluster_ids() {
        let top: Vec<&str> = results
            .markers
            .top_n(cluster, top_markers)
            .iter()
            .map(|r| r.gene.as_str())
            .collect();
        println!("  cluster {}: {}", cluster, top.join(", "));
    }
    if let Some(report) = &results.enrichment {
        println!();
        print!("{}", report);
        if report.is_partial() {
            println!("Enrichment is partial; failed clusters: {:?}", report.failed_clusters());
        }
    }

    info!("Done!");
    Ok(())
}

fn run_qc(config_path: &Path, output: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path, output)?;
    let dataset = load_dataset(&config)?;
    let qc = compute_qc(&dataset);

    let layout = OutputLayout::create(&config.output_dir)?;
    write_qc(&layout, &dataset, &qc)?;

    println!();
    println!("{}", qc);
    info!("QC tables written to {}", layout.tables.display());
    Ok(())
}

fn run_resolutions(config_path: &Path, output: Option<PathBuf>, threads: usize) -> Result<()> {
    configure_threads(threads);

    let config = load_config(config_path, output)?;
    let clustering = run_until_clustering(&config)?;

    let layout = OutputLayout::create(&config.output_dir)?;
    write_clustering_outputs(&layout, &clustering)?;

    println!();
    println!("{}", clustering.ladder.summary());
    println!(
        "Set `active_resolution` in the configuration (or pass --active-resolution) to continue."
    );
    Ok(())
}
