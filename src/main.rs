//! IBD-cluster main executable

pub mod cluster;
pub mod common;
pub mod locus;
pub mod pheno;
pub mod report;
pub mod segments;

use clap::Parser;

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Cluster IBD haplotypes over target loci",
    long_about = "This tool identifies networks of individuals that share IBD haplotype \
                  segments across a target locus and computes per-network phenotype enrichment"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// Arguments of the clustering run
    #[command(flatten)]
    args: cluster::Args,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // clap-verbosity-flag reports the chosen level as a `log` filter; hand
    // it to tracing by name so the two level scales stay aligned (this also
    // maps `-q`'s "off" to a fully silent subscriber).
    let max_level = cli
        .common
        .verbose
        .log_level_filter()
        .to_string()
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(max_level)
        .compact()
        .finish();

    // Install collector and run the command.
    tracing::subscriber::with_default(collector, || cluster::run(&cli.common, &cli.args))?;

    Ok(())
}
