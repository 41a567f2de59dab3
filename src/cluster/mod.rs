//! Code implementing the IBD clustering pipeline command.
//!
//! One locus run is: filter the IBD file down to the locus, build the
//! weighted haplotype graph, cluster it with refinement, analyze phenotype
//! enrichment, and emit the result records.  Every locus owns its interner,
//! segment list, graph, and cluster set; nothing is shared between loci.

pub mod graph;
pub mod refine;
pub mod walktrap;

use std::{collections::HashSet, path::PathBuf};

use clap::Parser;

use crate::{
    common,
    locus::{read_sliding_windows, Locus, LocusError, LocusReader},
    pheno::{load_cohort, load_descriptions, PhenotypeTable},
    report::{default_stages, StageContext},
    segments::{
        filter::{FilterError, RegionPredicate, SegmentFilter},
        IbdFormat,
    },
};

/// Command line arguments for the clustering run.
#[derive(Parser, Debug)]
pub struct Args {
    /// IBD input file (tab-separated, plain or gzip).
    #[arg(short = 'i', long)]
    pub input: PathBuf,
    /// IBD file format.
    #[arg(short = 'f', long, value_enum, default_value_t = IbdFormat::Hapibd)]
    pub format: IbdFormat,
    /// Target region or position, chr:start-end or chr:pos.
    #[arg(
        short = 't',
        long,
        conflicts_with = "gene_file",
        required_unless_present = "gene_file"
    )]
    pub target: Option<String>,
    /// Locus file with one `name chromosome start end` row per line.
    #[arg(long)]
    pub gene_file: Option<PathBuf>,
    /// Expand the single locus file row into fixed-size sliding windows.
    #[arg(long, requires = "gene_file")]
    pub sliding_window: bool,
    /// Output file prefix.
    #[arg(short = 'o', long)]
    pub output: String,
    /// Minimum centimorgan threshold.
    #[arg(short = 'm', long, default_value_t = 3.0)]
    pub min_cm: f64,
    /// Steps for the random walk.
    #[arg(short = 'k', long, default_value_t = 3)]
    pub step: usize,
    /// Maximum number of times to re-perform the clustering; 0 disables
    /// refinement.
    #[arg(long = "max-recheck", default_value_t = 5)]
    pub max_recheck: usize,
    /// Maximum network size allowed before a sparse cluster is re-clustered.
    #[arg(long, default_value_t = 30)]
    pub max_network_size: usize,
    /// Minimum connectedness ratio required for a network.
    #[arg(long, default_value_t = 0.5)]
    pub min_connected_threshold: f64,
    /// Minimum network size; smaller clusters are filtered out.
    #[arg(long, default_value_t = 2)]
    pub min_network_size: usize,
    /// Keep segments that contain the whole region or any overlapping
    /// segment.
    #[arg(long, value_enum, default_value_t = RegionPredicate::Contains)]
    pub filter: RegionPredicate,
    /// Phenotype case/control matrix.
    #[arg(short = 'c', long = "cases")]
    pub cases: Option<PathBuf>,
    /// Cohort restriction file, one individual id per line.
    #[arg(long)]
    pub cohort: Option<PathBuf>,
    /// Phenotype description lookup file.
    #[arg(long)]
    pub descriptions: Option<PathBuf>,
    /// Share of members a vertex must touch to count as a hub.
    #[arg(long, default_value_t = 0.2)]
    pub segment_distribution_threshold: f64,
    /// Share of members whose connectivity score ranks as hub-grade.
    #[arg(long, default_value_t = 0.01)]
    pub hub_threshold: f64,
    /// Gzip the output files.
    #[arg(long)]
    pub compress_output: bool,
}

/// Immutable tuning knobs of the clustering core.
#[derive(Debug, Clone)]
pub struct Config {
    pub step: usize,
    pub max_rechecks: usize,
    pub max_network_size: usize,
    pub min_connected_threshold: f64,
    pub min_cluster_size: usize,
    pub segment_distribution_threshold: f64,
    pub hub_threshold: f64,
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self {
            step: args.step,
            max_rechecks: args.max_recheck,
            max_network_size: args.max_network_size,
            min_connected_threshold: args.min_connected_threshold,
            min_cluster_size: args.min_network_size,
            segment_distribution_threshold: args.segment_distribution_threshold,
            hub_threshold: args.hub_threshold,
        }
    }
}

impl Config {
    /// The dendrogram cut rule implied by the acceptance limits: a
    /// component that already satisfies them is never split.
    pub fn cut_criteria(&self) -> walktrap::CutCriteria {
        walktrap::CutCriteria {
            min_connected_threshold: self.min_connected_threshold,
            max_network_size: self.max_network_size,
        }
    }
}

/// Error of one locus run; the filter taxonomy is kept visible so the loop
/// can decide which conditions skip to the next locus.
#[derive(thiserror::Error, Debug)]
enum LocusRunError {
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Counters reported per finished locus.
#[derive(Debug, Default)]
struct LocusSummary {
    segments: usize,
    haplotypes: usize,
    clusters: usize,
}

/// Main entry point for the clustering command.
pub fn run(common_args: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("Starting ibd-cluster run");
    tracing::info!("  common_args = {:?}", common_args);
    tracing::info!("  args = {:?}", args);

    let config = Config::from(args);

    let loci: Box<dyn Iterator<Item = Result<Locus, LocusError>>> =
        if let Some(target) = &args.target {
            Box::new(std::iter::once(Locus::parse_target(target)))
        } else {
            let gene_file = args
                .gene_file
                .as_ref()
                .expect("clap enforces target or gene-file");
            if args.sliding_window {
                Box::new(read_sliding_windows(gene_file)?.into_iter().map(Ok))
            } else {
                Box::new(LocusReader::new(gene_file)?)
            }
        };
    // In gene-file mode an empty filter result skips to the next locus; for
    // a single target it is fatal.
    let skip_empty_loci = args.gene_file.is_some();

    let pheno_table = match &args.cases {
        Some(path) => PhenotypeTable::load(path)?,
        None => PhenotypeTable::default(),
    };
    let cohort = args.cohort.as_deref().map(load_cohort).transpose()?;
    let descriptions = args
        .descriptions
        .as_deref()
        .map(load_descriptions)
        .transpose()?
        .unwrap_or_default();

    for locus in loci {
        let locus = locus?;
        tracing::info!(
            "processing locus {} ({}:{}-{})",
            locus.name,
            locus.chromosome,
            locus.start,
            locus.end
        );
        match run_locus(
            &locus,
            args,
            &config,
            &pheno_table,
            cohort.as_ref(),
            &descriptions,
        ) {
            Ok(summary) => {
                tracing::info!(
                    "locus {}: {} clusters from {} segments over {} haplotypes",
                    locus.name,
                    summary.clusters,
                    summary.segments,
                    summary.haplotypes
                );
            }
            Err(LocusRunError::Filter(FilterError::EmptyFilter(_))) if skip_empty_loci => {
                tracing::warn!(
                    "locus {}: no IBD segments satisfied the filter conditions, skipping",
                    locus.name
                );
            }
            Err(LocusRunError::Filter(e)) => return Err(e.into()),
            Err(LocusRunError::Other(e)) => return Err(e),
        }
    }

    tracing::info!("All done. Have a nice day!");
    Ok(())
}

/// Run the full pipeline for one locus.
fn run_locus(
    locus: &Locus,
    args: &Args,
    config: &Config,
    pheno_table: &PhenotypeTable,
    cohort: Option<&HashSet<String>>,
    descriptions: &std::collections::HashMap<String, String>,
) -> Result<LocusSummary, LocusRunError> {
    let filtered = SegmentFilter::new(locus, args.format, args.filter, args.min_cm)
        .with_cohort(cohort)
        .run(&args.input)?;

    let graph = graph::build_graph(&filtered);
    let clusters = refine::find_clusters(&graph, config);

    let mut context = StageContext {
        locus,
        clusters: &clusters,
        segments: &filtered.segments,
        pheno_table,
        descriptions,
        output_prefix: &args.output,
        compress: args.compress_output,
        analyses: Vec::new(),
    };
    for stage in default_stages() {
        stage.run(&mut context).map_err(LocusRunError::Other)?;
    }

    Ok(LocusSummary {
        segments: filtered.segments.len(),
        haplotypes: filtered.interner.len(),
        clusters: clusters.len(),
    })
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use crate::common::Args as CommonArgs;
    use crate::segments::{filter::RegionPredicate, IbdFormat};

    use super::{run, Args};

    /// All haplotype pairs among `haps` as hap-IBD rows over the locus.
    fn clique_rows(haps: &[(&str, &str)]) -> Vec<String> {
        let mut rows = Vec::new();
        for (i, &(iid1, phase1)) in haps.iter().enumerate() {
            for &(iid2, phase2) in &haps[i + 1..] {
                rows.push(format!(
                    "{iid1}\t{phase1}\t{iid2}\t{phase2}\t7\t500\t2500\t5.0"
                ));
            }
        }
        rows
    }

    fn args(input: PathBuf, output: String) -> Args {
        Args {
            input,
            format: IbdFormat::Hapibd,
            target: Some("7:1000-2000".to_string()),
            gene_file: None,
            sliding_window: false,
            output,
            min_cm: 3.0,
            step: 3,
            max_recheck: 0,
            max_network_size: 30,
            min_connected_threshold: 0.5,
            min_network_size: 2,
            filter: RegionPredicate::Contains,
            cases: None,
            cohort: None,
            descriptions: None,
            segment_distribution_threshold: 0.2,
            hub_threshold: 0.01,
            compress_output: false,
        }
    }

    #[test]
    fn two_cliques_end_to_end() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let input = tmp_dir.path().join("input.ibd");
        let mut rows = clique_rows(&[
            ("a", "1"),
            ("a", "2"),
            ("b", "1"),
            ("b", "2"),
            ("c", "1"),
            ("c", "2"),
        ]);
        rows.extend(clique_rows(&[("d", "1"), ("d", "2"), ("e", "1")]));
        std::fs::write(&input, rows.join("\n") + "\n")?;
        let prefix = tmp_dir.path().join("out").to_string_lossy().to_string();

        run(&CommonArgs::default(), &args(input, prefix.clone()))?;

        let networks = std::fs::read_to_string(format!("{prefix}.7_1000-2000.networks.tsv"))?;
        let lines = networks.lines().collect::<Vec<_>>();
        assert_eq!(lines[1], "## 18 IBD segments from 9 haplotypes");
        assert_eq!(lines[2], "## Identified 2 IBD clusters");
        // comment lines + header + two cluster rows
        assert_eq!(lines.len(), 6);
        let first = lines[4].split('\t').collect::<Vec<_>>();
        let second = lines[5].split('\t').collect::<Vec<_>>();
        assert_eq!(first[0], "clst0");
        assert_eq!(first[6], "6");
        assert_eq!(first[8], "1.0000");
        assert_eq!(second[0], "clst1");
        assert_eq!(second[6], "3");
        assert_eq!(second[8], "1.0000");
        assert_eq!(second[10], "d,e");

        let allpairs = std::fs::read_to_string(format!("{prefix}.7_1000-2000.allpairs.tsv"))?;
        // header + 15 pairs in the six-clique + 3 pairs in the three-clique
        assert_eq!(allpairs.lines().count(), 19);

        Ok(())
    }

    #[test]
    fn single_pair_with_caseless_phenotype() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let input = tmp_dir.path().join("input.ibd");
        std::fs::write(&input, "a\t1\tb\t1\t7\t500\t2500\t5.0\n")?;
        let cases = tmp_dir.path().join("phenotypes.tsv");
        std::fs::write(&cases, "grid\tN\na\t0\nb\t0\n")?;
        let prefix = tmp_dir.path().join("out").to_string_lossy().to_string();

        let mut args = args(input, prefix.clone());
        args.min_network_size = 1;
        args.cases = Some(cases);
        run(&CommonArgs::default(), &args)?;

        let networks = std::fs::read_to_string(format!("{prefix}.7_1000-2000.networks.tsv"))?;
        let row = networks.lines().nth(4).unwrap().split('\t').collect::<Vec<_>>();
        assert_eq!(row[5], "2"); // individuals
        assert_eq!(row[6], "2"); // haplotypes
        assert_eq!(row[8], "1.0000");
        // zero carriers: pvalue 1 and no minimum phenotype
        assert_eq!(&row[12..15], &["0", "0", "1"]);
        assert_eq!(&row[15..18], &["N/A", "N/A", "N/A"]);

        Ok(())
    }

    #[test]
    fn wrong_chromosome_terminates_the_run() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let input = tmp_dir.path().join("input.ibd");
        std::fs::write(&input, "a\t1\tb\t1\t8\t500\t2500\t5.0\n")?;
        let prefix = tmp_dir.path().join("out").to_string_lossy().to_string();

        let result = run(&CommonArgs::default(), &args(input, prefix));
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("never observed"));

        Ok(())
    }

    #[test]
    fn empty_filter_is_fatal_for_single_target() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let input = tmp_dir.path().join("input.ibd");
        std::fs::write(&input, "a\t1\tb\t1\t7\t500\t2500\t1.0\n")?;
        let prefix = tmp_dir.path().join("out").to_string_lossy().to_string();

        let result = run(&CommonArgs::default(), &args(input, prefix));
        assert!(result.is_err());

        Ok(())
    }

    #[test]
    fn gene_file_mode_skips_empty_loci() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let input = tmp_dir.path().join("input.ibd");
        std::fs::write(&input, "a\t1\tb\t1\t7\t500\t2500\t5.0\n")?;
        let gene_file = tmp_dir.path().join("loci.txt");
        // the first locus lies outside every segment, the second inside
        std::fs::write(&gene_file, "EMPTY 7 900000 901000\nHIT 7 1000 2000\n")?;
        let prefix = tmp_dir.path().join("out").to_string_lossy().to_string();

        let mut args = args(input, prefix.clone());
        args.target = None;
        args.gene_file = Some(gene_file);
        args.min_network_size = 1;
        run(&CommonArgs::default(), &args)?;

        assert!(!std::path::Path::new(&format!("{prefix}.EMPTY.networks.tsv")).exists());
        let networks = std::fs::read_to_string(format!("{prefix}.HIT.networks.tsv"))?;
        assert_eq!(networks.lines().count(), 5);

        Ok(())
    }

    #[test]
    fn sliding_window_gene_file_produces_window_outputs() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let input = tmp_dir.path().join("input.ibd");
        std::fs::write(&input, "a\t1\tb\t1\t7\t500\t4000\t5.0\n")?;
        let gene_file = tmp_dir.path().join("loci.txt");
        std::fs::write(&gene_file, "L 7 1000 3500\n")?;
        let prefix = tmp_dir.path().join("out").to_string_lossy().to_string();

        let mut args = args(input, prefix.clone());
        args.target = None;
        args.gene_file = Some(gene_file);
        args.sliding_window = true;
        args.min_network_size = 1;
        run(&CommonArgs::default(), &args)?;

        for window in ["L_1000-2000", "L_2000-3000", "L_3000-3500"] {
            assert!(
                std::path::Path::new(&format!("{prefix}.{window}.networks.tsv")).exists(),
                "missing output for window {window}"
            );
        }

        Ok(())
    }
}
