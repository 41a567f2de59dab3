//! Typed result records and the post-cluster stages that emit them.
//!
//! Stages run in a fixed compile-time order over the cluster set and the
//! phenotype table: the enrichment stage fills in per-cluster analyses, the
//! network writer emits one row per final cluster, the all-pair writer one
//! row per retained segment inside a cluster.

use std::{collections::HashMap, io::Write};

use crate::{
    cluster::refine::Cluster,
    common::io::{open_write_maybe_gz, tsv_writer},
    locus::Locus,
    pheno::{
        analysis::{analyze_cluster, ClusterAnalysis, MinPvalue},
        PhenotypeTable,
    },
    segments::Segment,
};

/// A post-cluster stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Stage {
    /// Compute phenotype enrichment per cluster.
    Pvalues,
    /// Write the per-cluster network file.
    NetworkWriter,
    /// Write the per-pair traceability file.
    AllpairWriter,
}

/// The stages of a default run, in execution order.
pub fn default_stages() -> Vec<Stage> {
    vec![Stage::Pvalues, Stage::NetworkWriter, Stage::AllpairWriter]
}

/// Everything the stages of one locus run consume and produce.
pub struct StageContext<'a> {
    pub locus: &'a Locus,
    pub clusters: &'a [Cluster],
    pub segments: &'a [Segment],
    pub pheno_table: &'a PhenotypeTable,
    pub descriptions: &'a HashMap<String, String>,
    /// Output path prefix; per-locus file names are derived from it.
    pub output_prefix: &'a str,
    /// Gzip the output files.
    pub compress: bool,
    /// Filled by [`Stage::Pvalues`]; one entry per cluster.
    pub analyses: Vec<ClusterAnalysis>,
}

impl Stage {
    pub fn run(&self, context: &mut StageContext) -> Result<(), anyhow::Error> {
        tracing::debug!("running stage {} for locus {}", self, context.locus.name);
        match self {
            Stage::Pvalues => run_pvalues(context),
            Stage::NetworkWriter => write_networks(context),
            Stage::AllpairWriter => write_allpairs(context),
        }
    }
}

fn run_pvalues(context: &mut StageContext) -> Result<(), anyhow::Error> {
    context.analyses = context
        .clusters
        .iter()
        .map(|cluster| analyze_cluster(&cluster.member_iids, context.pheno_table))
        .collect();
    Ok(())
}

/// Locus names may contain `:` from the target-string grammar; keep file
/// names free of it.
fn locus_file_stem(locus: &Locus) -> String {
    locus.name.replace(':', "_")
}

fn output_path(context: &StageContext, suffix: &str) -> String {
    let gz = if context.compress { ".gz" } else { "" };
    format!(
        "{}.{}.{}{}",
        context.output_prefix,
        locus_file_stem(context.locus),
        suffix,
        gz
    )
}

/// The fixed leading columns of the network file.
const NETWORK_COLUMNS: [&str; 10] = [
    "clst_id",
    "locus",
    "chromosome",
    "start",
    "end",
    "n_individuals",
    "n_haplotypes",
    "true_positive_n",
    "true_positive_ratio",
    "false_negative_n",
];

fn write_networks(context: &mut StageContext) -> Result<(), anyhow::Error> {
    let path = output_path(context, "networks.tsv");
    tracing::info!("writing cluster records to {}", &path);

    let haplotype_count = context
        .segments
        .iter()
        .flat_map(|s| [s.vid1, s.vid2])
        .collect::<std::collections::HashSet<_>>()
        .len();
    let mut raw = open_write_maybe_gz(&path)?;
    writeln!(raw, "## ibd-cluster {}", crate::common::worker_version())?;
    writeln!(
        raw,
        "## {} IBD segments from {} haplotypes",
        context.segments.len(),
        haplotype_count
    )?;
    writeln!(raw, "## Identified {} IBD clusters", context.clusters.len())?;

    let mut writer = tsv_writer(raw);

    let mut header: Vec<String> = NETWORK_COLUMNS.iter().map(|s| s.to_string()).collect();
    header.push("member_ids".to_string());
    header.push("haplotype_ids".to_string());
    for label in context.pheno_table.labels() {
        header.push(format!("{label}_case_count_in_network"));
        header.push(format!("{label}_excluded_count_in_network"));
        header.push(format!("{label}_pvalue"));
    }
    header.push("min_pvalue".to_string());
    header.push("min_phenotype".to_string());
    header.push("min_phenotype_description".to_string());
    writer.write_record(&header)?;

    for (cluster, analysis) in context.clusters.iter().zip(&context.analyses) {
        let mut row = vec![
            format!("clst{}", cluster.id),
            context.locus.name.clone(),
            context.locus.chromosome.clone(),
            context.locus.start.to_string(),
            context.locus.end.to_string(),
            cluster.member_iids.len().to_string(),
            cluster.member_haps.len().to_string(),
            cluster.true_positive_edges.to_string(),
            format!("{:.4}", cluster.true_positive_ratio),
            cluster.false_negative_edges.to_string(),
        ];
        row.push(itertools::join(&cluster.member_iids, ","));
        row.push(itertools::join(&cluster.member_haps, ","));
        for (_, result) in &analysis.results {
            row.extend(result.columns());
        }
        match &analysis.min_pvalue {
            Some(MinPvalue { phenotype, pvalue }) => {
                row.push(pvalue.to_string());
                row.push(phenotype.clone());
                row.push(
                    context
                        .descriptions
                        .get(phenotype)
                        .cloned()
                        .unwrap_or_else(|| "N/A".to_string()),
                );
            }
            None => {
                row.push("N/A".to_string());
                row.push("N/A".to_string());
                row.push("N/A".to_string());
            }
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;

    Ok(())
}

fn write_allpairs(context: &mut StageContext) -> Result<(), anyhow::Error> {
    let path = output_path(context, "allpairs.tsv");
    tracing::info!("writing pair records to {}", &path);

    let mut cluster_of_vid: HashMap<usize, &str> = HashMap::new();
    for cluster in context.clusters {
        for &vid in &cluster.member_vids {
            cluster_of_vid.insert(vid, cluster.id.as_str());
        }
    }

    let mut writer = tsv_writer(open_write_maybe_gz(&path)?);
    writer.write_record([
        "clst_id", "locus", "iid1", "hap1", "iid2", "hap2", "chromosome", "start", "end", "cM",
    ])?;

    for cluster in context.clusters {
        for segment in context.segments {
            // A pair is reported under a cluster when both endpoints belong
            // to that cluster; bridge segments between clusters are not
            // part of any network.
            if cluster_of_vid.get(&segment.vid1) == Some(&cluster.id.as_str())
                && cluster_of_vid.get(&segment.vid2) == Some(&cluster.id.as_str())
            {
                writer.write_record([
                    &format!("clst{}", cluster.id),
                    &context.locus.name,
                    &segment.iid1,
                    &segment.hap1,
                    &segment.iid2,
                    &segment.hap2,
                    &segment.chrom,
                    &segment.start.to_string(),
                    &segment.end.to_string(),
                    &segment.length_cm.to_string(),
                ])?;
            }
        }
    }
    writer.flush()?;

    Ok(())
}
