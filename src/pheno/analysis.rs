//! Binomial phenotype enrichment over final clusters.
//!
//! For each cluster and phenotype the number of member individuals that are
//! cases is compared against the phenotype frequency in the graded cohort:
//! the p-value is the upper binomial tail `P[X >= carriers]` for
//! `X ~ Binomial(N, f)` with `N` the cluster size after removing excluded
//! individuals.  Degenerate situations (no controls, empty network after
//! exclusions) yield an `N/A` sentinel instead of aborting.

use std::collections::BTreeSet;

use statrs::distribution::{Binomial, DiscreteCDF};

use super::{PhenotypeStatus, PhenotypeTable};

/// Enrichment result of one cluster for one phenotype.
#[derive(Debug, Clone, PartialEq)]
pub enum PhenotypeResult {
    /// Statistics could be computed.
    Analyzed {
        carriers_in_network: usize,
        excluded_in_network: usize,
        pvalue: f64,
    },
    /// Phenotype without controls or network without graded members.
    NotAvailable,
}

impl PhenotypeResult {
    /// The three output columns (carriers, excluded, p-value).
    pub fn columns(&self) -> [String; 3] {
        match self {
            PhenotypeResult::Analyzed {
                carriers_in_network,
                excluded_in_network,
                pvalue,
            } => [
                carriers_in_network.to_string(),
                excluded_in_network.to_string(),
                pvalue.to_string(),
            ],
            PhenotypeResult::NotAvailable => {
                ["N/A".to_string(), "N/A".to_string(), "N/A".to_string()]
            }
        }
    }
}

/// The most significant phenotype of one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct MinPvalue {
    pub phenotype: String,
    pub pvalue: f64,
}

/// All phenotype results of one cluster, in stable phenotype order.
#[derive(Debug, Clone, Default)]
pub struct ClusterAnalysis {
    pub results: Vec<(String, PhenotypeResult)>,
    /// Smallest non-zero p-value below 1 and its phenotype, if any.
    pub min_pvalue: Option<MinPvalue>,
}

/// Analyze one cluster (given by its member individual ids) against every
/// phenotype of the table.
pub fn analyze_cluster(member_iids: &BTreeSet<String>, table: &PhenotypeTable) -> ClusterAnalysis {
    let mut analysis = ClusterAnalysis::default();
    let mut min_pvalue = 1f64;
    let mut min_phenotype: Option<String> = None;

    for (label, status) in table.iter() {
        if status.controls.is_empty() {
            // No controls means no frequency estimate; report sentinels.
            analysis
                .results
                .push((label.clone(), PhenotypeResult::NotAvailable));
            continue;
        }

        let result = analyze_phenotype(member_iids, status);
        if let PhenotypeResult::Analyzed { pvalue, .. } = result {
            tracing::debug!("pvalue for {label} = {pvalue}");
            if pvalue < min_pvalue && pvalue != 0.0 {
                min_pvalue = pvalue;
                min_phenotype = Some(label.clone());
            }
        }
        analysis.results.push((label.clone(), result));
    }

    analysis.min_pvalue = min_phenotype.map(|phenotype| MinPvalue {
        phenotype,
        pvalue: min_pvalue,
    });
    analysis
}

fn analyze_phenotype(member_iids: &BTreeSet<String>, status: &PhenotypeStatus) -> PhenotypeResult {
    let carriers_in_network = member_iids
        .iter()
        .filter(|iid| status.cases.contains(*iid))
        .count();
    let excluded_in_network = member_iids
        .iter()
        .filter(|iid| status.excluded.contains(*iid))
        .count();
    let network_size = member_iids.len() - excluded_in_network;
    if network_size == 0 {
        return PhenotypeResult::NotAvailable;
    }

    PhenotypeResult::Analyzed {
        carriers_in_network,
        excluded_in_network,
        pvalue: binomial_tail(carriers_in_network, network_size, status.frequency()),
    }
}

/// Upper tail `P[X >= successes]` for `X ~ Binomial(trials, probability)`.
/// The chance of seeing zero or more successes is 1 by definition.
fn binomial_tail(successes: usize, trials: usize, probability: f64) -> f64 {
    if successes == 0 {
        return 1.0;
    }
    let binomial = Binomial::new(probability, trials as u64)
        .expect("phenotype frequency is a probability and the network is non-empty");
    binomial.sf(successes as u64 - 1)
}
