//! Phenotype case/control assignments and related input files.
//!
//! The phenotype matrix is a tab-separated file with a header row; the
//! first column holds individual ids (`grid`/`grids`), every further column
//! is one phenotype with cell values `1` (case), `0` (control) and
//! `-1`/`NA`/`N/A`/empty (excluded).  Column order is preserved; it defines
//! the stable phenotype order of all downstream output.

pub mod analysis;

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use indexmap::IndexMap;

use crate::common::io::{read_lines, tsv_reader};

/// Errors of the phenotype file parser.
#[derive(thiserror::Error, Debug)]
pub enum PhenoError {
    /// The phenotype file does not exist.
    #[error("phenotype file {0:?} was not found")]
    FileNotFound(PathBuf),
    /// Problem opening the file.
    #[error("problem opening phenotype file: {0}")]
    Open(#[source] anyhow::Error),
    /// The CSV layer failed to read a row.
    #[error("problem parsing phenotype file: {0}")]
    Parse(#[from] csv::Error),
    /// The header row does not start with `grid`/`grids`.
    #[error("invalid phenotype file header: first column must be grid or grids, found {0:?}")]
    InvalidHeader(String),
}

/// Case/control/excluded split of one phenotype.
#[derive(Debug, Default, Clone)]
pub struct PhenotypeStatus {
    pub cases: HashSet<String>,
    pub controls: HashSet<String>,
    pub excluded: HashSet<String>,
}

impl PhenotypeStatus {
    /// Phenotype frequency in the cohort: cases over all graded individuals.
    pub fn frequency(&self) -> f64 {
        let total = self.cases.len() + self.controls.len() + self.excluded.len();
        self.cases.len() as f64 / total as f64
    }
}

/// All phenotypes of one run, in file column order.
#[derive(Debug, Default)]
pub struct PhenotypeTable {
    phenotypes: IndexMap<String, PhenotypeStatus>,
}

impl PhenotypeTable {
    /// Load a phenotype matrix from `path` (plain or gzip).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PhenoError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PhenoError::FileNotFound(path.to_path_buf()));
        }

        let mut reader = tsv_reader(path, true).map_err(PhenoError::Open)?;

        let headers = reader.headers()?.clone();
        let id_column = headers.get(0).unwrap_or_default();
        if !id_column.eq_ignore_ascii_case("grid") && !id_column.eq_ignore_ascii_case("grids") {
            return Err(PhenoError::InvalidHeader(id_column.to_string()));
        }

        let mut phenotypes: IndexMap<String, PhenotypeStatus> = headers
            .iter()
            .skip(1)
            .map(|label| (label.to_string(), PhenotypeStatus::default()))
            .collect();

        for record in reader.records() {
            let record = record?;
            let iid = match record.get(0) {
                Some(iid) if !iid.is_empty() => iid.to_string(),
                _ => continue,
            };
            for (column, status) in phenotypes.values_mut().enumerate() {
                // Cells missing at the end of a short row count as excluded.
                let value = record.get(column + 1).unwrap_or("").trim();
                match value {
                    "1" => {
                        status.cases.insert(iid.clone());
                    }
                    "0" => {
                        status.controls.insert(iid.clone());
                    }
                    "" | "-1" => {
                        status.excluded.insert(iid.clone());
                    }
                    _ if value.eq_ignore_ascii_case("na") || value.eq_ignore_ascii_case("n/a") => {
                        status.excluded.insert(iid.clone());
                    }
                    _ => {
                        tracing::warn!(
                            "unrecognized phenotype value {:?} for individual {:?}; \
                             treating the individual as excluded",
                            value,
                            iid
                        );
                        status.excluded.insert(iid.clone());
                    }
                }
            }
        }

        tracing::debug!(
            "loaded {} phenotypes from {:?}",
            phenotypes.len(),
            path
        );
        Ok(Self { phenotypes })
    }

    /// Iterate phenotypes in stable (column) order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PhenotypeStatus)> {
        self.phenotypes.iter()
    }

    pub fn get(&self, label: &str) -> Option<&PhenotypeStatus> {
        self.phenotypes.get(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &String> {
        self.phenotypes.keys()
    }

    pub fn len(&self) -> usize {
        self.phenotypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phenotypes.is_empty()
    }
}

/// Read a cohort restriction file: one individual id per line.
pub fn load_cohort<P: AsRef<Path>>(path: P) -> Result<HashSet<String>, anyhow::Error> {
    let mut cohort = HashSet::new();
    for line in read_lines(path)? {
        let line = line?;
        let iid = line.trim();
        if !iid.is_empty() {
            cohort.insert(iid.to_string());
        }
    }
    Ok(cohort)
}

/// Read a phenotype description lookup: two tab-separated columns,
/// `phenotype<TAB>description`, optional header.
pub fn load_descriptions<P: AsRef<Path>>(
    path: P,
) -> Result<HashMap<String, String>, anyhow::Error> {
    let mut descriptions = HashMap::new();
    for (row, line) in read_lines(path)?.enumerate() {
        let line = line?;
        let mut fields = line.splitn(2, '\t');
        let (label, description) = match (fields.next(), fields.next()) {
            (Some(label), Some(description)) => (label.trim(), description.trim()),
            _ => continue,
        };
        if row == 0
            && (label.eq_ignore_ascii_case("phecode") || label.eq_ignore_ascii_case("phenotype"))
        {
            continue;
        }
        descriptions.insert(label.to_string(), description.to_string());
    }
    Ok(descriptions)
}
