//! Streaming filter that projects a pairwise IBD file onto a target locus.
//!
//! The input file is read in bounded chunks; each chunk is reduced to the
//! rows whose segment lies on the target chromosome, satisfies the region
//! predicate and the minimum centimorgan threshold, and (optionally) whose
//! individuals are both members of the analysis cohort.  Haplotype ids of
//! surviving rows are interned to dense vertex ids on the fly.

use std::{collections::HashSet, path::Path};

use crate::{common, common::io::tsv_reader, locus::Locus};

use super::{HaplotypeInterner, IbdFormat, Segment};

/// Number of rows read per chunk.
pub const CHUNK_SIZE: usize = 100_000;

/// How a segment must relate to the target region to be retained.
#[derive(
    clap::ValueEnum,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum RegionPredicate {
    /// Keep segments that span the entire target region.
    #[default]
    Contains,
    /// Keep segments that overlap the target region at all.
    Overlaps,
}

impl RegionPredicate {
    /// Whether a segment `[start, end]` on the target chromosome is kept.
    pub fn keep(&self, locus: &Locus, start: i64, end: i64) -> bool {
        match self {
            RegionPredicate::Contains => start <= locus.start && end >= locus.end,
            RegionPredicate::Overlaps => start <= locus.end && end >= locus.start,
        }
    }
}

/// Errors of the segment filter.
#[derive(thiserror::Error, Debug)]
pub enum FilterError {
    /// The input file does not exist.
    #[error("IBD input file {0:?} was not found")]
    FileNotFound(std::path::PathBuf),
    /// Problem opening the input file.
    #[error("problem opening IBD input file: {0}")]
    Open(#[source] anyhow::Error),
    /// The target chromosome never occurs in the file.
    #[error(
        "chromosome {0:?} was never observed in the IBD input file; \
         ensure that the file matches the target region"
    )]
    WrongChromosomeFile(String),
    /// Zero rows survived the filter conditions.
    #[error("no IBD segment satisfied the filter conditions for locus {0:?}")]
    EmptyFilter(String),
    /// The CSV layer failed to read a row.
    #[error("problem parsing IBD input file: {0}")]
    Parse(#[from] csv::Error),
    /// A row had too few columns or an unparseable value.
    #[error("invalid IBD row {row}: {message}")]
    InvalidRow { row: u64, message: String },
}

/// Result of filtering one IBD file against one locus.
#[derive(Debug, Default)]
pub struct FilteredSegments {
    /// Retained segments in input order.
    pub segments: Vec<Segment>,
    /// Haplotype id interner holding every vertex seen in `segments`.
    pub interner: HaplotypeInterner,
}

/// Configuration of one filter pass; borrowed pieces live for one locus run.
#[derive(Debug)]
pub struct SegmentFilter<'a> {
    locus: &'a Locus,
    format: IbdFormat,
    predicate: RegionPredicate,
    min_cm: f64,
    cohort: Option<&'a HashSet<String>>,
}

impl<'a> SegmentFilter<'a> {
    pub fn new(
        locus: &'a Locus,
        format: IbdFormat,
        predicate: RegionPredicate,
        min_cm: f64,
    ) -> Self {
        Self {
            locus,
            format,
            predicate,
            min_cm,
            cohort: None,
        }
    }

    /// Restrict rows to pairs where both individuals are in `cohort`.
    pub fn with_cohort(mut self, cohort: Option<&'a HashSet<String>>) -> Self {
        self.cohort = cohort;
        self
    }

    /// Stream the file at `path` and collect the retained segments.
    pub fn run<P: AsRef<Path>>(&self, path: P) -> Result<FilteredSegments, FilterError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FilterError::FileNotFound(path.to_path_buf()));
        }
        tracing::debug!(
            "filtering {:?} ({}) against locus {} with predicate {}",
            path,
            self.format,
            self.locus.name,
            self.predicate
        );

        let mut reader = tsv_reader(path, false).map_err(FilterError::Open)?;

        let mut result = FilteredSegments::default();
        let mut saw_target_chrom = false;
        let mut rows_total = 0u64;
        let mut chunk = Vec::with_capacity(CHUNK_SIZE);

        for record in reader.records() {
            chunk.push(record?);
            if chunk.len() == CHUNK_SIZE {
                self.process_chunk(&chunk, rows_total, &mut result, &mut saw_target_chrom)?;
                rows_total += chunk.len() as u64;
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            self.process_chunk(&chunk, rows_total, &mut result, &mut saw_target_chrom)?;
            rows_total += chunk.len() as u64;
        }

        if result.segments.is_empty() {
            if rows_total > 0 && !saw_target_chrom {
                return Err(FilterError::WrongChromosomeFile(
                    self.locus.chromosome.clone(),
                ));
            }
            return Err(FilterError::EmptyFilter(self.locus.name.clone()));
        }

        tracing::debug!(
            "retained {} of {} IBD segments with {} unique haplotypes",
            result.segments.len(),
            rows_total,
            result.interner.len()
        );

        Ok(result)
    }

    fn process_chunk(
        &self,
        chunk: &[csv::StringRecord],
        first_row: u64,
        result: &mut FilteredSegments,
        saw_target_chrom: &mut bool,
    ) -> Result<(), FilterError> {
        let columns = self.format.columns();
        let width = [
            columns.id1,
            columns.hap1,
            columns.id2,
            columns.hap2,
            columns.chrom,
            columns.start,
            columns.end,
            columns.cm,
        ]
        .into_iter()
        .max()
        .expect("column profile is non-empty")
            + 1;

        for (offset, record) in chunk.iter().enumerate() {
            let row = first_row + offset as u64 + 1;
            if record.len() < width {
                return Err(FilterError::InvalidRow {
                    row,
                    message: format!(
                        "expected at least {} columns for format {}, found {}",
                        width,
                        self.format,
                        record.len()
                    ),
                });
            }

            let chrom = &record[columns.chrom];
            if !common::chrom_name_eq(chrom, &self.locus.chromosome) {
                continue;
            }
            *saw_target_chrom = true;

            let iid1 = &record[columns.id1];
            let iid2 = &record[columns.id2];
            if let Some(cohort) = self.cohort {
                if !cohort.contains(iid1) || !cohort.contains(iid2) {
                    continue;
                }
            }

            let raw_start = parse_i64(record, columns.start, row)?;
            let raw_end = parse_i64(record, columns.end, row)?;
            // Some detectors emit the segment coordinates in reverse order.
            let start = std::cmp::min(raw_start, raw_end);
            let end = std::cmp::max(raw_start, raw_end);
            let length_cm = parse_f64(record, columns.cm, row)?;

            if length_cm < self.min_cm || !self.predicate.keep(self.locus, start, end) {
                continue;
            }

            let hap1 = self.format.haplotype_id(iid1, &record[columns.hap1]);
            let hap2 = self.format.haplotype_id(iid2, &record[columns.hap2]);
            if hap1 == hap2 {
                continue;
            }

            let vid1 = result.interner.intern(&hap1, iid1);
            let vid2 = result.interner.intern(&hap2, iid2);
            result.segments.push(Segment {
                vid1,
                vid2,
                hap1,
                hap2,
                iid1: iid1.to_string(),
                iid2: iid2.to_string(),
                chrom: chrom.to_string(),
                start,
                end,
                length_cm,
            });
        }

        Ok(())
    }
}

fn parse_i64(record: &csv::StringRecord, column: usize, row: u64) -> Result<i64, FilterError> {
    record[column]
        .parse::<i64>()
        .map_err(|e| FilterError::InvalidRow {
            row,
            message: format!("column {}: {}", column + 1, e),
        })
}

fn parse_f64(record: &csv::StringRecord, column: usize, row: u64) -> Result<f64, FilterError> {
    record[column]
        .parse::<f64>()
        .map_err(|e| FilterError::InvalidRow {
            row,
            message: format!("column {}: {}", column + 1, e),
        })
}
