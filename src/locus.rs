//! Target loci: the regions for which IBD sharing is clustered.
//!
//! A locus either comes from the `--target` string (one region per run) or
//! from a locus file with one `name chromosome start end` row per line.  In
//! sliding-window mode a single row is expanded into fixed-size overlapping
//! sub-regions.

use std::{
    fs::File,
    io::{BufRead, BufReader, Lines},
    path::Path,
};

use serde::Serialize;

/// Width of the sub-regions generated in sliding-window mode.
pub const WINDOW_SIZE: i64 = 1_000;

/// Errors that can occur when constructing loci.
#[derive(thiserror::Error, Debug)]
pub enum LocusError {
    /// The `--target` string does not follow `chr:start-end` / `chr:pos`.
    #[error("invalid target string {0:?}: {1}")]
    InvalidTarget(String, String),
    /// The locus file is malformed.
    #[error("invalid locus file row {0:?}: {1}")]
    InvalidLocusFile(String, String),
    /// Problem reading the locus file.
    #[error("problem reading locus file: {0}")]
    Io(#[from] std::io::Error),
}

/// A single target region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Locus {
    /// Name of the region (locus file column 1, or the raw target string).
    pub name: String,
    /// Chromosome name as given by the user.
    pub chromosome: String,
    /// 1-based start position.
    pub start: i64,
    /// 1-based end position.
    pub end: i64,
}

impl Locus {
    /// Parse a `--target` string of the form `chr:start-end` or `chr:pos`.
    pub fn parse_target(target: &str) -> Result<Self, LocusError> {
        let tokens = target
            .split([':', '-'])
            .map(|token| {
                token.parse::<i64>().map_err(|_| {
                    LocusError::InvalidTarget(
                        target.to_string(),
                        format!("token {token:?} is not an integer"),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (chromosome, start, end) = match tokens[..] {
            [chrom, pos] => (chrom, pos, pos),
            [chrom, start, end] => (chrom, start, end),
            _ => {
                return Err(LocusError::InvalidTarget(
                    target.to_string(),
                    "expected chromosome:start-end or chromosome:pos".to_string(),
                ))
            }
        };
        if start > end {
            return Err(LocusError::InvalidTarget(
                target.to_string(),
                format!("start position {start} is greater than end position {end}"),
            ));
        }

        Ok(Self {
            name: target.to_string(),
            chromosome: chromosome.to_string(),
            start,
            end,
        })
    }

    /// Expand this locus into consecutive windows of `WINDOW_SIZE` base
    /// pairs, the final window truncated at `self.end`.  Windows share their
    /// boundary positions, so consecutive windows overlap in one position.
    pub fn sliding_windows(&self) -> Vec<Locus> {
        if self.start >= self.end {
            return vec![self.clone()];
        }

        let mut windows = Vec::new();
        let mut window_start = self.start;
        while window_start < self.end {
            let window_end = std::cmp::min(window_start + WINDOW_SIZE, self.end);
            windows.push(Locus {
                name: format!("{}_{}-{}", self.name, window_start, window_end),
                chromosome: self.chromosome.clone(),
                start: window_start,
                end: window_end,
            });
            window_start += WINDOW_SIZE;
        }
        windows
    }
}

/// Lazy reader over a locus file, yielding loci in file order.
pub struct LocusReader {
    lines: Lines<BufReader<File>>,
}

impl LocusReader {
    /// Open the locus file at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, LocusError> {
        let file = File::open(path.as_ref())?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
        })
    }

    fn parse_row(line: &str) -> Result<Locus, LocusError> {
        let fields = line.split_whitespace().collect::<Vec<_>>();
        if fields.len() != 4 {
            return Err(LocusError::InvalidLocusFile(
                line.to_string(),
                format!("expected 4 whitespace-separated fields, found {}", fields.len()),
            ));
        }
        if fields[0].parse::<f64>().is_ok() {
            return Err(LocusError::InvalidLocusFile(
                line.to_string(),
                "first field is numeric; expected columns name/chromosome/start/end".to_string(),
            ));
        }
        let start = fields[2].parse::<i64>().map_err(|e| {
            LocusError::InvalidLocusFile(line.to_string(), format!("invalid start position: {e}"))
        })?;
        let end = fields[3].parse::<i64>().map_err(|e| {
            LocusError::InvalidLocusFile(line.to_string(), format!("invalid end position: {e}"))
        })?;
        if start > end {
            return Err(LocusError::InvalidLocusFile(
                line.to_string(),
                format!("start position {start} is greater than end position {end}"),
            ));
        }

        Ok(Locus {
            name: fields[0].to_string(),
            chromosome: fields[1].to_string(),
            start,
            end,
        })
    }
}

impl Iterator for LocusReader {
    type Item = Result<Locus, LocusError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => return Some(Self::parse_row(&line)),
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Read a locus file in sliding-window mode: the file must contain exactly
/// one locus, which is expanded into windows.
pub fn read_sliding_windows<P: AsRef<Path>>(path: P) -> Result<Vec<Locus>, LocusError> {
    let loci = LocusReader::new(path)?.collect::<Result<Vec<_>, _>>()?;
    match &loci[..] {
        [parent] => Ok(parent.sliding_windows()),
        _ => Err(LocusError::InvalidLocusFile(
            String::new(),
            format!(
                "sliding-window mode expects exactly one locus row, found {}",
                loci.len()
            ),
        )),
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{Locus, LocusError, LocusReader};

    #[rstest::rstest]
    #[case("7:1000-2000", "7", 1000, 2000)]
    #[case("10:1234-1234", "10", 1234, 1234)]
    #[case("7:500", "7", 500, 500)]
    fn parse_target_ok(
        #[case] target: &str,
        #[case] chromosome: &str,
        #[case] start: i64,
        #[case] end: i64,
    ) {
        let locus = Locus::parse_target(target).unwrap();
        assert_eq!(locus.chromosome, chromosome);
        assert_eq!(locus.start, start);
        assert_eq!(locus.end, end);
        assert_eq!(locus.name, target);
    }

    #[rstest::rstest]
    #[case("7:2000-1000")]
    #[case("7")]
    #[case("7:1-2-3-4")]
    #[case("chr7:abc-2000")]
    #[case("")]
    fn parse_target_invalid(#[case] target: &str) {
        assert!(matches!(
            Locus::parse_target(target),
            Err(LocusError::InvalidTarget(_, _))
        ));
    }

    #[test]
    fn sliding_windows_cover_region() {
        let locus = Locus {
            name: "L".to_string(),
            chromosome: "7".to_string(),
            start: 1000,
            end: 3500,
        };

        let windows = locus.sliding_windows();
        let names = windows.iter().map(|w| w.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["L_1000-2000", "L_2000-3000", "L_3000-3500"]);
        assert_eq!(windows[0].start, 1000);
        assert_eq!(windows[0].end, 2000);
        assert_eq!(windows[2].start, 3000);
        assert_eq!(windows[2].end, 3500);
    }

    #[test]
    fn sliding_windows_point_region() {
        let locus = Locus {
            name: "P".to_string(),
            chromosome: "7".to_string(),
            start: 42,
            end: 42,
        };
        assert_eq!(locus.sliding_windows(), vec![locus.clone()]);
    }

    #[test]
    fn locus_reader_file_order() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("loci.txt");
        std::fs::write(&path, "BRCA1 17 43044295 43125364\nCFTR 7 117287120 117715971\n")?;

        let loci = LocusReader::new(&path)?.collect::<Result<Vec<_>, _>>()?;
        assert_eq!(loci.len(), 2);
        assert_eq!(loci[0].name, "BRCA1");
        assert_eq!(loci[0].chromosome, "17");
        assert_eq!(loci[1].name, "CFTR");
        assert_eq!(loci[1].end, 117715971);

        Ok(())
    }

    #[rstest::rstest]
    #[case("17 43044295 43125364 BRCA1\n", "first field is numeric")]
    #[case("BRCA1 17 43125364 43044295\n", "greater than end")]
    #[case("BRCA1 17 43044295\n", "expected 4")]
    fn locus_reader_rejects_malformed(#[case] row: &str, #[case] reason: &str) {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("loci.txt");
        std::fs::write(&path, row).unwrap();

        let result = LocusReader::new(&path)
            .unwrap()
            .collect::<Result<Vec<_>, _>>();
        match result {
            Err(LocusError::InvalidLocusFile(_, msg)) => assert!(msg.contains(reason)),
            other => panic!("expected InvalidLocusFile, got {other:?}"),
        }
    }

    #[test]
    fn read_sliding_windows_requires_single_row() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("loci.txt");
        std::fs::write(&path, "A 7 0 100\nB 7 200 300\n")?;

        assert!(super::read_sliding_windows(&path).is_err());

        Ok(())
    }
}
