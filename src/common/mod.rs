//! Common functionality.

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

pub mod io;

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Strip an optional `chr` prefix from a chromosome name.
pub fn normalized_chrom(chrom: &str) -> &str {
    chrom
        .strip_prefix("chr")
        .or_else(|| chrom.strip_prefix("CHR"))
        .unwrap_or(chrom)
}

/// Compare two chromosome names, accepting the bare number as equal to the
/// `chr`-prefixed form (build 38 files commonly carry the prefix).
pub fn chrom_name_eq(lhs: &str, rhs: &str) -> bool {
    normalized_chrom(lhs) == normalized_chrom(rhs)
}

/// Return the version of the `ibd-cluster` crate and `x.y.z` in tests.
pub fn worker_version() -> &'static str {
    if cfg!(test) {
        "x.y.z"
    } else {
        env!("CARGO_PKG_VERSION")
    }
}
