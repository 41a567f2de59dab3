//! Shared IO plumbing.
//!
//! Every tabular file this tool touches speaks the same dialect: tab
//! separated, rows of possibly varying width, and optionally gzip
//! compressed (IBD detectors conventionally emit `.ibd.gz` / `.match.gz`).
//! The helpers here fix that dialect in one place for the IBD segment
//! input, the phenotype matrix, and the report files.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use flate2::{bufread::MultiGzDecoder, write::GzEncoder, Compression};

/// Compression is keyed off the file name.
fn is_gz(path: &Path) -> bool {
    path.extension().and_then(std::ffi::OsStr::to_str) == Some("gz")
}

/// Open `path` for buffered reading, decompressing when the name ends in
/// `.gz`.
pub fn open_read_maybe_gz<P>(path: P) -> Result<Box<dyn BufRead>, anyhow::Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("could not open {:?} for reading: {}", path, e))?;
    if is_gz(path) {
        tracing::trace!("streaming {:?} through the gzip decoder", path);
        let decoder = MultiGzDecoder::new(BufReader::new(file));
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Open `path` for buffered writing, compressing when the name ends in
/// `.gz`.
pub fn open_write_maybe_gz<P>(path: P) -> Result<Box<dyn Write>, anyhow::Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::create(path)
        .map_err(|e| anyhow::anyhow!("could not open {:?} for writing: {}", path, e))?;
    if is_gz(path) {
        tracing::trace!("compressing {:?} while writing", path);
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        Ok(Box::new(encoder))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Tab-separated reader over a plain or gzipped table.  Width is left
/// flexible: the IBD formats differ in their trailing columns, and short
/// phenotype rows are meaningful (missing cells count as excluded).
pub fn tsv_reader<P>(
    path: P,
    has_headers: bool,
) -> Result<csv::Reader<Box<dyn BufRead>>, anyhow::Error>
where
    P: AsRef<Path>,
{
    Ok(csv::ReaderBuilder::new()
        .has_headers(has_headers)
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(open_read_maybe_gz(path)?))
}

/// Tab-separated writer for the report files.  Quoting is disabled so that
/// comma-joined member lists land in the output verbatim.
pub fn tsv_writer(inner: Box<dyn Write>) -> csv::Writer<Box<dyn Write>> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(inner)
}

/// Returns an Iterator over the lines of the file at `filename`.
pub fn read_lines<P>(filename: P) -> std::io::Result<std::io::Lines<BufReader<File>>>
where
    P: AsRef<Path>,
{
    Ok(BufReader::new(File::open(filename)?).lines())
}
