//! PyO3 bindings
//!
//! Built with `--features python`. Exposes cigar trimming and the full
//! FASTA + BAM + candidate TSV pipeline.

#![allow(non_local_definitions)]

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use rust_htslib::bam::record::CigarString;

use crate::bam_reads::build_region_tasks;
use crate::candidates::read_candidates;
use crate::cigar_utils;
use crate::config::{parse_channels, MakeExamplesOptions, SampleOptions};
use crate::parallel::write_examples_parallel;
use crate::reference::FastaReference;
use crate::sink::{ExampleSink, RecordFileSink};

/// Trim a cigar string to a reference window
///
/// # Arguments
/// * `cigar` - Cigar string, e.g. "5M2I3M"
/// * `ref_start` - Window start relative to the alignment start
/// * `ref_length` - Window length in reference bases
///
/// # Returns
/// Tuple of (trimmed cigar, read start offset, read length)
///
/// # Example (Python)
/// ```python
/// import pileup_examples
/// pileup_examples.trim_cigar("10M", 2, 5)  # ("5M", 2, 5)
/// ```
#[pyfunction]
fn trim_cigar(cigar: &str, ref_start: i64, ref_length: i64) -> PyResult<(String, usize, usize)> {
    let parsed = CigarString::try_from(cigar)
        .map_err(|e| PyValueError::new_err(format!("Invalid cigar '{}': {}", cigar, e)))?;
    let trimmed = cigar_utils::trim_cigar(&parsed.0, ref_start, ref_length)
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    Ok((
        CigarString(trimmed.cigar).to_string(),
        trimmed.read_start,
        trimmed.read_length,
    ))
}

/// Generate examples for every candidate in a TSV file
///
/// One sample per BAM; `roles[i]` names sample `i` and its examples go to
/// `outputs[i]` (gzip-compressed when the path ends in `.gz`).
///
/// # Returns
/// Dictionary of run statistics
#[pyfunction]
#[pyo3(signature = (
    reference_fasta,
    bam_paths,
    candidates_tsv,
    outputs,
    roles=None,
    width=221,
    max_reads=98,
    alt_aligned_pileup="none",
    channels=None,
    region_size=1000,
    threads=8,
    channel_buffer=64,
    compression_threads=1
))]
#[allow(clippy::too_many_arguments)]
fn make_examples(
    py: Python,
    reference_fasta: &str,
    bam_paths: Vec<String>,
    candidates_tsv: &str,
    outputs: Vec<String>,
    roles: Option<Vec<String>>,
    width: usize,
    max_reads: usize,
    alt_aligned_pileup: &str,
    channels: Option<&str>,
    region_size: i64,
    threads: usize,
    channel_buffer: usize,
    compression_threads: usize,
) -> PyResult<PyObject> {
    if outputs.len() != bam_paths.len() {
        return Err(PyValueError::new_err(format!(
            "{} outputs given for {} BAM files",
            outputs.len(),
            bam_paths.len()
        )));
    }
    let roles = roles.unwrap_or_else(|| (0..bam_paths.len()).map(|i| format!("sample{}", i)).collect());
    if roles.len() != bam_paths.len() {
        return Err(PyValueError::new_err("roles must match bam_paths"));
    }

    let mut options = MakeExamplesOptions {
        width,
        max_reads,
        alt_aligned_pileup: alt_aligned_pileup
            .parse()
            .map_err(|e: crate::error::PileupError| PyValueError::new_err(e.to_string()))?,
        samples: Vec::new(),
        ..Default::default()
    };
    if let Some(list) = channels {
        options.channels =
            parse_channels(list).map_err(|e| PyValueError::new_err(e.to_string()))?;
    }
    for (i, (role, output)) in roles.iter().zip(&outputs).enumerate() {
        let mut sample = SampleOptions::new(role.as_str(), vec![i]);
        sample.max_reads = max_reads;
        sample.output = output.clone();
        options.samples.push(sample);
    }
    options
        .validate()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    let run = || -> anyhow::Result<crate::make_examples::RegionStats> {
        let candidates = read_candidates(candidates_tsv)?;
        let tasks = build_region_tasks(candidates, &bam_paths, region_size, width as i64)?;
        let mut sinks: Vec<Box<dyn ExampleSink>> = Vec::with_capacity(outputs.len());
        for output in &outputs {
            sinks.push(Box::new(RecordFileSink::create(output, compression_threads)?));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()?;
        pool.install(|| {
            write_examples_parallel(
                &options,
                || FastaReference::open(reference_fasta),
                tasks,
                sinks,
                channel_buffer,
            )
        })
    };

    let stats = py
        .allow_threads(run)
        .map_err(|e| PyRuntimeError::new_err(format!("make_examples failed: {:#}", e)))?;

    let dict = PyDict::new(py);
    dict.set_item("candidates_processed", stats.candidates_processed)?;
    dict.set_item("candidates_skipped", stats.candidates_skipped)?;
    dict.set_item("candidates_not_started", stats.candidates_not_started)?;
    dict.set_item("examples_written", stats.examples_written)?;
    dict.set_item("reads_skipped", stats.reads_skipped)?;
    dict.set_item("reads_not_realigned", stats.reads_not_realigned)?;
    Ok(dict.into())
}

#[pymodule]
fn pileup_examples(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(trim_cigar, m)?)?;
    m.add_function(wrap_pyfunction!(make_examples, m)?)?;
    Ok(())
}
