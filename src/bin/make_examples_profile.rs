use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use pileup_examples::bam_reads::build_region_tasks;
use pileup_examples::candidates::read_candidates;
use pileup_examples::config::parse_channels;
use pileup_examples::{
    write_examples_parallel, AltAlignTypes, AltAlignedPileup, ExampleSink, FastaReference,
    MakeExamplesOptions, MultiAllelicMode, RecordFileSink, SampleOptions,
};

/// Generate pileup image examples for the candidates in a TSV file
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Indexed reference FASTA
    #[arg(long)]
    reference: PathBuf,

    /// Indexed BAM, one per sample (repeat for trios)
    #[arg(long = "bam", required = true)]
    bams: Vec<String>,

    /// Candidate TSV: chrom, start, ref, alts[, support]
    #[arg(long)]
    candidates: PathBuf,

    /// Role name per BAM (default: sample0, sample1, ...)
    #[arg(long = "role")]
    roles: Vec<String>,

    #[arg(long, default_value = "/tmp/pileup_examples_profile")]
    out_dir: PathBuf,

    #[arg(long, default_value_t = 221)]
    width: usize,

    /// Read rows per sample block
    #[arg(long, default_value_t = 98)]
    max_reads: usize,

    /// none, base_channels, diff_channels or rows
    #[arg(long, default_value = "none")]
    alt_aligned_pileup: AltAlignedPileup,

    /// indels or all
    #[arg(long, default_value = "indels")]
    types_to_alt_align: AltAlignTypes,

    /// add_het_alt_images or no_het_alt_images
    #[arg(long, default_value = "add_het_alt_images")]
    multi_allelic_mode: MultiAllelicMode,

    /// Comma-separated channel list (default: all six)
    #[arg(long)]
    channels: Option<String>,

    #[arg(long, default_value_t = 10)]
    min_mapping_quality: u8,

    /// Stack every sample in every role's image, own sample first
    #[arg(long)]
    stack_samples: bool,

    /// Candidates are grouped into regions of this many bases
    #[arg(long, default_value_t = 1000)]
    region_size: i64,

    #[arg(long, default_value_t = 8)]
    threads: usize,

    #[arg(long, default_value_t = 64)]
    channel_buffer: usize,

    #[arg(long, default_value_t = 1)]
    compression_threads: usize,

    /// Gzip the example files
    #[arg(long)]
    compress_output: bool,
}

fn build_options(cli: &Cli) -> Result<MakeExamplesOptions> {
    let roles: Vec<String> = if cli.roles.is_empty() {
        (0..cli.bams.len()).map(|i| format!("sample{}", i)).collect()
    } else {
        cli.roles.clone()
    };
    if roles.len() != cli.bams.len() {
        return Err(anyhow!(
            "{} roles given for {} BAM files",
            roles.len(),
            cli.bams.len()
        ));
    }

    let mut options = MakeExamplesOptions {
        width: cli.width,
        max_reads: cli.max_reads,
        alt_aligned_pileup: cli.alt_aligned_pileup,
        types_to_alt_align: cli.types_to_alt_align,
        multi_allelic_mode: cli.multi_allelic_mode,
        min_mapping_quality: cli.min_mapping_quality,
        samples: Vec::new(),
        ..Default::default()
    };
    if let Some(list) = &cli.channels {
        options.channels = parse_channels(list)?;
    }

    let ext = if cli.compress_output { "examples.gz" } else { "examples" };
    for (i, role) in roles.iter().enumerate() {
        let mut order = vec![i];
        if cli.stack_samples {
            order.extend((0..cli.bams.len()).filter(|&j| j != i));
        }
        let mut sample = SampleOptions::new(role.as_str(), order);
        sample.max_reads = cli.max_reads;
        sample.output = cli.out_dir.join(format!("{}.{}", role, ext)).to_string_lossy().into_owned();
        options.samples.push(sample);
    }
    options.validate()?;
    Ok(options)
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp(None)
        .format_target(false)
        .init();

    let cli = Cli::parse();
    let options = build_options(&cli)?;
    std::fs::create_dir_all(&cli.out_dir).context("Failed to create --out-dir")?;

    let t0 = Instant::now();
    let candidates = read_candidates(&cli.candidates)?;
    let tasks = build_region_tasks(
        candidates,
        &cli.bams,
        cli.region_size,
        cli.width as i64,
    )?;
    log::info!("Loaded {} regions ({}ms)", tasks.len(), t0.elapsed().as_millis());

    let mut sinks: Vec<Box<dyn ExampleSink>> = Vec::with_capacity(options.samples.len());
    for sample in &options.samples {
        sinks.push(Box::new(RecordFileSink::create(
            &sample.output,
            cli.compression_threads,
        )?));
    }

    // Per-run thread pool so worker count is exact when profiling
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cli.threads.max(1))
        .build()
        .context("Failed to build Rayon thread pool")?;
    let stats = pool.install(|| {
        write_examples_parallel(
            &options,
            || FastaReference::open(&cli.reference),
            tasks,
            sinks,
            cli.channel_buffer,
        )
    })?;

    eprintln!(
        "done: candidates={} skipped={} not_started={} examples={} reads_skipped={} not_realigned={} ({}ms)",
        stats.candidates_processed,
        stats.candidates_skipped,
        stats.candidates_not_started,
        stats.examples_written,
        stats.reads_skipped,
        stats.reads_not_realigned,
        t0.elapsed().as_millis()
    );
    Ok(())
}
