//! Pileup image generation for candidate variants
//!
//! Reads overlapping a candidate site are rendered into fixed-width pixel
//! matrices (one row per read, one column per reference position, one byte
//! per channel), optionally alongside images of the same reads re-anchored on
//! each alternate-allele haplotype, and packed into [`Example`] records.
//!
//! The engine itself works on in-memory batches; [`bam_reads`],
//! [`candidates`] and [`reference::FastaReference`] load them from disk and
//! [`parallel`] drives many regions at once.

// Modules
pub mod alleles;
pub mod alt_align;
pub mod bam_reads;
pub mod candidates;
pub mod cigar_utils; // CIGAR trimming and length helpers
pub mod config;
pub mod error;
pub mod example;
pub mod haplotype;
pub mod make_examples;
pub mod parallel; // Region-parallel driver with ordered writer
pub mod pileup_image;
pub mod read_index;
pub mod reference;
pub mod sink;
pub mod types;

#[cfg(feature = "python")]
mod python;

pub use alleles::{alt_allele_combinations, need_alt_alignment, AlleleCombination};
pub use cigar_utils::{trim_cigar, TrimmedCigar};
pub use config::{
    AltAlignTypes, AltAlignedPileup, Channel, MakeExamplesOptions, MultiAllelicMode,
    SampleOptions,
};
pub use error::{ErrorScope, PileupError, Result};
pub use example::{fill_pileup_array, Example, ImageShape};
pub use haplotype::{build_haplotype, Haplotype};
pub use make_examples::{ExamplesGenerator, RegionStats};
pub use parallel::{write_examples_parallel, RegionTask};
pub use pileup_image::{PileupImage, PileupImageEncoder, ReadBlock};
pub use read_index::ReadIndex;
pub use reference::{FastaReference, InMemoryReference, ReferenceSource};
pub use sink::{ExampleSink, MemorySink, RecordFileSink, SharedSink};
pub use types::{Candidate, GenomicRange, Read, Variant};
