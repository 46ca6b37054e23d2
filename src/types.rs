//! Core data model: genomic ranges, reads, variants and candidates
//!
//! Reads and variants are plain in-memory records. The engine only ever
//! borrows them; ownership stays with whoever materialized the batch.

use rust_htslib::bam::record::Cigar;
use rustc_hash::FxHashMap;
use std::fmt;

use crate::cigar_utils;
use crate::error::{PileupError, Result};

// ============================================================================
// Genomic Range
// ============================================================================

/// Half-open interval on a contig: `[start, end)`, 0-based
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenomicRange {
    pub reference_name: String,
    pub start: i64,
    pub end: i64,
}

impl GenomicRange {
    pub fn new(reference_name: impl Into<String>, start: i64, end: i64) -> Self {
        Self {
            reference_name: reference_name.into(),
            start,
            end,
        }
    }

    /// Number of positions covered (0 when empty or inverted)
    pub fn len(&self) -> i64 {
        (self.end - self.start).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, pos: i64) -> bool {
        pos >= self.start && pos < self.end
    }

    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        start < self.end && end > self.start
    }
}

impl fmt::Display for GenomicRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.reference_name, self.start, self.end)
    }
}

// ============================================================================
// Read
// ============================================================================

/// One aligned sequencing read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Read {
    /// Fragment (template) name
    pub name: String,
    /// 1 or 2 for paired reads, 0 when unpaired
    pub read_number: u8,
    pub reference_name: String,
    /// 0-based reference position of the first aligned base
    pub alignment_start: i64,
    pub mapping_quality: u8,
    pub is_reverse: bool,
    pub cigar: Vec<Cigar>,
    pub bases: Vec<u8>,
    pub base_qualities: Vec<u8>,
}

impl Read {
    /// Key used by allele-support annotations: `name/read_number`
    pub fn key(&self) -> String {
        format!("{}/{}", self.name, self.read_number)
    }

    /// Reference bases spanned by the alignment
    pub fn reference_span(&self) -> i64 {
        cigar_utils::reference_length(&self.cigar) as i64
    }

    /// Exclusive reference end of the alignment
    pub fn alignment_end(&self) -> i64 {
        self.alignment_start + self.reference_span()
    }

    /// Check cigar, bases and qualities agree with each other
    pub fn validate(&self) -> Result<()> {
        if self.cigar.is_empty() {
            return Err(PileupError::invalid_alignment(format!(
                "read {} has an empty cigar",
                self.key()
            )));
        }
        if self.alignment_start < 0 {
            return Err(PileupError::invalid_alignment(format!(
                "read {} has negative alignment start {}",
                self.key(),
                self.alignment_start
            )));
        }
        let query_len = cigar_utils::query_length(&self.cigar) as usize;
        if query_len != self.bases.len() {
            return Err(PileupError::invalid_alignment(format!(
                "read {} cigar consumes {} bases but sequence has {}",
                self.key(),
                query_len,
                self.bases.len()
            )));
        }
        if self.base_qualities.len() != self.bases.len() {
            return Err(PileupError::invalid_alignment(format!(
                "read {} has {} qualities for {} bases",
                self.key(),
                self.base_qualities.len(),
                self.bases.len()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Variant / Candidate
// ============================================================================

/// A candidate variant site
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variant {
    pub reference_name: String,
    /// 0-based position of the first reference allele base
    pub start: i64,
    pub reference_bases: String,
    pub alternate_bases: Vec<String>,
}

impl Variant {
    pub fn new(
        reference_name: impl Into<String>,
        start: i64,
        reference_bases: impl Into<String>,
        alternate_bases: Vec<String>,
    ) -> Self {
        Self {
            reference_name: reference_name.into(),
            start,
            reference_bases: reference_bases.into(),
            alternate_bases,
        }
    }

    /// Exclusive end of the reference allele
    pub fn end(&self) -> i64 {
        self.start + self.reference_bases.len() as i64
    }

    /// Reject variants that cannot be imaged at all
    pub fn validate(&self) -> Result<()> {
        if self.start < 0 {
            return Err(PileupError::invalid_variant(format!(
                "negative start {} at {}",
                self.start, self.reference_name
            )));
        }
        if self.reference_bases.is_empty() {
            return Err(PileupError::invalid_variant(format!(
                "empty reference allele at {}:{}",
                self.reference_name, self.start
            )));
        }
        if self.alternate_bases.is_empty() {
            return Err(PileupError::invalid_variant(format!(
                "no alternate alleles at {}:{}",
                self.reference_name, self.start
            )));
        }
        if let Some(empty) = self.alternate_bases.iter().position(|a| a.is_empty()) {
            return Err(PileupError::invalid_variant(format!(
                "alternate allele {} is empty at {}:{}",
                empty, self.reference_name, self.start
            )));
        }
        Ok(())
    }
}

/// A variant plus the evidence gathered when it was proposed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    pub variant: Variant,
    /// Allele -> keys (`name/read_number`) of reads supporting it
    pub allele_support: FxHashMap<String, Vec<String>>,
}

impl Candidate {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            allele_support: FxHashMap::default(),
        }
    }

    pub fn with_support(mut self, allele: impl Into<String>, read_keys: Vec<String>) -> Self {
        self.allele_support
            .entry(allele.into())
            .or_default()
            .extend(read_keys);
        self
    }

    /// Number of reads recorded as supporting `allele`
    pub fn support_count(&self, allele: &str) -> usize {
        self.allele_support.get(allele).map_or(0, |v| v.len())
    }
}

impl Default for Variant {
    fn default() -> Self {
        Self {
            reference_name: String::new(),
            start: 0,
            reference_bases: String::new(),
            alternate_bases: Vec::new(),
        }
    }
}
