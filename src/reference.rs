//! Reference sequence providers
//!
//! The generator only needs two questions answered: how long is a contig, and
//! which bases lie in a half-open range. [`InMemoryReference`] serves tests
//! and embedders that already hold sequences; [`FastaReference`] reads an
//! indexed FASTA through htslib.

use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use rust_htslib::faidx;
use rustc_hash::FxHashMap;

use crate::error::{PileupError, Result};
use crate::types::GenomicRange;

/// Base used for columns that fall outside the contig
pub const PAD_BASE: u8 = b'N';

/// Source of reference bases
pub trait ReferenceSource {
    /// Length of the contig in bases
    fn contig_length(&self, contig: &str) -> Result<u64>;

    /// Uppercase bases of `range`; the range must lie inside the contig
    fn get_bases(&self, range: &GenomicRange) -> Result<Vec<u8>>;

    /// Bases of `range`, with columns beyond either contig edge filled with `N`
    fn get_bases_padded(&self, range: &GenomicRange) -> Result<Vec<u8>> {
        let length = self.contig_length(&range.reference_name)? as i64;
        let width = range.len() as usize;
        let lo = range.start.max(0);
        let hi = range.end.min(length);
        if lo >= hi {
            return Ok(vec![PAD_BASE; width]);
        }
        let mut bases = Vec::with_capacity(width);
        bases.resize((lo - range.start) as usize, PAD_BASE);
        bases.extend(self.get_bases(&GenomicRange::new(
            range.reference_name.as_str(),
            lo,
            hi,
        ))?);
        bases.resize(width, PAD_BASE);
        Ok(bases)
    }
}

fn check_bounds(range: &GenomicRange, length: u64) -> Result<()> {
    if range.start < 0 || range.end < range.start || range.end as u64 > length {
        return Err(PileupError::ReferenceOutOfBounds {
            contig: range.reference_name.clone(),
            start: range.start,
            end: range.end,
            length,
        });
    }
    Ok(())
}

// ============================================================================
// In-memory reference
// ============================================================================

/// Contig sequences held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryReference {
    contigs: FxHashMap<String, Vec<u8>>,
}

impl InMemoryReference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a contig; bases are uppercased
    pub fn with_contig(mut self, name: impl Into<String>, bases: &[u8]) -> Self {
        self.insert(name, bases);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, bases: &[u8]) {
        self.contigs.insert(name.into(), bases.to_ascii_uppercase());
    }

    fn contig(&self, name: &str) -> Result<&[u8]> {
        self.contigs
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| PileupError::ContigNotFound {
                contig: name.to_string(),
            })
    }
}

impl ReferenceSource for InMemoryReference {
    fn contig_length(&self, contig: &str) -> Result<u64> {
        Ok(self.contig(contig)?.len() as u64)
    }

    fn get_bases(&self, range: &GenomicRange) -> Result<Vec<u8>> {
        let seq = self.contig(&range.reference_name)?;
        check_bounds(range, seq.len() as u64)?;
        Ok(seq[range.start as usize..range.end as usize].to_vec())
    }
}

// ============================================================================
// Indexed FASTA reference
// ============================================================================

/// Reference backed by an indexed FASTA (`.fai` next to the file)
pub struct FastaReference {
    reader: faidx::Reader,
    lengths: FxHashMap<String, u64>,
}

impl FastaReference {
    pub fn open<P: AsRef<Path>>(path: P) -> AnyResult<Self> {
        let path = path.as_ref();
        let reader = faidx::Reader::from_path(path)
            .with_context(|| format!("Failed to open FASTA {}", path.display()))?;
        let names = reader
            .seq_names()
            .with_context(|| format!("Failed to list contigs of {}", path.display()))?;
        let lengths = names
            .into_iter()
            .map(|name| {
                let len = reader.fetch_seq_len(&name);
                (name, len)
            })
            .collect();
        Ok(Self { reader, lengths })
    }

    pub fn contig_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lengths.keys().cloned().collect();
        names.sort();
        names
    }
}

impl ReferenceSource for FastaReference {
    fn contig_length(&self, contig: &str) -> Result<u64> {
        self.lengths
            .get(contig)
            .copied()
            .ok_or_else(|| PileupError::ContigNotFound {
                contig: contig.to_string(),
            })
    }

    fn get_bases(&self, range: &GenomicRange) -> Result<Vec<u8>> {
        let length = self.contig_length(&range.reference_name)?;
        check_bounds(range, length)?;
        if range.is_empty() {
            return Ok(Vec::new());
        }
        // htslib takes an inclusive end
        let bases = self
            .reader
            .fetch_seq(
                &range.reference_name,
                range.start as usize,
                range.end as usize - 1,
            )
            .map_err(|e| {
                PileupError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("fetching {}: {}", range, e),
                ))
            })?;
        Ok(bases.to_ascii_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_in_memory_get_bases() {
        let reference = InMemoryReference::new().with_contig("chr1", b"acgtACGTNN");
        assert_eq!(reference.contig_length("chr1").unwrap(), 10);
        let bases = reference
            .get_bases(&GenomicRange::new("chr1", 2, 6))
            .unwrap();
        assert_eq!(bases, b"GTAC");
    }

    #[test]
    fn test_in_memory_errors() {
        let reference = InMemoryReference::new().with_contig("chr1", b"ACGT");
        assert!(matches!(
            reference.get_bases(&GenomicRange::new("chr2", 0, 1)),
            Err(PileupError::ContigNotFound { .. })
        ));
        assert!(matches!(
            reference.get_bases(&GenomicRange::new("chr1", 2, 5)),
            Err(PileupError::ReferenceOutOfBounds { .. })
        ));
        assert!(reference
            .get_bases(&GenomicRange::new("chr1", -1, 2))
            .is_err());
    }

    #[test]
    fn test_padded_window_at_both_edges() {
        let reference = InMemoryReference::new().with_contig("chr1", b"ACGTA");
        let left = reference
            .get_bases_padded(&GenomicRange::new("chr1", -3, 2))
            .unwrap();
        assert_eq!(left, b"NNNAC");
        let right = reference
            .get_bases_padded(&GenomicRange::new("chr1", 3, 8))
            .unwrap();
        assert_eq!(right, b"TANNN");
        let outside = reference
            .get_bases_padded(&GenomicRange::new("chr1", 10, 12))
            .unwrap();
        assert_eq!(outside, b"NN");
    }

    #[test]
    fn test_fasta_reference() {
        let dir = tempfile::tempdir().unwrap();
        let fasta = dir.path().join("ref.fa");
        let mut file = std::fs::File::create(&fasta).unwrap();
        writeln!(file, ">chr1").unwrap();
        writeln!(file, "ACGTACGTAC").unwrap();
        writeln!(file, ">chr2").unwrap();
        writeln!(file, "ggggcccc").unwrap();
        drop(file);
        // .fai: name, length, offset, line bases, line width
        let mut fai = std::fs::File::create(dir.path().join("ref.fa.fai")).unwrap();
        writeln!(fai, "chr1\t10\t6\t10\t11").unwrap();
        writeln!(fai, "chr2\t8\t23\t8\t9").unwrap();
        drop(fai);

        let reference = FastaReference::open(&fasta).unwrap();
        assert_eq!(reference.contig_names(), vec!["chr1", "chr2"]);
        assert_eq!(reference.contig_length("chr2").unwrap(), 8);
        assert_eq!(
            reference
                .get_bases(&GenomicRange::new("chr1", 1, 4))
                .unwrap(),
            b"CGT"
        );
        assert_eq!(
            reference
                .get_bases(&GenomicRange::new("chr2", 3, 6))
                .unwrap(),
            b"GCC"
        );
        assert!(matches!(
            reference.contig_length("chrX"),
            Err(PileupError::ContigNotFound { .. })
        ));
    }
}
