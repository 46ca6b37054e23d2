//! Alt-allele haplotypes around a variant
//!
//! A haplotype is exactly `width` bases: `half_width` reference bases left of
//! the variant, then the alt allele, then reference bases resuming right
//! after the reference allele until the width is filled. Its reference span
//! `[ref_start, ref_end)` is the stretch of the contig the bases were taken
//! from, reference allele included.

use crate::error::{PileupError, Result};
use crate::reference::ReferenceSource;
use crate::types::{GenomicRange, Variant};

/// Synthetic sequence carrying one alt allele in its reference context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Haplotype {
    pub reference_name: String,
    /// Exactly `width` uppercase bases
    pub sequence: Vec<u8>,
    /// First reference position copied into the haplotype
    pub ref_start: i64,
    /// Exclusive end of the reference positions covered
    pub ref_end: i64,
    /// Reference allele span `[variant_start, variant_end)`
    pub variant_start: i64,
    pub variant_end: i64,
    /// Bases of the alt allele present in `sequence` (truncated when the
    /// allele is longer than the right half of the window)
    pub allele_len: usize,
}

impl Haplotype {
    pub fn width(&self) -> usize {
        self.sequence.len()
    }

    /// Haplotype column of the first alt base
    pub fn variant_offset(&self) -> usize {
        (self.variant_start - self.ref_start) as usize
    }

    /// Reference bases replaced by the allele
    pub fn ref_allele_len(&self) -> i64 {
        self.variant_end - self.variant_start
    }
}

/// Reject alleles that cannot be spelled into a sequence (`<DEL>`, `*`, `.`)
pub fn validate_allele(allele: &str) -> Result<()> {
    if allele.is_empty() {
        return Err(PileupError::invalid_allele(allele, "allele is empty"));
    }
    if let Some(bad) = allele
        .bytes()
        .find(|b| !matches!(b.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T' | b'N'))
    {
        return Err(PileupError::invalid_allele(
            allele,
            format!("'{}' is not a nucleotide", bad as char),
        ));
    }
    Ok(())
}

/// Build the `width`-base haplotype for `alt` at `variant`
///
/// # Errors
/// - `InvalidAllele` for empty or symbolic alleles
/// - `ReferenceOutOfBounds` when either flank leaves the contig
/// - `ContigNotFound` from the reference
pub fn build_haplotype<R: ReferenceSource + ?Sized>(
    reference: &R,
    variant: &Variant,
    alt: &str,
    width: usize,
) -> Result<Haplotype> {
    validate_allele(alt)?;
    if width == 0 {
        return Err(PileupError::config("haplotype width must be positive"));
    }

    let half = (width / 2) as i64;
    let variant_start = variant.start;
    let variant_end = variant.end();
    let ref_start = variant_start - half;
    let contig_length = reference.contig_length(&variant.reference_name)?;

    let right = width - half as usize;
    let allele_len = alt.len().min(right);
    let suffix_len = (right - allele_len) as i64;
    let ref_end = variant_end + suffix_len;

    if ref_start < 0 || ref_end as u64 > contig_length {
        return Err(PileupError::ReferenceOutOfBounds {
            contig: variant.reference_name.clone(),
            start: ref_start,
            end: ref_end,
            length: contig_length,
        });
    }

    let mut sequence = Vec::with_capacity(width);
    sequence.extend(reference.get_bases(&GenomicRange::new(
        variant.reference_name.as_str(),
        ref_start,
        variant_start,
    ))?);
    sequence.extend(alt.as_bytes()[..allele_len].iter().map(u8::to_ascii_uppercase));
    if suffix_len > 0 {
        sequence.extend(reference.get_bases(&GenomicRange::new(
            variant.reference_name.as_str(),
            variant_end,
            ref_end,
        ))?);
    }

    debug_assert_eq!(sequence.len(), width);

    Ok(Haplotype {
        reference_name: variant.reference_name.clone(),
        sequence,
        ref_start,
        ref_end,
        variant_start,
        variant_end,
        allele_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::InMemoryReference;

    // 0         1         2         3
    // 0123456789012345678901234567890123456789
    const CONTIG: &[u8] = b"AAAACCCCGGGGTTTTACGTACGTAAAACCCCGGGGTTTT";

    fn reference() -> InMemoryReference {
        InMemoryReference::new().with_contig("chr1", CONTIG)
    }

    fn variant(start: i64, ref_bases: &str, alt: &str) -> Variant {
        Variant::new("chr1", start, ref_bases, vec![alt.to_string()])
    }

    #[test]
    fn test_snp_haplotype() {
        let hap = build_haplotype(&reference(), &variant(10, "G", "T"), "T", 7).unwrap();
        assert_eq!(hap.sequence, b"CGGTGTT");
        assert_eq!(hap.ref_start, 7);
        assert_eq!(hap.ref_end, 14);
        assert_eq!(hap.variant_offset(), 3);
        assert_eq!(hap.allele_len, 1);
    }

    #[test]
    fn test_deletion_extends_reference_span() {
        // GGTT -> G at position 10: right side resumes at 14
        let hap = build_haplotype(&reference(), &variant(10, "GGTT", "G"), "G", 7).unwrap();
        assert_eq!(hap.sequence, b"CGGGTTA");
        assert_eq!(hap.ref_start, 7);
        assert_eq!(hap.ref_end, 17);
    }

    #[test]
    fn test_insertion_shortens_reference_span() {
        let hap = build_haplotype(&reference(), &variant(10, "G", "GAA"), "GAA", 7).unwrap();
        assert_eq!(hap.sequence, b"CGGGAAG");
        assert_eq!(hap.ref_start, 7);
        assert_eq!(hap.ref_end, 12);
    }

    #[test]
    fn test_long_allele_is_truncated_to_width() {
        let hap =
            build_haplotype(&reference(), &variant(10, "G", "GACGTACG"), "GACGTACG", 7).unwrap();
        assert_eq!(hap.sequence, b"CGGGACG");
        assert_eq!(hap.allele_len, 4);
        assert_eq!(hap.ref_end, 11);
    }

    #[test]
    fn test_width_invariant_over_alleles() {
        let reference = reference();
        for alt in ["A", "AC", "ACGTAC", "T", "GGGGGGGGGGGGGGGGGGGG"] {
            for ref_bases in ["G", "GG", "GGTTTT"] {
                let hap =
                    build_haplotype(&reference, &variant(15, ref_bases, alt), alt, 11).unwrap();
                assert_eq!(hap.width(), 11, "ref {} alt {}", ref_bases, alt);
            }
        }
    }

    #[test]
    fn test_flank_outside_contig() {
        let left = build_haplotype(&reference(), &variant(2, "A", "C"), "C", 9);
        assert!(matches!(
            left,
            Err(PileupError::ReferenceOutOfBounds { .. })
        ));
        let right = build_haplotype(&reference(), &variant(38, "T", "C"), "C", 9);
        assert!(matches!(
            right,
            Err(PileupError::ReferenceOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_symbolic_alleles_rejected() {
        for alt in ["", "<DEL>", "*", "A,C"] {
            let result = build_haplotype(&reference(), &variant(10, "G", "T"), alt, 7);
            assert!(
                matches!(result, Err(PileupError::InvalidAllele { .. })),
                "allele {:?}",
                alt
            );
        }
    }
}
