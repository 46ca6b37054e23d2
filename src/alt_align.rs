//! Re-anchoring reads onto alt-allele haplotypes
//!
//! A read aligned to the reference is moved into haplotype coordinates by
//! trimming it to the haplotype's reference span and rewriting the cigar
//! across the reference allele:
//!
//! - bases left of the allele keep their operations, shifted by `ref_start`
//! - bases right of the allele keep their operations, shifted by the length
//!   change of the allele
//! - a read covering the whole reference allele with `r` bases there gets
//!   `M(min(r, a))` then `I(r - a)` or `D(a - r)`, where `a` is the
//!   haplotype allele length
//! - a read starting or ending inside the reference allele carries the bases
//!   it has there as soft clips
//!
//! Reads lying entirely inside the reference allele cannot be placed.

use rust_htslib::bam::record::Cigar;

use crate::cigar_utils::{
    consumes_query, consumes_reference, push_op, query_length, trim_cigar, with_len,
};
use crate::error::{PileupError, Result};
use crate::haplotype::Haplotype;
use crate::types::Read;

/// Operations of one trimmed read, split around the reference allele
#[derive(Debug, Default)]
struct Partition {
    left: Vec<Cigar>,
    mid: Vec<Cigar>,
    right: Vec<Cigar>,
}

impl Partition {
    fn push(&mut self, pos: i64, variant_start: i64, variant_end: i64, op: Cigar) {
        let part = if pos < variant_start {
            &mut self.left
        } else if pos < variant_end {
            &mut self.mid
        } else {
            &mut self.right
        };
        push_op(part, op);
    }
}

fn leading_clip(cigar: &[Cigar]) -> u32 {
    match cigar.first() {
        Some(Cigar::SoftClip(n)) => *n,
        _ => 0,
    }
}

fn trailing_clip(cigar: &[Cigar]) -> u32 {
    match cigar.last() {
        Some(Cigar::SoftClip(n)) if cigar.len() > 1 => *n,
        _ => 0,
    }
}

/// Re-express `read` in the coordinates of `hap`
///
/// Returns `Ok(None)` for reads on another contig, outside the haplotype's
/// reference span, or entirely inside the reference allele.
pub fn realign_to_haplotype(read: &Read, hap: &Haplotype) -> Result<Option<Read>> {
    if read.reference_name != hap.reference_name {
        return Ok(None);
    }
    read.validate()?;

    let lo = read.alignment_start.max(hap.ref_start);
    let hi = read.alignment_end().min(hap.ref_end);
    if lo >= hi {
        return Ok(None);
    }

    let trimmed = trim_cigar(&read.cigar, lo - read.alignment_start, hi - lo)?;
    let bases = &read.bases[trimmed.read_start..trimmed.read_start + trimmed.read_length];
    let quals =
        &read.base_qualities[trimmed.read_start..trimmed.read_start + trimmed.read_length];

    let lead = leading_clip(&trimmed.cigar);
    let trail = trailing_clip(&trimmed.cigar);
    let core_end = trimmed.cigar.len() - usize::from(trail > 0);
    let core_start = usize::from(lead > 0).min(core_end);
    let core = &trimmed.cigar[core_start..core_end];

    let (vs, ve) = (hap.variant_start, hap.variant_end);
    let mut parts = Partition::default();
    let mut ref_pos = lo;
    for op in core {
        if consumes_reference(op) {
            let end = ref_pos + op.len() as i64;
            let mut cut = ref_pos;
            for boundary in [vs, ve, end] {
                if boundary > cut && boundary <= end {
                    parts.push(cut, vs, ve, with_len(op, (boundary - cut) as u32));
                    cut = boundary;
                }
            }
            ref_pos = end;
        } else if consumes_query(op) {
            parts.push(ref_pos - 1, vs, ve, *op);
        }
    }

    let starts_inside = lo > vs && lo < ve;
    let ends_inside = hi > vs && hi < ve;
    let covers_allele = lo <= vs && hi >= ve;
    if starts_inside && ends_inside {
        return Ok(None);
    }
    let mid_bases = query_length(&parts.mid) as u32;
    let allele_len = hap.allele_len as u32;

    let mut cigar = Vec::with_capacity(core.len() + 4);
    push_op(
        &mut cigar,
        Cigar::SoftClip(lead + if starts_inside { mid_bases } else { 0 }),
    );
    for op in parts.left {
        push_op(&mut cigar, op);
    }
    if covers_allele {
        push_op(&mut cigar, Cigar::Match(mid_bases.min(allele_len)));
        if mid_bases > allele_len {
            push_op(&mut cigar, Cigar::Ins(mid_bases - allele_len));
        } else {
            push_op(&mut cigar, Cigar::Del(allele_len - mid_bases));
        }
    }
    for op in parts.right {
        push_op(&mut cigar, op);
    }
    push_op(
        &mut cigar,
        Cigar::SoftClip(trail + if ends_inside { mid_bases } else { 0 }),
    );

    if !cigar.iter().any(|op| consumes_reference(op)) {
        return Ok(None);
    }

    let variant_col = vs - hap.ref_start;
    let alignment_start = if lo < vs {
        lo - hap.ref_start
    } else if covers_allele {
        variant_col
    } else {
        variant_col + allele_len as i64 + (lo - ve).max(0)
    };

    let realigned = Read {
        name: read.name.clone(),
        read_number: read.read_number,
        reference_name: read.reference_name.clone(),
        alignment_start,
        mapping_quality: read.mapping_quality,
        is_reverse: read.is_reverse,
        cigar,
        bases: bases.to_vec(),
        base_qualities: quals.to_vec(),
    };

    if realigned.alignment_end() > hap.width() as i64 {
        return Err(PileupError::invalid_alignment(format!(
            "read {} extends past the haplotype after re-anchoring",
            read.key()
        )));
    }
    realigned.validate()?;
    Ok(Some(realigned))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Haplotype over [90, ref_end) for a reference allele at [100, 100 + ref_len)
    fn hap(ref_len: i64, allele_len: usize) -> Haplotype {
        let width = 21;
        let suffix = (11 - allele_len) as i64;
        Haplotype {
            reference_name: "chr1".to_string(),
            sequence: vec![b'A'; width],
            ref_start: 90,
            ref_end: 100 + ref_len + suffix,
            variant_start: 100,
            variant_end: 100 + ref_len,
            allele_len,
        }
    }

    fn read(start: i64, cigar: Vec<Cigar>) -> Read {
        let len = query_length(&cigar) as usize;
        Read {
            name: "r".to_string(),
            read_number: 1,
            reference_name: "chr1".to_string(),
            alignment_start: start,
            mapping_quality: 60,
            is_reverse: false,
            cigar,
            bases: (0..len).map(|i| b"ACGT"[i % 4]).collect(),
            base_qualities: (0..len as u8).collect(),
        }
    }

    #[test]
    fn test_insertion_supporting_read_becomes_all_match() {
        // A -> ATT insertion; read carries the 2-base insertion
        let r = read(95, vec![Cigar::Match(6), Cigar::Ins(2), Cigar::Match(5)]);
        let realigned = realign_to_haplotype(&r, &hap(1, 3)).unwrap().unwrap();
        assert_eq!(realigned.alignment_start, 5);
        assert_eq!(realigned.cigar, vec![Cigar::Match(13)]);
        assert_eq!(realigned.bases, r.bases);
    }

    #[test]
    fn test_reference_read_gets_deletion_on_insertion_haplotype() {
        let r = read(95, vec![Cigar::SoftClip(3), Cigar::Match(11)]);
        let realigned = realign_to_haplotype(&r, &hap(1, 3)).unwrap().unwrap();
        assert_eq!(realigned.alignment_start, 5);
        assert_eq!(
            realigned.cigar,
            vec![
                Cigar::SoftClip(3),
                Cigar::Match(6),
                Cigar::Del(2),
                Cigar::Match(5),
            ]
        );
        assert_eq!(realigned.alignment_end(), 18);
    }

    #[test]
    fn test_reference_read_gets_insertion_on_deletion_haplotype() {
        // ACGT -> A deletion; read spans it with 4 reference bases
        let r = read(96, vec![Cigar::Match(12)]);
        let realigned = realign_to_haplotype(&r, &hap(4, 1)).unwrap().unwrap();
        assert_eq!(realigned.alignment_start, 6);
        assert_eq!(
            realigned.cigar,
            vec![Cigar::Match(5), Cigar::Ins(3), Cigar::Match(4)]
        );
    }

    #[test]
    fn test_read_starting_inside_allele_is_clipped() {
        let r = read(102, vec![Cigar::Match(8)]);
        let realigned = realign_to_haplotype(&r, &hap(4, 1)).unwrap().unwrap();
        assert_eq!(realigned.cigar, vec![Cigar::SoftClip(2), Cigar::Match(6)]);
        assert_eq!(realigned.alignment_start, 11);
    }

    #[test]
    fn test_read_ending_inside_allele_is_clipped() {
        let r = read(95, vec![Cigar::Match(7)]);
        let realigned = realign_to_haplotype(&r, &hap(4, 1)).unwrap().unwrap();
        assert_eq!(realigned.cigar, vec![Cigar::Match(5), Cigar::SoftClip(2)]);
        assert_eq!(realigned.alignment_start, 5);
    }

    #[test]
    fn test_unplaceable_reads() {
        let h = hap(4, 1);
        assert!(realign_to_haplotype(&read(101, vec![Cigar::Match(2)]), &h)
            .unwrap()
            .is_none());
        assert!(realign_to_haplotype(&read(500, vec![Cigar::Match(20)]), &h)
            .unwrap()
            .is_none());
        let mut other_contig = read(95, vec![Cigar::Match(10)]);
        other_contig.reference_name = "chr2".to_string();
        assert!(realign_to_haplotype(&other_contig, &h).unwrap().is_none());
    }

    #[test]
    fn test_reads_clear_of_the_allele_are_shifted() {
        let h = hap(4, 1);
        let left = realign_to_haplotype(&read(92, vec![Cigar::Match(6)]), &h)
            .unwrap()
            .unwrap();
        assert_eq!(left.alignment_start, 2);
        assert_eq!(left.cigar, vec![Cigar::Match(6)]);

        // Right of a 3-base deletion: shifted left by 3
        let right = realign_to_haplotype(&read(106, vec![Cigar::Match(5)]), &h)
            .unwrap()
            .unwrap();
        assert_eq!(right.alignment_start, 13);
        assert_eq!(right.cigar, vec![Cigar::Match(5)]);
    }

    #[test]
    fn test_read_overhanging_haplotype_is_trimmed() {
        // Haplotype span [90, 109) for the insertion case
        let r = read(80, vec![Cigar::Match(40)]);
        let realigned = realign_to_haplotype(&r, &hap(1, 3)).unwrap().unwrap();
        assert_eq!(realigned.alignment_start, 0);
        assert_eq!(realigned.bases.len(), 19);
        assert_eq!(realigned.base_qualities[0], 10);
        assert_eq!(realigned.alignment_end(), 21);
    }
}
