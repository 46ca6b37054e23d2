//! CIGAR arithmetic and window trimming
//!
//! Reads are re-anchored against haplotypes and clipped to image windows by
//! restricting their alignment to a reference sub-interval. The simple
//! arithmetic `read_offset = ref_offset` is wrong as soon as the alignment
//! carries insertions, deletions or clips, so every offset here is derived by
//! walking the operation list.
//!
//! ## CIGAR Operations
//! - M/=/X: consume both ref and query (1:1 mapping)
//! - I: consume query only (insertion in read)
//! - D/N: consume ref only (deletion/skip in read)
//! - S: consume query only (soft clip)
//! - H/P: consume neither
//!
//! ## Read-only operations at window edges
//!
//! An insertion or soft clip sits between two reference positions and has no
//! reference width. It is attributed to the reference base to its left (its
//! anchor); operations before the first reference base anchor to that base.
//! A read-only operation is kept by [`trim_cigar`] exactly when its anchor
//! lies inside the window. Consequently:
//! - a window starting right after an insertion skips the inserted bases,
//! - a window ending right after an insertion keeps them,
//! - trimming to the read's full span keeps leading and trailing clips.

use rust_htslib::bam::record::Cigar;

use crate::error::{PileupError, Result};

/// Result of restricting an alignment to a reference sub-window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimmedCigar {
    /// Operations restricted to the window, boundary operations truncated
    pub cigar: Vec<Cigar>,
    /// Offset into the read's bases of the first base inside the window
    pub read_start: usize,
    /// Number of read bases spanned by the window
    pub read_length: usize,
}

/// True for operations that advance along the reference
#[inline]
pub fn consumes_reference(op: &Cigar) -> bool {
    matches!(
        op,
        Cigar::Match(_) | Cigar::Equal(_) | Cigar::Diff(_) | Cigar::Del(_) | Cigar::RefSkip(_)
    )
}

/// True for operations that advance along the read
#[inline]
pub fn consumes_query(op: &Cigar) -> bool {
    matches!(
        op,
        Cigar::Match(_) | Cigar::Equal(_) | Cigar::Diff(_) | Cigar::Ins(_) | Cigar::SoftClip(_)
    )
}

/// Reference bases spanned by the operations (sum of M/=/X/D/N)
pub fn reference_length(cigar: &[Cigar]) -> u64 {
    cigar
        .iter()
        .filter(|op| consumes_reference(op))
        .map(|op| op.len() as u64)
        .sum()
}

/// Read bases consumed by the operations (sum of M/=/X/I/S)
pub fn query_length(cigar: &[Cigar]) -> u64 {
    cigar
        .iter()
        .filter(|op| consumes_query(op))
        .map(|op| op.len() as u64)
        .sum()
}

/// Same operation kind with a different length
pub fn with_len(op: &Cigar, len: u32) -> Cigar {
    match op {
        Cigar::Match(_) => Cigar::Match(len),
        Cigar::Ins(_) => Cigar::Ins(len),
        Cigar::Del(_) => Cigar::Del(len),
        Cigar::RefSkip(_) => Cigar::RefSkip(len),
        Cigar::SoftClip(_) => Cigar::SoftClip(len),
        Cigar::HardClip(_) => Cigar::HardClip(len),
        Cigar::Pad(_) => Cigar::Pad(len),
        Cigar::Equal(_) => Cigar::Equal(len),
        Cigar::Diff(_) => Cigar::Diff(len),
    }
}

/// Append an operation, merging it into the previous one when the kinds match.
/// Zero-length operations are dropped.
pub fn push_op(cigar: &mut Vec<Cigar>, op: Cigar) {
    if op.len() == 0 {
        return;
    }
    if let Some(last) = cigar.last_mut() {
        if std::mem::discriminant(last) == std::mem::discriminant(&op) {
            *last = with_len(last, last.len() + op.len());
            return;
        }
    }
    cigar.push(op);
}

/// Restrict an alignment to the reference window `[ref_start, ref_start + ref_length)`
///
/// Both coordinates are relative to the read's alignment start. Operations
/// straddling a window edge are split so the kept part consumes exactly the
/// in-window reference bases. Hard clips and pads are dropped.
///
/// # Returns
/// The trimmed operations, the read offset matching `ref_start` and the
/// number of read bases inside the window. A window that lies entirely
/// inside a deletion yields `read_length == 0` and a deletion-only cigar.
///
/// # Errors
/// `InvalidAlignment` for an empty cigar, a cigar without reference extent,
/// a non-positive window length, or a window outside the aligned span.
pub fn trim_cigar(cigar: &[Cigar], ref_start: i64, ref_length: i64) -> Result<TrimmedCigar> {
    if cigar.is_empty() {
        return Err(PileupError::invalid_alignment("cannot trim an empty cigar"));
    }
    let span = reference_length(cigar) as i64;
    if span == 0 {
        return Err(PileupError::invalid_alignment(
            "cigar does not consume any reference bases",
        ));
    }
    if ref_length <= 0 {
        return Err(PileupError::invalid_alignment(format!(
            "window length must be positive, got {}",
            ref_length
        )));
    }
    let ref_end = ref_start.checked_add(ref_length).ok_or_else(|| {
        PileupError::invalid_alignment(format!(
            "window start {} plus length {} overflows",
            ref_start, ref_length
        ))
    })?;
    if ref_start < 0 || ref_end > span {
        return Err(PileupError::invalid_alignment(format!(
            "window [{}, {}) is outside the aligned span [0, {})",
            ref_start, ref_end, span
        )));
    }

    let mut trimmed: Vec<Cigar> = Vec::with_capacity(cigar.len());
    let mut read_start: Option<usize> = None;
    let mut read_length: usize = 0;

    let mut ref_pos: i64 = 0;
    let mut read_pos: usize = 0;

    for op in cigar {
        let len = op.len() as i64;
        if len == 0 {
            continue;
        }

        if consumes_reference(op) {
            let op_end = ref_pos + len;
            let lo = ref_pos.max(ref_start);
            let hi = op_end.min(ref_end);
            let reads_bases = consumes_query(op);

            if lo < hi {
                if read_start.is_none() {
                    // Mid-deletion starts keep the read offset where it is
                    let offset = if reads_bases { (lo - ref_pos) as usize } else { 0 };
                    read_start = Some(read_pos + offset);
                }
                let kept = (hi - lo) as u32;
                if reads_bases {
                    read_length += kept as usize;
                }
                push_op(&mut trimmed, with_len(op, kept));
            }

            ref_pos = op_end;
            if reads_bases {
                read_pos += len as usize;
            }
        } else if consumes_query(op) {
            let anchor = (ref_pos - 1).max(0);
            if anchor >= ref_start && anchor < ref_end {
                if read_start.is_none() {
                    read_start = Some(read_pos);
                }
                read_length += len as usize;
                push_op(&mut trimmed, *op);
            }
            read_pos += len as usize;
        }
        // H and P consume neither sequence and are not carried over
    }

    Ok(TrimmedCigar {
        cigar: trimmed,
        read_start: read_start.unwrap_or(read_pos),
        read_length,
    })
}

// ============================================================================
// Tests
// ============================================================================
