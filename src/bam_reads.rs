//! BAM records to in-memory reads
//!
//! The generator works on plain [`Read`] values. This module pulls the
//! records overlapping a region out of an indexed BAM and converts them,
//! dropping records that never belong in a pileup.

use anyhow::{Context, Result};
use rust_htslib::bam::record::Cigar;
use rust_htslib::{bam, bam::Read as BamRead};

use crate::candidates::group_into_regions;
use crate::parallel::RegionTask;
use crate::types::{Candidate, GenomicRange, Read};

// Matches rust-htslib's internal decode table for BAM 4-bit base encoding.
const DECODE_BASE: &[u8; 16] = b"=ACMGRSVTWYHKDBN";

/// Quality byte htslib stores when a record has no qualities
const MISSING_QUALITY: u8 = 0xFF;

/// Decode a BAM record's 4-bit encoded sequence into `out`, replacing its
/// contents.
///
/// Skips the intermediate `read.seq().as_bytes()` vector; a caller decoding
/// many records can pass the same scratch buffer each time.
pub fn decode_seq_into(record: &bam::Record, out: &mut Vec<u8>) {
    let seq = record.seq();
    let len = seq.len();
    let encoded = seq.encoded;

    out.clear();
    out.resize(len, 0);

    // Two bases per packed byte (high then low nibble)
    for (i, packed) in encoded.iter().copied().enumerate() {
        let pos = i * 2;
        if pos >= len {
            break;
        }
        out[pos] = DECODE_BASE[(packed >> 4) as usize];
        if pos + 1 < len {
            out[pos + 1] = DECODE_BASE[(packed & 0x0F) as usize];
        }
    }
}

/// Copy a record's qualities into `out`; missing qualities become 0
pub fn copy_qual_into(record: &bam::Record, out: &mut Vec<u8>) {
    let qual = record.qual();
    out.clear();
    if qual.first() == Some(&MISSING_QUALITY) {
        out.resize(qual.len(), 0);
    } else {
        out.extend_from_slice(qual);
    }
}

/// Whether the record can appear in a pileup
///
/// Unmapped, secondary, supplementary, duplicate and QC-failed records are
/// excluded.
pub fn is_pileup_record(record: &bam::Record) -> bool {
    !(record.is_unmapped()
        || record.is_secondary()
        || record.is_supplementary()
        || record.is_duplicate()
        || record.is_quality_check_failed())
}

/// Convert one record; `reference_name` is the contig of its `tid`
pub fn record_to_read(record: &bam::Record, reference_name: &str) -> Read {
    let read_number = if !record.is_paired() {
        0
    } else if record.is_first_in_template() {
        1
    } else {
        2
    };

    // Each read owns its buffers, sized once from the record
    let mut bases = Vec::with_capacity(record.seq_len());
    decode_seq_into(record, &mut bases);
    let mut base_qualities = Vec::with_capacity(record.seq_len());
    copy_qual_into(record, &mut base_qualities);
    let cigar: Vec<Cigar> = record.cigar().iter().copied().collect();

    Read {
        name: String::from_utf8_lossy(record.qname()).into_owned(),
        read_number,
        reference_name: reference_name.to_string(),
        alignment_start: record.pos(),
        mapping_quality: record.mapq(),
        is_reverse: record.is_reverse(),
        cigar,
        bases,
        base_qualities,
    }
}

/// Fetch pileup-eligible reads overlapping `range`, in file order
pub fn fetch_reads(bam_path: &str, range: &GenomicRange) -> Result<Vec<Read>> {
    let mut bam = bam::IndexedReader::from_path(bam_path)
        .with_context(|| format!("Failed to open BAM file {}", bam_path))?;

    if bam.header().tid(range.reference_name.as_bytes()).is_none() {
        log::debug!("Contig {} not in {}; no reads", range.reference_name, bam_path);
        return Ok(Vec::new());
    }
    bam.fetch((range.reference_name.as_str(), range.start, range.end))
        .with_context(|| format!("Failed to fetch {} from {}", range, bam_path))?;

    let mut reads = Vec::new();
    let mut skipped = 0usize;
    // Pre-allocated record with read() is faster than the records() iterator
    let mut record = bam::Record::new();
    while let Some(result) = bam.read(&mut record) {
        result.with_context(|| format!("Failed to read BAM record in {}", range))?;
        if !is_pileup_record(&record) {
            skipped += 1;
            continue;
        }
        reads.push(record_to_read(&record, &range.reference_name));
    }

    log::debug!(
        "{}: {} reads from {} ({} filtered)",
        range,
        reads.len(),
        bam_path,
        skipped
    );
    Ok(reads)
}

/// One read set per BAM, in the order given
pub fn fetch_reads_per_sample(bam_paths: &[String], range: &GenomicRange) -> Result<Vec<Vec<Read>>> {
    bam_paths
        .iter()
        .map(|path| fetch_reads(path, range))
        .collect()
}

/// Group candidates into regions and load each region's reads
///
/// Reads are fetched over the region widened by `flank` on both sides, which
/// must cover the image window (and any haplotype) of every candidate in it.
pub fn build_region_tasks(
    candidates: Vec<Candidate>,
    bam_paths: &[String],
    region_size: i64,
    flank: i64,
) -> Result<Vec<RegionTask>> {
    group_into_regions(candidates, region_size)
        .into_iter()
        .map(|(region, candidates)| {
            let fetch_range = GenomicRange::new(
                region.reference_name.as_str(),
                (region.start - flank).max(0),
                region.end + flank,
            );
            let reads_per_sample = fetch_reads_per_sample(bam_paths, &fetch_range)?;
            Ok(RegionTask {
                region,
                candidates,
                reads_per_sample,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::record::CigarString;

    fn make_record(seq: &[u8], qual: &[u8], cigar: Vec<Cigar>) -> bam::Record {
        let cigar = CigarString(cigar);
        let mut rec = bam::Record::new();
        rec.set(b"q1", Some(&cigar), seq, qual);
        rec.set_pos(100);
        rec.set_mapq(42);
        rec
    }

    #[test]
    fn decode_seq_into_matches_rust_htslib() {
        let seq = b"ACGTNACGTN";
        let rec = make_record(seq, &[10u8; 10], vec![Cigar::Match(10)]);

        let mut buf = Vec::new();
        decode_seq_into(&rec, &mut buf);
        assert_eq!(buf, rec.seq().as_bytes());

        // Reuse the buffer with a shorter record: no stale tail
        let rec2 = make_record(b"NNNN", &[1, 2, 3, 4], vec![Cigar::Match(4)]);
        decode_seq_into(&rec2, &mut buf);
        assert_eq!(buf, rec2.seq().as_bytes());
        assert_eq!(buf.len(), 4);

        let mut quals = vec![99u8; 12];
        copy_qual_into(&rec2, &mut quals);
        assert_eq!(quals, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_record_to_read() {
        let mut rec = make_record(
            b"ACGTACGT",
            &[30, 31, 32, 33, 34, 35, 36, 37],
            vec![Cigar::SoftClip(2), Cigar::Match(4), Cigar::Ins(2)],
        );
        // paired, first in template, reverse strand
        rec.set_flags(0x1 | 0x40 | 0x10);

        let read = record_to_read(&rec, "chr7");
        assert_eq!(read.name, "q1");
        assert_eq!(read.read_number, 1);
        assert_eq!(read.key(), "q1/1");
        assert_eq!(read.reference_name, "chr7");
        assert_eq!(read.alignment_start, 100);
        assert_eq!(read.mapping_quality, 42);
        assert!(read.is_reverse);
        assert_eq!(read.bases, b"ACGTACGT");
        assert_eq!(read.base_qualities[7], 37);
        assert_eq!(read.reference_span(), 4);
        assert!(read.validate().is_ok());
    }

    #[test]
    fn test_missing_qualities_become_zero() {
        let rec = make_record(b"ACGT", &[0xFF; 4], vec![Cigar::Match(4)]);
        let read = record_to_read(&rec, "chr1");
        assert_eq!(read.base_qualities, vec![0; 4]);
        assert_eq!(read.read_number, 0);
    }

    #[test]
    fn test_pileup_record_filter() {
        let mut rec = make_record(b"ACGT", &[30; 4], vec![Cigar::Match(4)]);
        rec.set_flags(0);
        assert!(is_pileup_record(&rec));
        for flag in [0x4u16, 0x100, 0x200, 0x400, 0x800] {
            rec.set_flags(flag);
            assert!(!is_pileup_record(&rec), "flag {:#x}", flag);
        }
    }
}
