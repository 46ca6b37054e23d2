//! Pileup image encoding
//!
//! An image is a stack of rows, each `width` columns of `channels.len()`
//! bytes. Column `c` shows reference position `region_start + c`; for alt
//! images the "reference" is the haplotype and `region_start` is 0.
//!
//! Layout of one image:
//! ```text
//! row 0            reference row
//! row 1            variant row
//! rows 2..         one block of `max_reads` rows per sample, in sample order
//! ```
//! Rows never drawn (short blocks, filtered or unplaceable reads) stay all
//! zero, the "no data" pixel.

use rust_htslib::bam::record::Cigar;
use rustc_hash::FxHashSet;

use crate::cigar_utils::trim_cigar;
use crate::config::{Channel, MakeExamplesOptions};
use crate::error::{PileupError, Result};
use crate::types::Read;

// ============================================================================
// Channel values
// ============================================================================

pub const MAX_PIXEL: u8 = 254;
pub const BASE_QUALITY_CAP: u32 = 40;
pub const MAPPING_QUALITY_CAP: u32 = 60;
pub const FORWARD_STRAND: u8 = 70;
pub const REVERSE_STRAND: u8 = 240;
pub const SUPPORTS_ALT: u8 = 254;
pub const SUPPORTS_OTHER: u8 = 127;
pub const DIFFERS: u8 = 254;
pub const MATCHES_REF: u8 = 63;

/// Pixel value of a nucleotide in the `read_base` channel
#[inline]
pub fn base_color(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'A' => 250,
        b'G' => 180,
        b'T' => 100,
        b'C' => 30,
        _ => 0,
    }
}

#[inline]
fn scaled(value: u32, cap: u32) -> u8 {
    (value.min(cap) * MAX_PIXEL as u32 / cap) as u8
}

/// All channel values of one column before projection onto the channel set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Pixel {
    base: u8,
    quality: u8,
    mapping_quality: u8,
    strand: u8,
    supports: u8,
    differs: u8,
}

impl Pixel {
    fn get(&self, channel: Channel) -> u8 {
        match channel {
            Channel::ReadBase => self.base,
            Channel::BaseQuality => self.quality,
            Channel::MappingQuality => self.mapping_quality,
            Channel::Strand => self.strand,
            Channel::ReadSupportsVariant => self.supports,
            Channel::BaseDiffersFromRef => self.differs,
        }
    }
}

// ============================================================================
// Image
// ============================================================================

/// Rows of one rendered image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PileupImage {
    width: usize,
    num_channels: usize,
    rows: Vec<Vec<u8>>,
}

impl PileupImage {
    pub fn new(width: usize, num_channels: usize) -> Self {
        Self {
            width,
            num_channels,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<u8>) -> Result<()> {
        let expected = self.width * self.num_channels;
        if row.len() != expected {
            return Err(PileupError::ShapeMismatch {
                expected: format!("row of {} bytes", expected),
                found: format!("row of {} bytes", row.len()),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> &[u8] {
        &self.rows[index]
    }

    /// Channel bytes of one pixel
    pub fn pixel(&self, row: usize, col: usize) -> &[u8] {
        let start = col * self.num_channels;
        &self.rows[row][start..start + self.num_channels]
    }
}

/// Reads drawn for one sample: one entry per row, `None` leaves the row empty
#[derive(Debug, Clone)]
pub struct ReadBlock<'r> {
    pub reads: Vec<Option<&'r Read>>,
    pub max_reads: usize,
}

// ============================================================================
// Encoder
// ============================================================================

/// Renders reference, variant and read rows for a fixed width and channel set
#[derive(Debug, Clone)]
pub struct PileupImageEncoder {
    width: usize,
    channels: Vec<Channel>,
    min_mapping_quality: u8,
}

impl PileupImageEncoder {
    pub fn new(options: &MakeExamplesOptions) -> Self {
        Self {
            width: options.width,
            channels: options.channels.clone(),
            min_mapping_quality: options.min_mapping_quality,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// All-zero row
    pub fn empty_row(&self) -> Vec<u8> {
        vec![0; self.width * self.channels.len()]
    }

    fn put(&self, row: &mut [u8], col: usize, pixel: &Pixel) {
        let nc = self.channels.len();
        for (ci, channel) in self.channels.iter().enumerate() {
            row[col * nc + ci] = pixel.get(*channel);
        }
    }

    fn set_channel(&self, row: &mut [u8], col: usize, channel: Channel, value: u8) {
        if let Some(ci) = self.channels.iter().position(|c| *c == channel) {
            row[col * self.channels.len() + ci] = value;
        }
    }

    /// Reference bases drawn as a confident forward-strand read; `N` columns
    /// (contig padding) stay empty
    pub fn encode_reference_row(&self, ref_bases: &[u8]) -> Vec<u8> {
        let mut row = self.empty_row();
        for (col, &base) in ref_bases.iter().take(self.width).enumerate() {
            if base_color(base) == 0 {
                continue;
            }
            let pixel = Pixel {
                base: base_color(base),
                quality: MAX_PIXEL,
                mapping_quality: MAX_PIXEL,
                strand: FORWARD_STRAND,
                supports: SUPPORTS_OTHER,
                differs: MATCHES_REF,
            };
            self.put(&mut row, col, &pixel);
        }
        row
    }

    /// Candidate allele drawn over `span` columns starting at `start_col`
    ///
    /// Columns past the end of `allele` (deletions) carry no base. Every
    /// column is marked as differing when the allele and reference allele
    /// lengths disagree.
    pub fn encode_variant_row(
        &self,
        ref_bases: &[u8],
        start_col: usize,
        allele: &[u8],
        ref_allele_len: usize,
        span: usize,
    ) -> Vec<u8> {
        let mut row = self.empty_row();
        let is_indel = allele.len() != ref_allele_len;
        for k in 0..span {
            let col = start_col + k;
            if col >= self.width {
                break;
            }
            let base = allele.get(k).copied().unwrap_or(0);
            let ref_base = ref_bases.get(col).copied().unwrap_or(b'N');
            let differs = is_indel || !base.eq_ignore_ascii_case(&ref_base);
            let pixel = Pixel {
                base: base_color(base),
                quality: MAX_PIXEL,
                mapping_quality: MAX_PIXEL,
                strand: FORWARD_STRAND,
                supports: SUPPORTS_ALT,
                differs: if differs { DIFFERS } else { MATCHES_REF },
            };
            self.put(&mut row, col, &pixel);
        }
        row
    }

    /// Whether the read passes the drawing filters
    pub fn is_drawable(&self, read: &Read) -> bool {
        read.mapping_quality >= self.min_mapping_quality
    }

    /// Draw one read restricted to `[region_start, region_start + width)`
    ///
    /// Returns `Ok(None)` when the read is filtered or does not overlap the
    /// region, and `InvalidAlignment` when the record is malformed.
    pub fn encode_read(
        &self,
        read: &Read,
        region_start: i64,
        ref_bases: &[u8],
        supports_variant: bool,
    ) -> Result<Option<Vec<u8>>> {
        if !self.is_drawable(read) {
            return Ok(None);
        }
        read.validate()?;

        let region_end = region_start + self.width as i64;
        let lo = read.alignment_start.max(region_start);
        let hi = read.alignment_end().min(region_end);
        if lo >= hi {
            return Ok(None);
        }

        let trimmed = trim_cigar(&read.cigar, lo - read.alignment_start, hi - lo)?;

        let mapping_quality = scaled(read.mapping_quality as u32, MAPPING_QUALITY_CAP);
        let strand = if read.is_reverse {
            REVERSE_STRAND
        } else {
            FORWARD_STRAND
        };
        let supports = if supports_variant {
            SUPPORTS_ALT
        } else {
            SUPPORTS_OTHER
        };

        let mut row = self.empty_row();
        let first_col = (lo - region_start) as usize;
        let mut col = first_col;
        let mut read_pos = trimmed.read_start;
        let mut insertion_cols = Vec::new();

        for op in &trimmed.cigar {
            let len = op.len() as usize;
            match op {
                Cigar::Match(_) | Cigar::Equal(_) | Cigar::Diff(_) => {
                    for k in 0..len {
                        let base = read.bases[read_pos + k];
                        let ref_base = ref_bases.get(col + k).copied().unwrap_or(b'N');
                        let pixel = Pixel {
                            base: base_color(base),
                            quality: scaled(
                                read.base_qualities[read_pos + k] as u32,
                                BASE_QUALITY_CAP,
                            ),
                            mapping_quality,
                            strand,
                            supports,
                            differs: if base.eq_ignore_ascii_case(&ref_base) {
                                MATCHES_REF
                            } else {
                                DIFFERS
                            },
                        };
                        self.put(&mut row, col + k, &pixel);
                    }
                    col += len;
                    read_pos += len;
                }
                Cigar::Del(_) => {
                    let pixel = Pixel {
                        mapping_quality,
                        strand,
                        supports,
                        differs: DIFFERS,
                        ..Pixel::default()
                    };
                    for k in 0..len {
                        self.put(&mut row, col + k, &pixel);
                    }
                    col += len;
                }
                Cigar::RefSkip(_) => col += len,
                Cigar::Ins(_) => {
                    insertion_cols.push(col.saturating_sub(1).max(first_col));
                    read_pos += len;
                }
                Cigar::SoftClip(_) => read_pos += len,
                Cigar::HardClip(_) | Cigar::Pad(_) => {}
            }
        }

        for anchor in insertion_cols {
            if anchor < self.width {
                self.set_channel(&mut row, anchor, Channel::BaseDiffersFromRef, DIFFERS);
            }
        }
        Ok(Some(row))
    }

    /// Assemble a full image
    ///
    /// Each block contributes exactly `max_reads` rows. Reads that fail to
    /// encode are logged, counted in the returned total, and leave an empty
    /// row.
    pub fn encode(
        &self,
        region_start: i64,
        ref_bases: &[u8],
        reference_row: Vec<u8>,
        variant_row: Vec<u8>,
        blocks: &[ReadBlock<'_>],
        supporting_reads: &FxHashSet<String>,
    ) -> Result<(PileupImage, usize)> {
        let mut image = PileupImage::new(self.width, self.channels.len());
        image.push_row(reference_row)?;
        image.push_row(variant_row)?;

        let mut reads_skipped = 0;
        for block in blocks {
            for row_idx in 0..block.max_reads {
                let read = block.reads.get(row_idx).copied().flatten();
                let row = match read {
                    None => self.empty_row(),
                    Some(read) => {
                        let supports = supporting_reads.contains(&read.key());
                        match self.encode_read(read, region_start, ref_bases, supports) {
                            Ok(Some(row)) => row,
                            Ok(None) => self.empty_row(),
                            Err(e) => {
                                log::debug!("Skipping read {}: {}", read.key(), e);
                                reads_skipped += 1;
                                self.empty_row()
                            }
                        }
                    }
                };
                image.push_row(row)?;
            }
        }
        Ok((image, reads_skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder(width: usize) -> PileupImageEncoder {
        PileupImageEncoder::new(&MakeExamplesOptions {
            width,
            ..Default::default()
        })
    }

    fn read(start: i64, cigar: Vec<Cigar>, bases: &[u8]) -> Read {
        Read {
            name: "r".to_string(),
            read_number: 1,
            reference_name: "chr1".to_string(),
            alignment_start: start,
            mapping_quality: 60,
            is_reverse: false,
            cigar,
            bases: bases.to_vec(),
            base_qualities: vec![40; bases.len()],
        }
    }

    // Channel order of the default options
    const BASE: usize = 0;
    const QUAL: usize = 1;
    const DIFF: usize = 5;

    #[test]
    fn test_channel_values() {
        assert_eq!(base_color(b'a'), 250);
        assert_eq!(base_color(b'N'), 0);
        assert_eq!(scaled(40, BASE_QUALITY_CAP), 254);
        assert_eq!(scaled(90, BASE_QUALITY_CAP), 254);
        assert_eq!(scaled(20, BASE_QUALITY_CAP), 127);
        assert_eq!(scaled(30, MAPPING_QUALITY_CAP), 127);
    }

    #[test]
    fn test_reference_row_skips_padding() {
        let enc = encoder(5);
        let row = enc.encode_reference_row(b"NNACG");
        assert!(row[..12].iter().all(|&b| b == 0));
        assert_eq!(row[2 * 6 + BASE], 250);
        assert_eq!(row[4 * 6 + BASE], 180);
    }

    #[test]
    fn test_read_partially_covering_region() {
        let enc = encoder(7);
        // Region [100, 107); read covers [103, 110)
        let r = read(103, vec![Cigar::Match(7)], b"ACGTACG");
        let row = enc
            .encode_read(&r, 100, b"GGGACTT", false)
            .unwrap()
            .unwrap();
        assert_eq!(row.len(), 7 * 6);
        assert!(row[..3 * 6].iter().all(|&b| b == 0));
        assert_eq!(row[3 * 6 + BASE], 250);
        assert_eq!(row[3 * 6 + DIFF], MATCHES_REF);
        // G vs T at column 5
        assert_eq!(row[5 * 6 + BASE], 180);
        assert_eq!(row[5 * 6 + DIFF], DIFFERS);
    }

    #[test]
    fn test_deletion_and_insertion_pixels() {
        let enc = encoder(9);
        // 2M 2D 2M 1I 2M starting at region column 0
        let r = read(
            0,
            vec![
                Cigar::Match(2),
                Cigar::Del(2),
                Cigar::Match(2),
                Cigar::Ins(1),
                Cigar::Match(2),
            ],
            b"AAGGTCC",
        );
        let row = enc
            .encode_read(&r, 0, b"AACCGGCCA", false)
            .unwrap()
            .unwrap();
        // Deleted columns 2 and 3
        for col in [2, 3] {
            assert_eq!(row[col * 6 + BASE], 0);
            assert_eq!(row[col * 6 + QUAL], 0);
            assert_eq!(row[col * 6 + DIFF], DIFFERS);
        }
        // Insertion anchored at column 5 (last G before the T)
        assert_eq!(row[5 * 6 + BASE], 180);
        assert_eq!(row[5 * 6 + DIFF], DIFFERS);
        assert_eq!(row[4 * 6 + DIFF], MATCHES_REF);
        // Bases after the insertion: CC at columns 6, 7
        assert_eq!(row[6 * 6 + BASE], 30);
        assert_eq!(row[7 * 6 + BASE], 30);
        assert!(row[8 * 6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_low_mapping_quality_not_drawn() {
        let enc = PileupImageEncoder::new(&MakeExamplesOptions {
            width: 5,
            min_mapping_quality: 20,
            ..Default::default()
        });
        let mut r = read(0, vec![Cigar::Match(5)], b"ACGTA");
        r.mapping_quality = 10;
        assert!(enc.encode_read(&r, 0, b"ACGTA", false).unwrap().is_none());
    }

    #[test]
    fn test_malformed_read_is_error() {
        let enc = encoder(5);
        let r = read(0, vec![Cigar::Match(8)], b"ACGTA");
        assert!(matches!(
            enc.encode_read(&r, 0, b"ACGTA", false),
            Err(PileupError::InvalidAlignment { .. })
        ));
    }

    #[test]
    fn test_encode_shape_and_skips() {
        let enc = encoder(5);
        let good = read(0, vec![Cigar::Match(5)], b"ACGTA");
        let bad = read(0, vec![Cigar::Match(9)], b"ACGTA");
        let blocks = vec![
            ReadBlock {
                reads: vec![Some(&good), Some(&bad)],
                max_reads: 3,
            },
            ReadBlock {
                reads: vec![None, Some(&good)],
                max_reads: 2,
            },
        ];
        let ref_row = enc.encode_reference_row(b"ACGTA");
        let var_row = enc.encode_variant_row(b"ACGTA", 2, b"T", 1, 1);
        let (image, skipped) = enc
            .encode(0, b"ACGTA", ref_row, var_row, &blocks, &FxHashSet::default())
            .unwrap();
        assert_eq!(image.height(), 2 + 3 + 2);
        assert!(image.rows().iter().all(|r| r.len() == 5 * 6));
        assert_eq!(skipped, 1);
        assert!(image.row(3).iter().all(|&b| b == 0));
        assert!(image.row(5).iter().all(|&b| b == 0));
        assert_eq!(image.pixel(6, 0)[BASE], 250);
        // Variant row: T over G at column 2
        assert_eq!(image.pixel(1, 2)[BASE], 100);
        assert_eq!(image.pixel(1, 2)[DIFF], DIFFERS);
        assert!(image.pixel(1, 1).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_supporting_read_channel() {
        let enc = encoder(3);
        let r = read(0, vec![Cigar::Match(3)], b"ACG");
        let mut support = FxHashSet::default();
        support.insert("r/1".to_string());
        let blocks = vec![ReadBlock {
            reads: vec![Some(&r)],
            max_reads: 1,
        }];
        let (image, _) = enc
            .encode(
                0,
                b"ACG",
                enc.empty_row(),
                enc.empty_row(),
                &blocks,
                &support,
            )
            .unwrap();
        assert_eq!(image.pixel(2, 1)[4], SUPPORTS_ALT);
    }
}
