//! Example records and packing of primary plus alt-aligned images
//!
//! The packed image is row-major `[row][column][channel]`. How alt images
//! join the primary image depends on [`AltAlignedPileup`]:
//!
//! | mode            | height         | channels            |
//! |-----------------|----------------|---------------------|
//! | `none`          | `h`            | `c`                 |
//! | `base_channels` | `h`            | `c + n_alt`         |
//! | `diff_channels` | `h`            | `c + n_alt`         |
//! | `rows`          | `h * (1+n_alt)`| `c`                 |
//!
//! The generator always passes the same `n_alt` within one run (see
//! `MakeExamplesOptions::alt_image_slots`), so every example of a run has
//! the same shape.

use std::fmt;

use crate::config::AltAlignedPileup;
use crate::error::{PileupError, Result};
use crate::pileup_image::PileupImage;
use crate::types::{GenomicRange, Variant};

/// Declared geometry of a packed image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageShape {
    pub fn num_bytes(&self) -> usize {
        self.height * self.width * self.channels
    }
}

impl fmt::Display for ImageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

fn check_same_geometry(primary: &PileupImage, alt: &PileupImage) -> Result<()> {
    if alt.height() != primary.height()
        || alt.width() != primary.width()
        || alt.num_channels() != primary.num_channels()
    {
        return Err(PileupError::ShapeMismatch {
            expected: format!(
                "{}x{}x{}",
                primary.height(),
                primary.width(),
                primary.num_channels()
            ),
            found: format!("{}x{}x{}", alt.height(), alt.width(), alt.num_channels()),
        });
    }
    Ok(())
}

/// Pack the primary image and its alt images into one buffer
///
/// `read_base_channel` is required by the channel modes; alt images must
/// share the primary image's geometry.
pub fn fill_pileup_array(
    primary: &PileupImage,
    alt_images: &[PileupImage],
    mode: AltAlignedPileup,
    read_base_channel: Option<usize>,
) -> Result<(Vec<u8>, ImageShape)> {
    for alt in alt_images {
        check_same_geometry(primary, alt)?;
    }
    let (height, width, channels) = (primary.height(), primary.width(), primary.num_channels());

    let alt_images = if mode == AltAlignedPileup::None {
        &[][..]
    } else {
        alt_images
    };

    match mode {
        AltAlignedPileup::None | AltAlignedPileup::Rows => {
            let shape = ImageShape {
                height: height * (1 + alt_images.len()),
                width,
                channels,
            };
            let mut buffer = Vec::with_capacity(shape.num_bytes());
            for image in std::iter::once(primary).chain(alt_images.iter()) {
                for row in image.rows() {
                    buffer.extend_from_slice(row);
                }
            }
            Ok((buffer, shape))
        }
        AltAlignedPileup::BaseChannels | AltAlignedPileup::DiffChannels => {
            let rb = read_base_channel.ok_or_else(|| {
                PileupError::config(format!("{} packing needs the read_base channel", mode))
            })?;
            let shape = ImageShape {
                height,
                width,
                channels: channels + alt_images.len(),
            };
            let mut buffer = Vec::with_capacity(shape.num_bytes());
            for row in 0..height {
                for col in 0..width {
                    let pixel = primary.pixel(row, col);
                    buffer.extend_from_slice(pixel);
                    for alt in alt_images {
                        let alt_base = alt.pixel(row, col)[rb];
                        let value = if mode == AltAlignedPileup::BaseChannels {
                            alt_base
                        } else {
                            alt_base.abs_diff(pixel[rb])
                        };
                        buffer.push(value);
                    }
                }
            }
            Ok((buffer, shape))
        }
    }
}

// ============================================================================
// Example
// ============================================================================

const EXAMPLE_MAGIC: &[u8; 4] = b"PLEX";
const EXAMPLE_VERSION: u16 = 1;

/// One encoded example for one (candidate, allele combination, role)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub role: String,
    pub sample_name: String,
    pub variant: Variant,
    pub alt_combination: Vec<String>,
    pub alt_allele_indices: Vec<usize>,
    /// Reference window of the primary image
    pub locus: GenomicRange,
    pub shape: ImageShape,
    pub image: Vec<u8>,
    /// Truth label, filled in by labeling stages downstream
    pub label: Option<i32>,
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

impl Example {
    /// Serialize as a little-endian record:
    ///
    /// ```text
    /// "PLEX" u16:version
    /// str:role str:sample_name
    /// str:contig i64:start str:ref u32:n_alts {str:alt}
    /// u32:n_combo {str:alt u32:index}
    /// str:locus_contig i64:locus_start i64:locus_end
    /// u32:height u32:width u32:channels u64:n_bytes bytes
    /// u8:has_label [i32:label]
    /// ```
    /// where `str` is `u32:len` followed by UTF-8 bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.image.len() + 256);
        out.extend_from_slice(EXAMPLE_MAGIC);
        out.extend_from_slice(&EXAMPLE_VERSION.to_le_bytes());

        put_str(&mut out, &self.role);
        put_str(&mut out, &self.sample_name);

        put_str(&mut out, &self.variant.reference_name);
        out.extend_from_slice(&self.variant.start.to_le_bytes());
        put_str(&mut out, &self.variant.reference_bases);
        out.extend_from_slice(&(self.variant.alternate_bases.len() as u32).to_le_bytes());
        for alt in &self.variant.alternate_bases {
            put_str(&mut out, alt);
        }

        out.extend_from_slice(&(self.alt_combination.len() as u32).to_le_bytes());
        for (alt, idx) in self.alt_combination.iter().zip(&self.alt_allele_indices) {
            put_str(&mut out, alt);
            out.extend_from_slice(&(*idx as u32).to_le_bytes());
        }

        put_str(&mut out, &self.locus.reference_name);
        out.extend_from_slice(&self.locus.start.to_le_bytes());
        out.extend_from_slice(&self.locus.end.to_le_bytes());

        out.extend_from_slice(&(self.shape.height as u32).to_le_bytes());
        out.extend_from_slice(&(self.shape.width as u32).to_le_bytes());
        out.extend_from_slice(&(self.shape.channels as u32).to_le_bytes());
        out.extend_from_slice(&(self.image.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.image);

        match self.label {
            Some(label) => {
                out.push(1);
                out.extend_from_slice(&label.to_le_bytes());
            }
            None => out.push(0),
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 2 rows x 2 columns x 2 channels; every byte is `fill + index`
    fn image(fill: u8) -> PileupImage {
        let mut img = PileupImage::new(2, 2);
        img.push_row(vec![fill, fill + 1, fill + 2, fill + 3]).unwrap();
        img.push_row(vec![fill + 4, fill + 5, fill + 6, fill + 7]).unwrap();
        img
    }

    #[test]
    fn test_none_ignores_alt_images() {
        let (buf, shape) =
            fill_pileup_array(&image(0), &[image(100)], AltAlignedPileup::None, Some(0)).unwrap();
        assert_eq!(shape, ImageShape { height: 2, width: 2, channels: 2 });
        assert_eq!(buf, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_rows_stacks_alt_images() {
        let (buf, shape) = fill_pileup_array(
            &image(0),
            &[image(100), image(200)],
            AltAlignedPileup::Rows,
            Some(0),
        )
        .unwrap();
        assert_eq!(shape.height, 6);
        assert_eq!(buf.len(), shape.num_bytes());
        assert_eq!(&buf[8..12], &[100, 101, 102, 103]);
        assert_eq!(&buf[16..], &[200, 201, 202, 203, 204, 205, 206, 207]);
    }

    #[test]
    fn test_base_channels_appends_read_base() {
        let (buf, shape) = fill_pileup_array(
            &image(0),
            &[image(100)],
            AltAlignedPileup::BaseChannels,
            Some(0),
        )
        .unwrap();
        assert_eq!(shape, ImageShape { height: 2, width: 2, channels: 3 });
        assert_eq!(buf, vec![0, 1, 100, 2, 3, 102, 4, 5, 104, 6, 7, 106]);
    }

    #[test]
    fn test_diff_channels_holds_absolute_difference() {
        let (buf, _) = fill_pileup_array(
            &image(50),
            &[image(10)],
            AltAlignedPileup::DiffChannels,
            Some(1),
        )
        .unwrap();
        // Channel 1 of every pixel: primary 50+k vs alt 10+k
        assert_eq!(buf, vec![50, 51, 40, 52, 53, 40, 54, 55, 40, 56, 57, 40]);
    }

    #[test]
    fn test_geometry_mismatch() {
        let mut short = PileupImage::new(2, 2);
        short.push_row(vec![0; 4]).unwrap();
        let result = fill_pileup_array(&image(0), &[short], AltAlignedPileup::Rows, Some(0));
        assert!(matches!(result, Err(PileupError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_encode_layout() {
        let example = Example {
            role: "child".to_string(),
            sample_name: "HG002".to_string(),
            variant: Variant::new("chr1", 7, "A", vec!["T".to_string()]),
            alt_combination: vec!["T".to_string()],
            alt_allele_indices: vec![0],
            locus: GenomicRange::new("chr1", 5, 10),
            shape: ImageShape { height: 1, width: 1, channels: 2 },
            image: vec![9, 8],
            label: None,
        };
        let bytes = example.encode();
        assert_eq!(&bytes[..4], b"PLEX");
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 1);
        assert_eq!(u32::from_le_bytes(bytes[6..10].try_into().unwrap()), 5);
        assert_eq!(&bytes[10..15], b"child");
        assert_eq!(&bytes[bytes.len() - 3..], &[9, 8, 0]);
        // Deterministic
        assert_eq!(bytes, example.encode());
    }
}
