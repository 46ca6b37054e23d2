//! Configuration for pileup example generation
//!
//! One options struct drives the whole generator. The textual option values
//! accepted from the command line or Python map onto the enums defined here;
//! there is no second copy of these vocabularies anywhere else.

use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashSet;

use crate::error::{PileupError, Result};

// ============================================================================
// Option Enums
// ============================================================================

/// How alt-aligned images are packed next to the primary image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AltAlignedPileup {
    /// Primary image only
    #[default]
    None,
    /// One extra `read_base` channel per alt image
    BaseChannels,
    /// One extra channel per alt image holding the base difference to the primary
    DiffChannels,
    /// Alt images stacked below the primary image
    Rows,
}

impl AltAlignedPileup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BaseChannels => "base_channels",
            Self::DiffChannels => "diff_channels",
            Self::Rows => "rows",
        }
    }
}

impl FromStr for AltAlignedPileup {
    type Err = PileupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "base_channels" => Ok(Self::BaseChannels),
            "diff_channels" => Ok(Self::DiffChannels),
            "rows" => Ok(Self::Rows),
            other => Err(PileupError::config(format!(
                "unknown alt_aligned_pileup mode '{}' (expected none, base_channels, diff_channels or rows)",
                other
            ))),
        }
    }
}

impl fmt::Display for AltAlignedPileup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which variants get alt-aligned images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AltAlignTypes {
    /// Indels and multi-base (complex) reference alleles
    #[default]
    Indels,
    /// Every variant, SNPs included
    All,
}

impl FromStr for AltAlignTypes {
    type Err = PileupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "indels" => Ok(Self::Indels),
            "all" => Ok(Self::All),
            other => Err(PileupError::config(format!(
                "unknown types_to_alt_align '{}' (expected indels or all)",
                other
            ))),
        }
    }
}

/// Whether pairs of alt alleles are imaged together at multi-allelic sites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MultiAllelicMode {
    #[default]
    AddHetAltImages,
    NoHetAltImages,
}

impl FromStr for MultiAllelicMode {
    type Err = PileupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "add_het_alt_images" => Ok(Self::AddHetAltImages),
            "no_het_alt_images" => Ok(Self::NoHetAltImages),
            other => Err(PileupError::config(format!(
                "unknown multi_allelic_mode '{}'",
                other
            ))),
        }
    }
}

/// One byte-valued feature drawn for every pixel of a read row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    ReadBase,
    BaseQuality,
    MappingQuality,
    Strand,
    ReadSupportsVariant,
    BaseDiffersFromRef,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::ReadBase,
        Channel::BaseQuality,
        Channel::MappingQuality,
        Channel::Strand,
        Channel::ReadSupportsVariant,
        Channel::BaseDiffersFromRef,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadBase => "read_base",
            Self::BaseQuality => "base_quality",
            Self::MappingQuality => "mapping_quality",
            Self::Strand => "strand",
            Self::ReadSupportsVariant => "read_supports_variant",
            Self::BaseDiffersFromRef => "base_differs_from_ref",
        }
    }
}

impl FromStr for Channel {
    type Err = PileupError;

    fn from_str(s: &str) -> Result<Self> {
        Channel::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| PileupError::config(format!("unknown channel '{}'", s)))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a comma-separated channel list, e.g. `read_base,base_quality`
pub fn parse_channels(list: &str) -> Result<Vec<Channel>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Channel::from_str)
        .collect()
}

// ============================================================================
// Options
// ============================================================================

/// Per-role settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleOptions {
    /// Role name, e.g. `child`, `parent1`
    pub role: String,
    /// Sample name written into examples
    pub name: String,
    /// Indices of the samples whose reads are stacked in this role's images
    pub order: Vec<usize>,
    /// Read rows reserved for this sample when it appears in an image
    pub max_reads: usize,
    /// Destination identifier of the role's sink (a file path for file sinks)
    pub output: String,
}

impl SampleOptions {
    pub fn new(role: impl Into<String>, order: Vec<usize>) -> Self {
        let role = role.into();
        Self {
            name: role.clone(),
            output: format!("{}.examples", role),
            role,
            order,
            max_reads: DEFAULT_MAX_READS,
        }
    }
}

pub const DEFAULT_WIDTH: usize = 221;
pub const DEFAULT_MAX_READS: usize = 98;

/// Options for [`crate::make_examples::ExamplesGenerator`]
#[derive(Debug, Clone)]
pub struct MakeExamplesOptions {
    /// Image width in columns; odd so the variant sits on the centre column
    pub width: usize,
    /// Read budget given to samples added through [`MakeExamplesOptions::add_sample`]
    pub max_reads: usize,
    pub alt_aligned_pileup: AltAlignedPileup,
    pub types_to_alt_align: AltAlignTypes,
    pub multi_allelic_mode: MultiAllelicMode,
    /// Ordered channel set of every image row
    pub channels: Vec<Channel>,
    /// Reads below this mapping quality are not drawn
    pub min_mapping_quality: u8,
    /// Seed of the deterministic downsampling hash
    pub downsample_seed: u64,
    pub samples: Vec<SampleOptions>,
}

impl Default for MakeExamplesOptions {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            max_reads: DEFAULT_MAX_READS,
            alt_aligned_pileup: AltAlignedPileup::None,
            types_to_alt_align: AltAlignTypes::Indels,
            multi_allelic_mode: MultiAllelicMode::AddHetAltImages,
            channels: Channel::ALL.to_vec(),
            min_mapping_quality: 0,
            downsample_seed: 0,
            samples: vec![SampleOptions::new("default", vec![0])],
        }
    }
}

impl MakeExamplesOptions {
    /// Columns on each side of the variant column
    pub fn half_width(&self) -> usize {
        self.width / 2
    }

    /// Index of the `read_base` channel, if configured
    pub fn read_base_channel(&self) -> Option<usize> {
        self.channels.iter().position(|c| *c == Channel::ReadBase)
    }

    /// Alt-aligned images packed into every example of a run
    ///
    /// Fixed per run so all examples share one geometry: the largest
    /// allele combination the multi-allelic mode can produce, or zero when
    /// alt alignment is off.
    pub fn alt_image_slots(&self) -> usize {
        match (self.alt_aligned_pileup, self.multi_allelic_mode) {
            (AltAlignedPileup::None, _) => 0,
            (_, MultiAllelicMode::AddHetAltImages) => 2,
            (_, MultiAllelicMode::NoHetAltImages) => 1,
        }
    }

    /// Append a sample using the default read budget and return it for tweaking
    pub fn add_sample(&mut self, role: impl Into<String>, order: Vec<usize>) -> &mut SampleOptions {
        let mut sample = SampleOptions::new(role, order);
        sample.max_reads = self.max_reads;
        self.samples.push(sample);
        let last = self.samples.len() - 1;
        &mut self.samples[last]
    }

    /// Options for the role, if configured
    pub fn sample(&self, role: &str) -> Option<&SampleOptions> {
        self.samples.iter().find(|s| s.role == role)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width < 3 || self.width % 2 == 0 {
            return Err(PileupError::config(format!(
                "width must be odd and at least 3, got {}",
                self.width
            )));
        }
        if self.channels.is_empty() {
            return Err(PileupError::config("at least one channel is required"));
        }
        let mut seen = FxHashSet::default();
        for channel in &self.channels {
            if !seen.insert(*channel) {
                return Err(PileupError::config(format!(
                    "channel '{}' listed more than once",
                    channel
                )));
            }
        }
        if matches!(
            self.alt_aligned_pileup,
            AltAlignedPileup::BaseChannels | AltAlignedPileup::DiffChannels
        ) && self.read_base_channel().is_none()
        {
            return Err(PileupError::config(format!(
                "alt_aligned_pileup={} requires the read_base channel",
                self.alt_aligned_pileup
            )));
        }
        if self.samples.is_empty() {
            return Err(PileupError::config("at least one sample is required"));
        }
        let mut roles = FxHashSet::default();
        for sample in &self.samples {
            if !roles.insert(sample.role.as_str()) {
                return Err(PileupError::config(format!(
                    "role '{}' configured more than once",
                    sample.role
                )));
            }
            if sample.max_reads == 0 {
                return Err(PileupError::config(format!(
                    "role '{}' has max_reads = 0",
                    sample.role
                )));
            }
            if sample.order.is_empty() {
                return Err(PileupError::config(format!(
                    "role '{}' has an empty sample order",
                    sample.role
                )));
            }
            if let Some(bad) = sample.order.iter().find(|&&i| i >= self.samples.len()) {
                return Err(PileupError::config(format!(
                    "role '{}' orders sample {} but only {} samples are configured",
                    sample.role,
                    bad,
                    self.samples.len()
                )));
            }
        }
        Ok(())
    }
}
