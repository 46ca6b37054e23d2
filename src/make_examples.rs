//! Example generation for candidate variants
//!
//! For every candidate and every allele combination the generator renders a
//! primary pileup image over the reference window centred on the variant,
//! optionally renders one alt-aligned image per alt allele against that
//! allele's haplotype, packs everything into one buffer and hands the
//! resulting [`Example`] to the role's sink.
//!
//! # Error policy
//! - malformed reads are dropped from the image and counted
//! - candidate-level failures (bad alleles, haplotypes off the contig end,
//!   unknown contigs) skip the candidate with a warning
//! - sink and configuration failures abort the call

use std::hash::{Hash, Hasher};
use std::time::Instant;

use anyhow::Result as AnyResult;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};

use crate::alleles::{self, AlleleCombination};
use crate::alt_align::realign_to_haplotype;
use crate::config::{MakeExamplesOptions, SampleOptions};
use crate::error::{ErrorScope, PileupError, Result};
use crate::example::{fill_pileup_array, Example};
use crate::haplotype::{build_haplotype, Haplotype};
use crate::pileup_image::{PileupImage, PileupImageEncoder, ReadBlock};
use crate::read_index::ReadIndex;
use crate::reference::ReferenceSource;
use crate::sink::{ExampleSink, RecordFileSink};
use crate::types::{Candidate, GenomicRange, Read, Variant};

// ============================================================================
// Statistics
// ============================================================================

/// Counters for one region (or several, after merging)
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegionStats {
    /// Candidates that produced their examples
    pub candidates_processed: usize,
    /// Candidates skipped with a diagnostic
    pub candidates_skipped: usize,
    /// Candidates left untouched because the deadline passed
    pub candidates_not_started: usize,
    pub examples_written: usize,
    /// Malformed reads excluded from images, each counted once per call
    pub reads_skipped: usize,
    /// Read rows left empty in alt-aligned images, counted per image
    pub reads_not_realigned: usize,
}

impl RegionStats {
    /// Merge stats from multiple regions into a single aggregate
    pub fn merge(self, other: Self) -> Self {
        Self {
            candidates_processed: self.candidates_processed + other.candidates_processed,
            candidates_skipped: self.candidates_skipped + other.candidates_skipped,
            candidates_not_started: self.candidates_not_started + other.candidates_not_started,
            examples_written: self.examples_written + other.examples_written,
            reads_skipped: self.reads_skipped + other.reads_skipped,
            reads_not_realigned: self.reads_not_realigned + other.reads_not_realigned,
        }
    }
}

// ============================================================================
// Read selection
// ============================================================================

fn downsample_key(seed: u64, read: &Read) -> u64 {
    let mut hasher = FxHasher::default();
    seed.hash(&mut hasher);
    read.name.hash(&mut hasher);
    read.read_number.hash(&mut hasher);
    hasher.finish()
}

/// Pick at most `max_reads` of `candidates` (positions in `reads`)
///
/// Over budget, reads are ranked by a seeded hash of their key, ties broken
/// by position, and the lowest ranks kept. The result is ordered by
/// alignment start, then position.
pub fn downsample_reads(
    reads: &[Read],
    mut candidates: Vec<usize>,
    max_reads: usize,
    seed: u64,
) -> Vec<usize> {
    if candidates.len() > max_reads {
        candidates.sort_by_key(|&i| (downsample_key(seed, &reads[i]), i));
        candidates.truncate(max_reads);
    }
    candidates.sort_by_key(|&i| (reads[i].alignment_start, i));
    candidates
}

/// Reads kept for one sample block of an image
struct SelectedBlock<'r> {
    reads: Vec<&'r Read>,
    max_reads: usize,
}

// ============================================================================
// Generator
// ============================================================================

struct Sample {
    options: SampleOptions,
    sink: Box<dyn ExampleSink>,
}

/// Turns candidates plus overlapping reads into encoded examples
pub struct ExamplesGenerator<R: ReferenceSource> {
    options: MakeExamplesOptions,
    reference: R,
    encoder: PileupImageEncoder,
    half_width: usize,
    /// One per configured role, in configuration order
    samples: Vec<Sample>,
    deadline: Option<Instant>,
}

impl<R: ReferenceSource> ExamplesGenerator<R> {
    /// `sinks[i]` receives the examples of `options.samples[i]`
    pub fn new(
        options: MakeExamplesOptions,
        reference: R,
        sinks: Vec<Box<dyn ExampleSink>>,
    ) -> Result<Self> {
        options.validate()?;
        if sinks.len() != options.samples.len() {
            return Err(PileupError::config(format!(
                "{} sinks given for {} samples",
                sinks.len(),
                options.samples.len()
            )));
        }
        let samples = options
            .samples
            .iter()
            .cloned()
            .zip(sinks)
            .map(|(options, sink)| Sample { options, sink })
            .collect();

        Ok(Self {
            encoder: PileupImageEncoder::new(&options),
            half_width: options.half_width(),
            options,
            reference,
            samples,
            deadline: None,
        })
    }

    /// Open one record file per sample at its configured `output`
    pub fn with_file_sinks(options: MakeExamplesOptions, reference: R) -> AnyResult<Self> {
        let mut sinks: Vec<Box<dyn ExampleSink>> = Vec::with_capacity(options.samples.len());
        for sample in &options.samples {
            sinks.push(Box::new(RecordFileSink::create(&sample.output, 1)?));
        }
        Ok(Self::new(options, reference, sinks)?)
    }

    pub fn options(&self) -> &MakeExamplesOptions {
        &self.options
    }

    pub fn reference(&self) -> &R {
        &self.reference
    }

    /// Candidates reached after `deadline` are not started
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    pub fn alt_allele_combinations(&self, variant: &Variant) -> Vec<AlleleCombination> {
        alleles::alt_allele_combinations(variant, self.options.multi_allelic_mode)
    }

    pub fn create_haplotype(&self, variant: &Variant, alt: &str) -> Result<Haplotype> {
        build_haplotype(&self.reference, variant, alt, self.options.width)
    }

    pub fn need_alt_alignment(&self, variant: &Variant) -> bool {
        alleles::need_alt_alignment(
            variant,
            self.options.alt_aligned_pileup,
            self.options.types_to_alt_align,
        )
    }

    /// Reference window of the primary image for `variant`
    pub fn pileup_region(&self, variant: &Variant) -> GenomicRange {
        let start = variant.start - self.half_width as i64;
        GenomicRange::new(
            variant.reference_name.as_str(),
            start,
            start + self.options.width as i64,
        )
    }

    /// Write examples of every candidate for `role`
    ///
    /// `reads_per_sample[i]` holds sample `i`'s reads for the region;
    /// `sample_order` lists the samples stacked in this role's images.
    pub fn write_examples_in_region(
        &mut self,
        candidates: &[Candidate],
        reads_per_sample: &[Vec<Read>],
        sample_order: &[usize],
        role: &str,
    ) -> Result<RegionStats> {
        self.check_sample_order(reads_per_sample, sample_order)?;
        let mut stats = RegionStats::default();
        let indexes = build_indexes(reads_per_sample, sample_order, &mut stats);
        self.write_role(candidates, &indexes, sample_order, role, stats)
    }

    /// Run [`Self::write_examples_in_region`] for every role with its
    /// configured sample order
    ///
    /// Reads are validated once for all roles, so a malformed read counts
    /// once however many roles stack its sample.
    pub fn write_examples_for_all_roles(
        &mut self,
        candidates: &[Candidate],
        reads_per_sample: &[Vec<Read>],
    ) -> Result<RegionStats> {
        let roles: Vec<(String, Vec<usize>)> = self
            .options
            .samples
            .iter()
            .map(|s| (s.role.clone(), s.order.clone()))
            .collect();
        let mut used: Vec<usize> = Vec::new();
        for (_, order) in &roles {
            self.check_sample_order(reads_per_sample, order)?;
            used.extend_from_slice(order);
        }

        let mut total = RegionStats::default();
        let indexes = build_indexes(reads_per_sample, &used, &mut total);
        for (role, order) in roles {
            let stats =
                self.write_role(candidates, &indexes, &order, &role, RegionStats::default())?;
            total = total.merge(stats);
        }
        Ok(total)
    }

    /// Finalize every sink
    pub fn close(&mut self) -> Result<()> {
        for sample in &mut self.samples {
            sample.sink.close()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Per-candidate stages
    // ------------------------------------------------------------------------

    fn check_sample_order(&self, reads_per_sample: &[Vec<Read>], sample_order: &[usize]) -> Result<()> {
        if let Some(&bad) = sample_order
            .iter()
            .find(|&&i| i >= reads_per_sample.len() || i >= self.options.samples.len())
        {
            return Err(PileupError::config(format!(
                "sample order entry {} has no reads or sample options ({} read sets, {} samples)",
                bad,
                reads_per_sample.len(),
                self.options.samples.len()
            )));
        }
        Ok(())
    }

    fn write_role(
        &mut self,
        candidates: &[Candidate],
        indexes: &[ReadIndex<'_>],
        sample_order: &[usize],
        role: &str,
        mut stats: RegionStats,
    ) -> Result<RegionStats> {
        let sample_pos = self
            .samples
            .iter()
            .position(|s| s.options.role == role)
            .ok_or_else(|| PileupError::config(format!("unknown role '{}'", role)))?;

        for (i, candidate) in candidates.iter().enumerate() {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    stats.candidates_not_started += candidates.len() - i;
                    log::warn!(
                        "Deadline reached for role {}: {} candidates not started",
                        role,
                        candidates.len() - i
                    );
                    break;
                }
            }

            match self.create_examples_for_candidate(
                candidate,
                &self.samples[sample_pos].options,
                sample_order,
                indexes,
                &mut stats,
            ) {
                Ok(examples) => {
                    let sink = &mut self.samples[sample_pos].sink;
                    for example in &examples {
                        sink.write(example)?;
                    }
                    stats.examples_written += examples.len();
                    stats.candidates_processed += 1;
                }
                Err(e) if e.scope() == ErrorScope::Fatal => return Err(e),
                Err(e) => {
                    let v = &candidate.variant;
                    log::warn!(
                        "Skipping candidate {}:{} {}>{}: {}",
                        v.reference_name,
                        v.start,
                        v.reference_bases,
                        v.alternate_bases.join(","),
                        e
                    );
                    stats.candidates_skipped += 1;
                }
            }
        }

        log::info!(
            "Role {}: {} candidates processed, {} skipped, {} examples written",
            role,
            stats.candidates_processed,
            stats.candidates_skipped,
            stats.examples_written
        );
        Ok(stats)
    }

    fn select_reads<'r>(
        &self,
        index: &ReadIndex<'r>,
        region: &GenomicRange,
        max_reads: usize,
    ) -> Vec<&'r Read> {
        let reads = index.reads();
        let eligible: Vec<usize> = index
            .query_indices(region)
            .into_iter()
            .filter(|&i| self.encoder.is_drawable(&reads[i]))
            .collect();
        downsample_reads(reads, eligible, max_reads, self.options.downsample_seed)
            .into_iter()
            .map(|i| &reads[i])
            .collect()
    }

    /// Realign every selected read onto `hap`, keeping row positions
    fn realign_blocks(
        &self,
        blocks: &[SelectedBlock<'_>],
        hap: &Haplotype,
        stats: &mut RegionStats,
    ) -> Vec<Vec<Option<Read>>> {
        blocks
            .iter()
            .map(|block| {
                block
                    .reads
                    .iter()
                    .map(|read| match realign_to_haplotype(read, hap) {
                        Ok(Some(realigned)) => Some(realigned),
                        Ok(None) => {
                            stats.reads_not_realigned += 1;
                            None
                        }
                        Err(e) => {
                            log::debug!("Read {} not realigned: {}", read.key(), e);
                            stats.reads_not_realigned += 1;
                            None
                        }
                    })
                    .collect()
            })
            .collect()
    }

    fn create_examples_for_candidate(
        &self,
        candidate: &Candidate,
        sample: &SampleOptions,
        sample_order: &[usize],
        indexes: &[ReadIndex<'_>],
        stats: &mut RegionStats,
    ) -> Result<Vec<Example>> {
        let variant = &candidate.variant;
        variant.validate()?;
        let contig_length = self.reference.contig_length(&variant.reference_name)?;
        if variant.end() as u64 > contig_length {
            return Err(PileupError::ReferenceOutOfBounds {
                contig: variant.reference_name.clone(),
                start: variant.start,
                end: variant.end(),
                length: contig_length,
            });
        }

        // Select
        let region = self.pileup_region(variant);
        let ref_bases = self.reference.get_bases_padded(&region)?;
        let blocks: Vec<SelectedBlock<'_>> = sample_order
            .iter()
            .map(|&idx| {
                let max_reads = self.options.samples[idx].max_reads;
                SelectedBlock {
                    reads: self.select_reads(&indexes[idx], &region, max_reads),
                    max_reads,
                }
            })
            .collect();

        // Decide realignment and build haplotypes once per alt allele
        let combinations = self.alt_allele_combinations(variant);
        let mut alt_views: FxHashMap<usize, (Haplotype, Vec<Vec<Option<Read>>>)> =
            FxHashMap::default();
        if self.need_alt_alignment(variant) {
            for (alt_idx, alt) in variant.alternate_bases.iter().enumerate() {
                let hap = self.create_haplotype(variant, alt)?;
                let realigned = self.realign_blocks(&blocks, &hap, stats);
                alt_views.insert(alt_idx, (hap, realigned));
            }
        }

        let primary_blocks: Vec<ReadBlock<'_>> = blocks
            .iter()
            .map(|b| ReadBlock {
                reads: b.reads.iter().map(|r| Some(*r)).collect(),
                max_reads: b.max_reads,
            })
            .collect();
        let ref_len = variant.reference_bases.len();
        let read_base_channel = self.options.read_base_channel();
        let alt_slots = self.options.alt_image_slots();

        let mut examples = Vec::with_capacity(combinations.len());
        for combination in &combinations {
            let supporting = supporting_reads(candidate, combination);

            let primary = {
                let reference_row = self.encoder.encode_reference_row(&ref_bases);
                let variant_row = self.encoder.encode_variant_row(
                    &ref_bases,
                    self.half_width,
                    combination.alts[0].as_bytes(),
                    ref_len,
                    ref_len,
                );
                // Indexed reads are already validated, so nothing is skipped here
                let (image, _) = self.encoder.encode(
                    region.start,
                    &ref_bases,
                    reference_row,
                    variant_row,
                    &primary_blocks,
                    &supporting,
                )?;
                image
            };

            let mut alt_images: Vec<PileupImage> = Vec::with_capacity(alt_slots);
            for alt_idx in &combination.indices {
                if let Some((hap, realigned)) = alt_views.get(alt_idx) {
                    alt_images.push(self.encode_alt_image(
                        variant,
                        *alt_idx,
                        hap,
                        realigned,
                        &blocks,
                        &supporting,
                        stats,
                    )?);
                }
            }

            // Singletons repeat their alt image; variants left unrealigned
            // repeat the primary image
            while alt_images.len() < alt_slots {
                let filler = alt_images.last().unwrap_or(&primary).clone();
                alt_images.push(filler);
            }
            alt_images.truncate(alt_slots);

            let (image, shape) = fill_pileup_array(
                &primary,
                &alt_images,
                self.options.alt_aligned_pileup,
                read_base_channel,
            )?;

            examples.push(Example {
                role: sample.role.clone(),
                sample_name: sample.name.clone(),
                variant: variant.clone(),
                alt_combination: combination.alts.clone(),
                alt_allele_indices: combination.indices.clone(),
                locus: region.clone(),
                shape,
                image,
                label: None,
            });
        }
        Ok(examples)
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_alt_image(
        &self,
        variant: &Variant,
        alt_idx: usize,
        hap: &Haplotype,
        realigned: &[Vec<Option<Read>>],
        blocks: &[SelectedBlock<'_>],
        supporting: &FxHashSet<String>,
        stats: &mut RegionStats,
    ) -> Result<PileupImage> {
        let alt = &variant.alternate_bases[alt_idx].as_bytes()[..hap.allele_len];
        let reference_row = self.encoder.encode_reference_row(&hap.sequence);
        let variant_row = self.encoder.encode_variant_row(
            &hap.sequence,
            hap.variant_offset(),
            alt,
            variant.reference_bases.len(),
            hap.allele_len,
        );
        let alt_blocks: Vec<ReadBlock<'_>> = realigned
            .iter()
            .zip(blocks)
            .map(|(rows, block)| ReadBlock {
                reads: rows.iter().map(Option::as_ref).collect(),
                max_reads: block.max_reads,
            })
            .collect();
        let (image, skipped) = self.encoder.encode(
            0,
            &hap.sequence,
            reference_row,
            variant_row,
            &alt_blocks,
            supporting,
        )?;
        stats.reads_not_realigned += skipped;
        Ok(image)
    }
}

/// Index every sample's reads, validating the reads of `used` samples once
///
/// Malformed reads are left out of the index and counted in
/// `stats.reads_skipped`, once per read however often the sample appears in
/// `used`. Samples outside `used` get an empty index.
fn build_indexes<'r>(
    reads_per_sample: &'r [Vec<Read>],
    used: &[usize],
    stats: &mut RegionStats,
) -> Vec<ReadIndex<'r>> {
    let used: FxHashSet<usize> = used.iter().copied().collect();
    reads_per_sample
        .iter()
        .enumerate()
        .map(|(idx, reads)| {
            if !used.contains(&idx) {
                return ReadIndex::with_filter(reads, |_| false);
            }
            ReadIndex::with_filter(reads, |read| match read.validate() {
                Ok(()) => true,
                Err(e) => {
                    log::debug!("Skipping read {}: {}", read.key(), e);
                    stats.reads_skipped += 1;
                    false
                }
            })
        })
        .collect()
}

/// Keys of reads annotated as supporting any alt of the combination
fn supporting_reads(candidate: &Candidate, combination: &AlleleCombination) -> FxHashSet<String> {
    combination
        .alts
        .iter()
        .filter_map(|alt| candidate.allele_support.get(alt))
        .flatten()
        .cloned()
        .collect()
}
