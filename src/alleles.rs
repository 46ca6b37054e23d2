//! Allele combinations and the realignment predicate
//!
//! Combination order is part of the output contract: examples are emitted in
//! exactly the order returned here, so it depends on allele indices only.

use crate::config::{AltAlignTypes, AltAlignedPileup, MultiAllelicMode};
use crate::types::Variant;

/// One or two alt alleles imaged together against the reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlleleCombination {
    /// Positions in `variant.alternate_bases`, ascending
    pub indices: Vec<usize>,
    /// The alleles at those positions
    pub alts: Vec<String>,
}

impl AlleleCombination {
    fn from_indices(variant: &Variant, indices: Vec<usize>) -> Self {
        let alts = indices
            .iter()
            .map(|&i| variant.alternate_bases[i].clone())
            .collect();
        Self { indices, alts }
    }

    pub fn len(&self) -> usize {
        self.alts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alts.is_empty()
    }

    /// Alleles joined with `/`, e.g. `AT/A`
    pub fn label(&self) -> String {
        self.alts.join("/")
    }
}

/// Enumerate combinations: every singleton in index order, then every pair
/// `(i, j)` with `i < j` in ascending order when het-alt images are enabled
pub fn alt_allele_combinations(variant: &Variant, mode: MultiAllelicMode) -> Vec<AlleleCombination> {
    let n = variant.alternate_bases.len();
    let mut combinations: Vec<AlleleCombination> = (0..n)
        .map(|i| AlleleCombination::from_indices(variant, vec![i]))
        .collect();

    if mode == MultiAllelicMode::AddHetAltImages {
        for i in 0..n {
            for j in (i + 1)..n {
                combinations.push(AlleleCombination::from_indices(variant, vec![i, j]));
            }
        }
    }
    combinations
}

/// Whether alt-aligned images are drawn for `variant`
///
/// With `Indels`, a variant qualifies when any alt differs in length from the
/// reference allele or the reference allele spans several bases.
pub fn need_alt_alignment(
    variant: &Variant,
    alt_aligned_pileup: AltAlignedPileup,
    types_to_alt_align: AltAlignTypes,
) -> bool {
    if alt_aligned_pileup == AltAlignedPileup::None {
        return false;
    }
    match types_to_alt_align {
        AltAlignTypes::All => true,
        AltAlignTypes::Indels => {
            let ref_len = variant.reference_bases.len();
            ref_len > 1
                || variant
                    .alternate_bases
                    .iter()
                    .any(|alt| alt.len() != ref_len)
        }
    }
}
