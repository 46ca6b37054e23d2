//! Overlap index over a caller-owned batch of reads
//!
//! The index borrows the read slice; it never copies or owns read records.
//! Trees store the read's position in the slice as metadata, so nodes stay
//! small and the full record is only touched on a hit.

use coitrees::{COITree, IntervalNode, IntervalTree};
use rustc_hash::FxHashMap;

use crate::types::{GenomicRange, Read};

pub type ReadTree = COITree<u32, u32>;

/// Read-only interval index over `&'a [Read]`
pub struct ReadIndex<'a> {
    reads: &'a [Read],
    trees: FxHashMap<String, ReadTree>,
    indexed: usize,
}

impl<'a> ReadIndex<'a> {
    /// Build per-contig trees. Reads without reference extent, with a
    /// negative start, or ending past `i32::MAX` (the tree coordinate limit)
    /// are not indexed and never returned by queries.
    pub fn new(reads: &'a [Read]) -> Self {
        Self::with_filter(reads, |_| true)
    }

    /// Like [`ReadIndex::new`], indexing only reads accepted by `keep`
    ///
    /// `keep` sees every read exactly once, in input order.
    pub fn with_filter<F: FnMut(&Read) -> bool>(reads: &'a [Read], mut keep: F) -> Self {
        let mut contig_intervals: FxHashMap<&str, Vec<IntervalNode<u32, u32>>> =
            FxHashMap::default();
        let mut indexed = 0;

        for (idx, read) in reads.iter().enumerate() {
            if !keep(read) {
                continue;
            }
            let span = read.reference_span();
            if span <= 0 || read.alignment_start < 0 {
                continue;
            }
            // coitrees uses end-inclusive i32 intervals
            let last = read.alignment_start + span - 1;
            if last > i32::MAX as i64 {
                log::debug!("Read {} ends past {}; not indexed", read.key(), i32::MAX);
                continue;
            }
            let node = IntervalNode::new(read.alignment_start as i32, last as i32, idx as u32);
            contig_intervals
                .entry(read.reference_name.as_str())
                .or_default()
                .push(node);
            indexed += 1;
        }

        let trees = contig_intervals
            .into_iter()
            .map(|(contig, intervals)| (contig.to_string(), COITree::new(&intervals)))
            .collect();

        Self {
            reads,
            trees,
            indexed,
        }
    }

    /// Slice positions of reads overlapping `range`, ascending
    pub fn query_indices(&self, range: &GenomicRange) -> Vec<usize> {
        let mut hits = Vec::new();
        if range.is_empty() {
            return hits;
        }
        if range.end <= 0 || range.start > i32::MAX as i64 {
            return hits;
        }
        let first = range.start.max(0) as i32;
        let last = (range.end - 1).min(i32::MAX as i64) as i32;
        if let Some(tree) = self.trees.get(&range.reference_name) {
            tree.query(first, last, |node| {
                hits.push(node.metadata.clone() as usize);
            });
        }
        // Tree traversal order is layout dependent
        hits.sort_unstable();
        hits
    }

    /// Reads overlapping `range`, in input order
    pub fn query(&self, range: &GenomicRange) -> Vec<&'a Read> {
        self.query_indices(range)
            .into_iter()
            .map(|idx| &self.reads[idx])
            .collect()
    }

    /// Backing read slice
    pub fn reads(&self) -> &'a [Read] {
        self.reads
    }

    /// Number of reads placed in the trees
    pub fn len(&self) -> usize {
        self.indexed
    }

    pub fn is_empty(&self) -> bool {
        self.indexed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::record::Cigar;

    fn read_at(name: &str, contig: &str, start: i64, len: u32) -> Read {
        Read {
            name: name.to_string(),
            read_number: 0,
            reference_name: contig.to_string(),
            alignment_start: start,
            mapping_quality: 60,
            is_reverse: false,
            cigar: vec![Cigar::Match(len)],
            bases: vec![b'A'; len as usize],
            base_qualities: vec![30; len as usize],
        }
    }

    #[test]
    fn test_query_half_open_bounds() {
        let reads = vec![
            read_at("a", "chr1", 100, 10), // [100, 110)
            read_at("b", "chr1", 110, 10), // [110, 120)
            read_at("c", "chr1", 95, 5),   // [95, 100)
            read_at("d", "chr2", 100, 10),
        ];
        let index = ReadIndex::new(&reads);
        assert_eq!(index.len(), 4);

        let hits = index.query(&GenomicRange::new("chr1", 100, 110));
        let names: Vec<&str> = hits.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a"]);

        assert_eq!(
            index.query_indices(&GenomicRange::new("chr1", 99, 111)),
            vec![0, 1, 2]
        );
        assert!(index.query(&GenomicRange::new("chr3", 0, 1000)).is_empty());
        assert!(index.query(&GenomicRange::new("chr1", 105, 105)).is_empty());
    }

    #[test]
    fn test_results_follow_input_order() {
        let reads = vec![
            read_at("late", "chr1", 500, 50),
            read_at("early", "chr1", 480, 50),
            read_at("mid", "chr1", 490, 50),
        ];
        let index = ReadIndex::new(&reads);
        let names: Vec<&str> = index
            .query(&GenomicRange::new("chr1", 510, 520))
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["late", "early", "mid"]);
    }

    #[test]
    fn test_unplaceable_reads_are_not_indexed() {
        let mut clipped = read_at("clip", "chr1", 10, 4);
        clipped.cigar = vec![Cigar::SoftClip(4)];
        let negative = read_at("neg", "chr1", -5, 4);
        let reads = vec![clipped, negative, read_at("ok", "chr1", 0, 20)];
        let index = ReadIndex::new(&reads);
        assert_eq!(index.len(), 1);
        assert_eq!(
            index.query_indices(&GenomicRange::new("chr1", 0, 100)),
            vec![2]
        );
    }

    #[test]
    fn test_reads_past_coordinate_limit_are_not_indexed() {
        let far = read_at("far", "chr1", i32::MAX as i64 - 5, 10);
        let reads = vec![far, read_at("near", "chr1", 100, 10)];
        let index = ReadIndex::new(&reads);
        assert_eq!(index.len(), 1);
        assert!(index
            .query_indices(&GenomicRange::new("chr1", i32::MAX as i64 - 10, i64::MAX))
            .is_empty());
        assert_eq!(
            index.query_indices(&GenomicRange::new("chr1", 0, i64::MAX)),
            vec![1]
        );
    }

    #[test]
    fn test_with_filter_skips_rejected_reads() {
        let reads = vec![read_at("a", "chr1", 0, 10), read_at("b", "chr1", 5, 10)];
        let index = ReadIndex::with_filter(&reads, |r| r.name != "a");
        assert_eq!(index.len(), 1);
        assert_eq!(index.query_indices(&GenomicRange::new("chr1", 0, 20)), vec![1]);
    }
}
