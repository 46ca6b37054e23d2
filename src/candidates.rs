//! Candidate TSV reader
//!
//! One candidate per line, tab separated:
//!
//! ```text
//! chrom  start  ref  alts  [support]
//! chr1   1000   A    G,AT  G=frag1/1|frag2/2;AT=frag3/1
//! ```
//!
//! `start` is 0-based. `alts` is comma separated. The optional `support`
//! column lists, per allele, the keys (`name/read_number`) of reads that
//! support it. Blank lines and lines starting with `#` are ignored. Files
//! ending in `.gz` are decompressed on the fly.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use flate2::read::MultiGzDecoder;

use crate::types::{Candidate, GenomicRange, Variant};

/// Parse the `allele=key|key;allele=key` support column
fn parse_support(field: &str, candidate: Candidate) -> Result<Candidate> {
    let mut candidate = candidate;
    for entry in field.split(';').filter(|e| !e.is_empty()) {
        let (allele, keys) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Support entry '{}' has no '='", entry))?;
        let keys: Vec<String> = keys
            .split('|')
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();
        candidate = candidate.with_support(allele, keys);
    }
    Ok(candidate)
}

/// Parse one non-comment line
pub fn parse_candidate_line(line: &str) -> Result<Candidate> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 4 {
        return Err(anyhow!(
            "Expected at least 4 tab-separated fields, found {}",
            fields.len()
        ));
    }

    let chrom = fields[0];
    let start = fields[1]
        .parse::<i64>()
        .with_context(|| format!("Failed to parse start position '{}'", fields[1]))?;
    let reference_bases = fields[2].to_ascii_uppercase();
    let alts: Vec<String> = fields[3]
        .split(',')
        .map(|a| a.to_ascii_uppercase())
        .collect();

    let candidate = Candidate::new(Variant::new(chrom, start, reference_bases, alts));
    match fields.get(4) {
        Some(support) if !support.is_empty() && *support != "." => {
            parse_support(support, candidate)
        }
        _ => Ok(candidate),
    }
}

/// Read every candidate in a TSV (optionally gzipped) file, in file order
pub fn read_candidates<P: AsRef<Path>>(path: P) -> Result<Vec<Candidate>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open candidate file {}", path.display()))?;
    let reader: Box<dyn BufRead> = if path.extension().map_or(false, |ext| ext == "gz") {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut candidates = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let candidate = parse_candidate_line(trimmed)
            .with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
        candidates.push(candidate);
    }

    log::info!("Read {} candidates from {}", candidates.len(), path.display());
    Ok(candidates)
}

/// Group candidates into consecutive per-contig regions of `region_size` bp
///
/// Input order is preserved; adjacent candidates in the same bucket share a
/// group. The returned range spans the group's variants.
pub fn group_into_regions(
    candidates: Vec<Candidate>,
    region_size: i64,
) -> Vec<(GenomicRange, Vec<Candidate>)> {
    let region_size = region_size.max(1);
    let mut groups: Vec<(GenomicRange, Vec<Candidate>)> = Vec::new();

    for candidate in candidates {
        let variant = &candidate.variant;
        let bucket = variant.start.div_euclid(region_size);
        let joins_last = groups.last().map_or(false, |(range, _)| {
            range.reference_name == variant.reference_name
                && range.start.div_euclid(region_size) == bucket
        });
        if joins_last {
            if let Some((range, members)) = groups.last_mut() {
                range.start = range.start.min(variant.start);
                range.end = range.end.max(variant.end());
                members.push(candidate);
            }
        } else {
            let range = GenomicRange::new(&variant.reference_name, variant.start, variant.end());
            groups.push((range, vec![candidate]));
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_parse_line_with_support() {
        let c = parse_candidate_line("chr1\t1000\ta\tG,AT\tG=f1/1|f2/2;AT=f3/1").unwrap();
        assert_eq!(c.variant.reference_name, "chr1");
        assert_eq!(c.variant.start, 1000);
        assert_eq!(c.variant.reference_bases, "A");
        assert_eq!(c.variant.alternate_bases, vec!["G", "AT"]);
        assert_eq!(c.support_count("G"), 2);
        assert_eq!(c.support_count("AT"), 1);
        assert_eq!(c.allele_support["AT"], vec!["f3/1".to_string()]);
    }

    #[test]
    fn test_parse_line_without_support() {
        let c = parse_candidate_line("chr2\t5\tC\tT").unwrap();
        assert!(c.allele_support.is_empty());
        let dot = parse_candidate_line("chr2\t5\tC\tT\t.").unwrap();
        assert!(dot.allele_support.is_empty());
    }

    #[test]
    fn test_parse_line_errors() {
        assert!(parse_candidate_line("chr1\t10\tA").is_err());
        assert!(parse_candidate_line("chr1\tten\tA\tG").is_err());
        assert!(parse_candidate_line("chr1\t10\tA\tG\tGf1/1").is_err());
    }

    #[test]
    fn test_read_candidates_plain_and_gz() {
        let content = "# chrom\tstart\tref\talts\n\
                       chr1\t10\tA\tG\n\
                       \n\
                       chr1\t20\tAC\tA\tA=r1/1\n";
        let dir = tempfile::tempdir().unwrap();

        let plain = dir.path().join("cands.tsv");
        std::fs::write(&plain, content).unwrap();

        let gz = dir.path().join("cands.tsv.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(content.as_bytes()).unwrap();
        encoder.finish().unwrap();

        for path in [plain, gz] {
            let candidates = read_candidates(&path).unwrap();
            assert_eq!(candidates.len(), 2);
            assert_eq!(candidates[1].variant.end(), 22);
            assert_eq!(candidates[1].support_count("A"), 1);
        }
    }

    #[test]
    fn test_read_candidates_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tsv");
        std::fs::write(&path, "chr1\t1\tA\tG\nchr1\tx\tA\tG\n").unwrap();
        let err = read_candidates(&path).unwrap_err();
        assert!(format!("{:#}", err).contains(":2"));
    }

    #[test]
    fn test_group_into_regions() {
        let mk = |chrom: &str, start: i64| {
            Candidate::new(Variant::new(chrom, start, "A", vec!["G".to_string()]))
        };
        let groups = group_into_regions(
            vec![mk("chr1", 5), mk("chr1", 90), mk("chr1", 150), mk("chr2", 10)],
            100,
        );
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].0, GenomicRange::new("chr1", 5, 91));
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, GenomicRange::new("chr1", 150, 151));
        assert_eq!(groups[2].0.reference_name, "chr2");
    }
}
