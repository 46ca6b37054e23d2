//! Error taxonomy for pileup example generation
//!
//! Every failure the engine can report maps onto one variant here. The
//! generator uses [`PileupError::scope`] to decide whether an error drops a
//! single read, skips a candidate, or aborts the whole invocation.

use thiserror::Error;

/// Main error type for pileup generation
#[derive(Error, Debug)]
pub enum PileupError {
    /// Malformed cigar, cigar/base length mismatch, or impossible window arithmetic
    #[error("Invalid alignment: {reason}")]
    InvalidAlignment { reason: String },

    /// Empty or symbolic allele that cannot be substituted into a haplotype
    #[error("Invalid allele '{allele}': {reason}")]
    InvalidAllele { allele: String, reason: String },

    /// Variant without alleles, negative position, or otherwise unusable
    #[error("Invalid variant: {reason}")]
    InvalidVariant { reason: String },

    /// Requested reference interval falls outside the contig
    #[error("Reference range {contig}:{start}-{end} is out of bounds (contig length {length})")]
    ReferenceOutOfBounds {
        contig: String,
        start: i64,
        end: i64,
        length: u64,
    },

    /// Contig is not present in the reference
    #[error("Contig not found: {contig}")]
    ContigNotFound { contig: String },

    /// Output sink rejected a record; partial output is not trusted
    #[error("Failed to write example for role '{role}': {message}")]
    SinkWriteFailure { role: String, message: String },

    /// Packed images disagree on geometry
    #[error("Image shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: String, found: String },

    /// Configuration errors (invalid width, unknown role, bad channel set)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O errors from reference or output adapters
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Granularity at which an error is absorbed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Exclude the offending read, keep imaging the candidate
    Read,
    /// Skip the candidate with a diagnostic, keep processing the region
    Candidate,
    /// Abort the invocation
    Fatal,
}

/// Type alias for Results using PileupError
pub type Result<T> = std::result::Result<T, PileupError>;

impl PileupError {
    pub fn invalid_alignment(reason: impl Into<String>) -> Self {
        Self::InvalidAlignment {
            reason: reason.into(),
        }
    }

    pub fn invalid_allele(allele: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAllele {
            allele: allele.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_variant(reason: impl Into<String>) -> Self {
        Self::InvalidVariant {
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn sink(role: impl Into<String>, message: impl ToString) -> Self {
        Self::SinkWriteFailure {
            role: role.into(),
            message: message.to_string(),
        }
    }

    /// Classify the error according to the propagation policy
    pub fn scope(&self) -> ErrorScope {
        match self {
            Self::InvalidAlignment { .. } => ErrorScope::Read,
            Self::InvalidAllele { .. }
            | Self::InvalidVariant { .. }
            | Self::ReferenceOutOfBounds { .. }
            | Self::ContigNotFound { .. } => ErrorScope::Candidate,
            Self::SinkWriteFailure { .. }
            | Self::ShapeMismatch { .. }
            | Self::Config { .. }
            | Self::Io(_) => ErrorScope::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_classification() {
        assert_eq!(
            PileupError::invalid_alignment("bad").scope(),
            ErrorScope::Read
        );
        assert_eq!(
            PileupError::invalid_allele("<DEL>", "symbolic").scope(),
            ErrorScope::Candidate
        );
        assert_eq!(
            PileupError::ContigNotFound {
                contig: "chrZ".to_string()
            }
            .scope(),
            ErrorScope::Candidate
        );
        assert_eq!(PileupError::sink("child", "disk full").scope(), ErrorScope::Fatal);
    }

    #[test]
    fn test_display_messages() {
        let err = PileupError::ReferenceOutOfBounds {
            contig: "chr1".to_string(),
            start: -5,
            end: 10,
            length: 100,
        };
        assert_eq!(
            err.to_string(),
            "Reference range chr1:-5-10 is out of bounds (contig length 100)"
        );
    }
}
