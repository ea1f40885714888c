//! The aligned-read abstraction consumed by the engine.
//!
//! Decoding the alignment binary format is an upstream concern; the engine
//! receives reads already resolved to [`AlignedRead`] and sorted by absolute
//! genomic coordinate. This module also owns the CIGAR expansion that turns a
//! read into a flat per-base alignment vector over reference positions.

use crate::errors::{FgqcError, Result};

/// Placeholder written into the alignment vector for reference positions the
/// read deletes or skips (D/N operators).
pub const GAP_BASE: u8 = b'-';

/// A single CIGAR operator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOpKind {
    /// M: alignment match or mismatch, consumes query and reference.
    Match,
    /// I: insertion to the reference, consumes query only.
    Insertion,
    /// D: deletion from the reference, consumes reference only.
    Deletion,
    /// N: skipped reference region (intron), consumes reference only.
    Skip,
    /// S: soft clip, consumes query only.
    SoftClip,
    /// H: hard clip, consumes neither.
    HardClip,
    /// P: padding, consumes neither.
    Pad,
    /// =: sequence match, consumes query and reference.
    SequenceMatch,
    /// X: sequence mismatch, consumes query and reference.
    SequenceMismatch,
}

impl CigarOpKind {
    /// Decode from the SAM operator character.
    #[must_use]
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'M' => Some(Self::Match),
            'I' => Some(Self::Insertion),
            'D' => Some(Self::Deletion),
            'N' => Some(Self::Skip),
            'S' => Some(Self::SoftClip),
            'H' => Some(Self::HardClip),
            'P' => Some(Self::Pad),
            '=' => Some(Self::SequenceMatch),
            'X' => Some(Self::SequenceMismatch),
            _ => None,
        }
    }

    /// M (0), D (2), N (3), = (7), X (8) consume reference bases.
    #[inline]
    #[must_use]
    pub fn consumes_reference(self) -> bool {
        matches!(self, Self::Match | Self::Deletion | Self::Skip | Self::SequenceMatch | Self::SequenceMismatch)
    }

    /// M (0), I (1), S (4), = (7), X (8) consume query bases.
    #[inline]
    #[must_use]
    pub fn consumes_query(self) -> bool {
        matches!(self, Self::Match | Self::Insertion | Self::SoftClip | Self::SequenceMatch | Self::SequenceMismatch)
    }
}

/// One CIGAR operation: a kind plus a run length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarOp {
    /// The operator kind.
    pub kind: CigarOpKind,
    /// The run length; always > 0 for a well-formed operation.
    pub len: u32,
}

impl CigarOp {
    /// Construct an operation.
    #[must_use]
    pub fn new(kind: CigarOpKind, len: u32) -> Self {
        Self { kind, len }
    }
}

/// Parse a text CIGAR string (e.g. `"36M2I14M"`) into operations.
///
/// # Errors
/// Returns [`FgqcError::MalformedRead`] on an empty string, an unknown
/// operator, or a zero-length operation.
pub fn parse_cigar(read_name: &str, text: &str) -> Result<Vec<CigarOp>> {
    let malformed = |reason: String| FgqcError::MalformedRead { read: read_name.to_string(), reason };
    if text.is_empty() || text == "*" {
        return Err(malformed("empty CIGAR".to_string()));
    }

    let mut ops = Vec::new();
    let mut len: u64 = 0;
    let mut saw_digit = false;
    for c in text.chars() {
        if let Some(digit) = c.to_digit(10) {
            len = len * 10 + u64::from(digit);
            saw_digit = true;
        } else {
            let kind = CigarOpKind::from_char(c)
                .ok_or_else(|| malformed(format!("unknown CIGAR operator '{c}'")))?;
            if !saw_digit || len == 0 {
                return Err(malformed(format!("zero-length CIGAR operation '{c}'")));
            }
            if len > u64::from(u32::MAX) {
                return Err(malformed(format!("oversized CIGAR operation '{len}{c}'")));
            }
            ops.push(CigarOp::new(kind, len as u32));
            len = 0;
            saw_digit = false;
        }
    }
    if saw_digit {
        return Err(malformed("trailing CIGAR length without operator".to_string()));
    }
    Ok(ops)
}

/// Flags carried by an aligned read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadFlags {
    /// The read is part of a pair.
    pub paired: bool,
    /// The read is marked as a PCR or optical duplicate.
    pub duplicate: bool,
    /// The read is unmapped.
    pub unmapped: bool,
    /// The read is a secondary or supplementary alignment.
    pub secondary: bool,
}

/// An aligned sequencing read, already decoded and coordinate-resolved.
///
/// `start`/`end` are 1-based positions local to `contig`. `insert_size` is
/// the inferred template length; values `<= 0` mean "not applicable".
#[derive(Debug, Clone)]
pub struct AlignedRead {
    /// Read name, used only in diagnostics.
    pub name: String,
    /// Reference sequence name.
    pub contig: String,
    /// 1-based local alignment start.
    pub start: u64,
    /// 1-based local alignment end (inclusive).
    pub end: u64,
    /// Mapping quality, 0-255.
    pub mapq: u8,
    /// Inferred insert size; `<= 0` when absent.
    pub insert_size: i64,
    /// SAM flag subset relevant to the engine.
    pub flags: ReadFlags,
    /// CIGAR operations describing the alignment.
    pub cigar: Vec<CigarOp>,
    /// The read bases (query sequence, clips included).
    pub bases: Vec<u8>,
}

impl AlignedRead {
    /// Expand the CIGAR into a flat alignment vector over reference positions.
    ///
    /// The result has one byte per reference position the alignment consumes,
    /// starting at `self.start`: read bases for M/=/X, [`GAP_BASE`] for D/N.
    /// Insertions consume read bases but produce no cell; soft/hard clips and
    /// padding are excluded entirely.
    ///
    /// # Errors
    /// Returns [`FgqcError::MalformedRead`] when the read ends before it
    /// starts, the CIGAR consumes more query bases than the read has, or the
    /// expansion is empty.
    pub fn aligned_sequence(&self) -> Result<Vec<u8>> {
        let malformed =
            |reason: String| FgqcError::MalformedRead { read: self.name.clone(), reason };
        if self.end < self.start {
            return Err(malformed(format!("end {} before start {}", self.end, self.start)));
        }

        let span: usize = self
            .cigar
            .iter()
            .filter(|op| op.kind.consumes_reference())
            .map(|op| op.len as usize)
            .sum();
        let mut aligned = Vec::with_capacity(span);
        let mut query = 0usize;

        for op in &self.cigar {
            let len = op.len as usize;
            match op.kind {
                CigarOpKind::Match | CigarOpKind::SequenceMatch | CigarOpKind::SequenceMismatch => {
                    if query + len > self.bases.len() {
                        return Err(malformed(format!(
                            "CIGAR consumes {} query bases but read has {}",
                            query + len,
                            self.bases.len()
                        )));
                    }
                    aligned.extend_from_slice(&self.bases[query..query + len]);
                    query += len;
                }
                CigarOpKind::Insertion | CigarOpKind::SoftClip => {
                    if query + len > self.bases.len() {
                        return Err(malformed(format!(
                            "CIGAR consumes {} query bases but read has {}",
                            query + len,
                            self.bases.len()
                        )));
                    }
                    query += len;
                }
                CigarOpKind::Deletion | CigarOpKind::Skip => {
                    aligned.resize(aligned.len() + len, GAP_BASE);
                }
                CigarOpKind::HardClip | CigarOpKind::Pad => {}
            }
        }

        if aligned.is_empty() {
            return Err(malformed("alignment consumes no reference positions".to_string()));
        }
        Ok(aligned)
    }

    /// True when the inferred insert size falls in the engine's valid range.
    #[inline]
    #[must_use]
    pub fn has_valid_insert(&self) -> bool {
        crate::window::insert_size_is_valid(self.insert_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_with(cigar: &str, bases: &[u8]) -> AlignedRead {
        AlignedRead {
            name: "r1".to_string(),
            contig: "chr1".to_string(),
            start: 10,
            end: 10 + bases.len() as u64 - 1,
            mapq: 30,
            insert_size: 200,
            flags: ReadFlags { paired: true, ..ReadFlags::default() },
            cigar: parse_cigar("r1", cigar).unwrap(),
            bases: bases.to_vec(),
        }
    }

    #[test]
    fn test_parse_cigar() {
        let ops = parse_cigar("r1", "36M2I14M").unwrap();
        assert_eq!(
            ops,
            vec![
                CigarOp::new(CigarOpKind::Match, 36),
                CigarOp::new(CigarOpKind::Insertion, 2),
                CigarOp::new(CigarOpKind::Match, 14),
            ]
        );
    }

    #[test]
    fn test_parse_cigar_rejects_garbage() {
        assert!(parse_cigar("r1", "").is_err());
        assert!(parse_cigar("r1", "*").is_err());
        assert!(parse_cigar("r1", "10Q").is_err());
        assert!(parse_cigar("r1", "M").is_err());
        assert!(parse_cigar("r1", "0M").is_err());
        assert!(parse_cigar("r1", "10M5").is_err());
    }

    #[test]
    fn test_plain_match_expansion() {
        let read = read_with("4M", b"ACGT");
        assert_eq!(read.aligned_sequence().unwrap(), b"ACGT");
    }

    #[test]
    fn test_insertion_consumes_query_only() {
        // 2M 2I 2M over ACGGTT: insertion bases GG are dropped from the vector
        let read = read_with("2M2I2M", b"ACGGTT");
        assert_eq!(read.aligned_sequence().unwrap(), b"ACTT");
    }

    #[test]
    fn test_deletion_produces_gap_cells() {
        let read = read_with("2M3D2M", b"ACTT");
        assert_eq!(read.aligned_sequence().unwrap(), b"AC---TT");
    }

    #[test]
    fn test_skip_produces_gap_cells() {
        let read = read_with("1M2N1M", b"AG");
        assert_eq!(read.aligned_sequence().unwrap(), b"A--G");
    }

    #[test]
    fn test_clips_excluded() {
        let read = read_with("2S3M1S", b"NNACGN");
        assert_eq!(read.aligned_sequence().unwrap(), b"ACG");
        let read = read_with("5H3M", b"ACG");
        assert_eq!(read.aligned_sequence().unwrap(), b"ACG");
    }

    #[test]
    fn test_end_before_start_is_malformed() {
        let mut read = read_with("4M", b"ACGT");
        read.end = 5;
        assert!(matches!(read.aligned_sequence(), Err(FgqcError::MalformedRead { .. })));
    }

    #[test]
    fn test_overconsuming_cigar_is_malformed() {
        let read = read_with("10M", b"ACGT");
        assert!(matches!(read.aligned_sequence(), Err(FgqcError::MalformedRead { .. })));
    }

    #[test]
    fn test_reference_free_cigar_is_malformed() {
        let read = read_with("4S", b"ACGT");
        assert!(matches!(read.aligned_sequence(), Err(FgqcError::MalformedRead { .. })));
    }
}
