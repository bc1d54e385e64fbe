//! CIGAR operations and their translation into aligned reference spans.
//!
//! The interpreter walks the operations with a 1-based inclusive cursor:
//! `M`, `I`, `=` and `X` move it forward by `count - 1`, `D` moves it back by
//! `count - 1`, and every `N` (reference skip, usually an intron) closes the
//! current span and jumps the cursor past the skipped bases.

use crate::error::Rejection;
use noodles::sam::alignment::record::Cigar as SamCigar;
use std::fmt;

pub use noodles::sam::alignment::record::cigar::{op::Kind, Op};

fn kind_char(kind: Kind) -> char {
    match kind {
        Kind::Match => 'M',
        Kind::Insertion => 'I',
        Kind::Deletion => 'D',
        Kind::Skip => 'N',
        Kind::SoftClip => 'S',
        Kind::HardClip => 'H',
        Kind::Pad => 'P',
        Kind::SequenceMatch => '=',
        Kind::SequenceMismatch => 'X',
    }
}

/// The decoded operations of one alignment. An empty CIGAR stands for `*`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cigar(Vec<Op>);

impl Cigar {
    /// Decodes every operation of a noodles CIGAR, as found on SAM and BAM
    /// records.
    ///
    /// ### Returns
    ///
    /// * `Err(Rejection::MalformedCigar)` on the first operation that cannot
    ///   be decoded.
    pub fn try_from_record_cigar(cigar: &dyn SamCigar) -> Result<Cigar, Rejection> {
        let mut ops = Vec::new();
        for result in cigar.iter() {
            match result {
                Ok(op) => ops.push(op),
                Err(e) => {
                    return Err(Rejection::MalformedCigar {
                        cigar: format!("{}...", Cigar(ops)),
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(Cigar(ops))
    }

    pub fn ops(&self) -> &[Op] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the alignment contains a reference skip (`N`).
    pub fn has_skip(&self) -> bool {
        self.0.iter().any(|op| op.kind() == Kind::Skip)
    }

    /// The number of reference bases the alignment spans.
    pub fn reference_len(&self) -> i64 {
        self.0
            .iter()
            .filter(|op| op.kind().consumes_reference())
            .map(|op| op.len() as i64)
            .sum()
    }

    /// The 1-based inclusive end of an alignment starting at `start`, or
    /// [`None`] if it cannot be represented.
    pub fn alignment_end(&self, start: i64) -> Option<i64> {
        match self.reference_len() {
            0 => Some(start),
            n => start.checked_add(n - 1),
        }
    }
}

impl From<Vec<Op>> for Cigar {
    fn from(ops: Vec<Op>) -> Cigar {
        Cigar(ops)
    }
}

impl FromIterator<Op> for Cigar {
    fn from_iter<I: IntoIterator<Item = Op>>(iter: I) -> Cigar {
        Cigar(iter.into_iter().collect())
    }
}

impl fmt::Display for Cigar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "*");
        }
        for op in &self.0 {
            write!(f, "{}{}", op.len(), kind_char(op.kind()))?;
        }
        Ok(())
    }
}

/// Which spans the interpreter should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanMode {
    /// One span per aligned block between skips.
    Exons,
    /// One span per skipped region.
    Introns,
}

/// Splits an alignment into reference spans.
///
/// `start` and `end` are the alignment start and end, already translated into
/// whatever coordinate space the caller wants the spans in. When the CIGAR has
/// no `N` the result is simply `[start, end]` (or nothing, for
/// [`SpanMode::Introns`]) without walking the operations. The cursor
/// saturates instead of wrapping, so absurd inputs give spans the bounds
/// checks reject.
pub fn interpret(cigar: &Cigar, start: i64, end: i64, mode: SpanMode) -> Vec<(i64, i64)> {
    if !cigar.has_skip() {
        return match mode {
            SpanMode::Introns => Vec::new(),
            SpanMode::Exons => vec![(start, end)],
        };
    }

    let mut spans = Vec::new();
    let mut cursor = start;
    let mut span_start = start;
    // end of the block before the most recent skip
    let mut last_end: Option<i64> = None;

    for op in cigar.ops() {
        let len = op.len() as i64;
        match op.kind() {
            Kind::Match | Kind::Insertion | Kind::SequenceMatch | Kind::SequenceMismatch => {
                cursor = cursor.saturating_add(len - 1);
            }
            Kind::Deletion => {
                cursor = cursor.saturating_sub(len - 1);
            }
            Kind::Skip => {
                match mode {
                    SpanMode::Exons => spans.push((span_start, cursor)),
                    SpanMode::Introns => {
                        if let Some(le) = last_end {
                            spans.push((le.saturating_add(1), span_start - 1));
                        }
                        last_end = Some(cursor);
                    }
                }
                cursor = cursor.saturating_add(len + 1);
                span_start = cursor;
            }
            Kind::SoftClip | Kind::HardClip | Kind::Pad => {}
        }
    }

    match mode {
        SpanMode::Exons => spans.push((span_start, cursor)),
        SpanMode::Introns => {
            if let Some(le) = last_end {
                spans.push((le.saturating_add(1), span_start - 1));
            }
        }
    }
    spans
}

/// Reads CIGAR text through a one-line SAM record, the way the alignment
/// readers see it.
#[cfg(test)]
pub(crate) fn sam_cigar(s: &str) -> Result<Cigar, Rejection> {
    use noodles::sam;

    let line = format!("r\t4\t*\t0\t255\t{}\t*\t0\t0\t*\t*\n", s);
    let mut reader = sam::io::Reader::new(line.as_bytes());
    let mut record = sam::Record::default();
    reader
        .read_record(&mut record)
        .map_err(|e| Rejection::MalformedCigar {
            cigar: s.to_string(),
            reason: e.to_string(),
        })?;
    Cigar::try_from_record_cigar(&record.cigar())
}
