use thiserror::Error;

/// Why a single input record was not turned into reads or features.
///
/// Every variant except [`Rejection::MalformedCigar`] is recoverable: the
/// record is skipped, its message goes to the warning log, and parsing goes
/// on with the next record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Couldn't find a chromosome called {0}")]
    UnknownChromosome(String),

    #[error("Reading position {position} was {overrun}bp beyond the end of chr{chromosome} ({length})")]
    PastChromosomeEnd {
        chromosome: String,
        position: i64,
        overrun: i64,
        length: i64,
    },

    #[error("Reading position {position} was before the start of chr{chromosome} ({length})")]
    BeforeChromosomeStart {
        chromosome: String,
        position: i64,
        length: i64,
    },

    #[error("Ignored discordant read pair: {0}")]
    DiscordantPair(&'static str),

    #[error("Distance between ends {distance} was larger than cutoff ({cutoff})")]
    DistanceExceeded { distance: i64, cutoff: i64 },

    #[error("Position {position} on {chromosome} is out of range")]
    CoordinateOutOfRange { chromosome: String, position: i64 },

    #[error("Read at {start}-{end} cannot be stored")]
    UnpackableRead { start: i64, end: i64 },

    #[error("Data was single ended during paired end import")]
    SingleEndInPairedImport,

    #[error("Location {start}-{end} was not an integer")]
    MalformedNumber { start: String, end: String },

    #[error("Not enough data from line '{0}'")]
    NotEnoughColumns(String),

    #[error("No key value delimiter in {0}")]
    MalformedAttribute(String),

    #[error("Couldn't parse CIGAR string {cigar}: {reason}")]
    MalformedCigar { cigar: String, reason: String },
}

impl Rejection {
    /// A malformed CIGAR means the alignment file itself cannot be trusted,
    /// so it aborts the file instead of skipping one record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Rejection::MalformedCigar { .. })
    }

    /// Both ways a translated position can leave its chromosome.
    pub fn is_out_of_bounds(&self) -> bool {
        matches!(
            self,
            Rejection::PastChromosomeEnd { .. } | Rejection::BeforeChromosomeStart { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_messages() {
        let r = Rejection::PastChromosomeEnd {
            chromosome: String::from("1"),
            position: 1010,
            overrun: 10,
            length: 1000,
        };
        assert_eq!(
            r.to_string(),
            "Reading position 1010 was 10bp beyond the end of chr1 (1000)"
        );
        assert!(r.is_out_of_bounds());
        assert!(!r.is_fatal());

        let r = Rejection::CoordinateOutOfRange {
            chromosome: String::from("ctg"),
            position: i64::MAX,
        };
        assert!(!r.is_fatal());
        assert!(!r.is_out_of_bounds());

        let r = Rejection::MalformedCigar {
            cigar: String::from("10Q"),
            reason: String::from("unknown operation 'Q'"),
        };
        assert!(r.is_fatal());
    }
}
