//! Positions of reads and features on a chromosome.
//!
//! All coordinates in this crate are 1-based and closed, i.e. `[start, end]`,
//! which is what GFF3/GTF and SAM use.

use std::fmt;

/// The strand of a read or a feature.
///
/// Unlike the raw GFF strand column, this is never missing: anything that is
/// neither `+` nor `-` becomes [`Strand::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strand {
    Forward,
    Reverse,
    Unknown,
}

impl Strand {
    /// Parses a GFF/GTF strand column. `+` is forward, `-` is reverse and
    /// everything else (including `.`, `?` and an empty string) is unknown.
    pub fn from_column(s: &str) -> Strand {
        match s {
            "+" => Strand::Forward,
            "-" => Strand::Reverse,
            _ => Strand::Unknown,
        }
    }

    /// Returns the opposite strand. [`Strand::Unknown`] stays unknown.
    pub fn flip(self) -> Strand {
        match self {
            Strand::Forward => Strand::Reverse,
            Strand::Reverse => Strand::Forward,
            Strand::Unknown => Strand::Unknown,
        }
    }

    pub(crate) fn to_bits(self) -> u64 {
        match self {
            Strand::Unknown => 0,
            Strand::Forward => 1,
            Strand::Reverse => 2,
        }
    }

    pub(crate) fn from_bits(bits: u64) -> Strand {
        match bits & 0b11 {
            1 => Strand::Forward,
            2 => Strand::Reverse,
            _ => Strand::Unknown,
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strand::Forward => write!(f, "+"),
            Strand::Reverse => write!(f, "-"),
            Strand::Unknown => write!(f, "."),
        }
    }
}

/// A closed interval `[start, end]` on one strand of a chromosome.
///
/// The constructor normalizes reversed input, so `start <= end` always holds:
///
/// ```
/// use qcmap::location::{Location, Strand};
///
/// let loc = Location::new(200, 100, Strand::Forward);
/// assert_eq!((loc.start(), loc.end()), (100, 200));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    start: i64,
    end: i64,
    strand: Strand,
}

impl Location {
    pub fn new(start: i64, end: i64, strand: Strand) -> Location {
        if end < start {
            Location {
                start: end,
                end: start,
                strand,
            }
        } else {
            Location { start, end, strand }
        }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn strand(&self) -> Strand {
        self.strand
    }

    /// Returns `true` if the two closed intervals share at least one base.
    /// Strand is ignored.
    pub fn overlaps(&self, other: &Location) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// A location made of several discontiguous spans, e.g. the exons of one
/// transcript.
///
/// Spans are kept in the order they were encountered in the input and are not
/// checked for overlaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitLocation {
    spans: Vec<Location>,
    start: i64,
    end: i64,
}

impl SplitLocation {
    /// Creates a split location from a non-empty list of spans.
    ///
    /// ### Returns
    ///
    /// * [`Some`]`(SplitLocation)` if `spans` has at least one element.
    /// * [`None`] if `spans` is empty.
    pub fn new(spans: Vec<Location>) -> Option<SplitLocation> {
        let start = spans.iter().map(|l| l.start()).min()?;
        let end = spans.iter().map(|l| l.end()).max()?;
        Some(SplitLocation { spans, start, end })
    }

    /// The smallest start over all spans.
    pub fn start(&self) -> i64 {
        self.start
    }

    /// The largest end over all spans.
    pub fn end(&self) -> i64 {
        self.end
    }

    /// The strand of the first span.
    pub fn strand(&self) -> Strand {
        self.spans
            .first()
            .map(|l| l.strand())
            .unwrap_or(Strand::Unknown)
    }

    pub fn spans(&self) -> &[Location] {
        &self.spans
    }
}

/// The location of a [`Feature`](crate::annotation::Feature): either one
/// contiguous span or a set of spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureLocation {
    Single(Location),
    Split(SplitLocation),
}

impl FeatureLocation {
    pub fn start(&self) -> i64 {
        match self {
            FeatureLocation::Single(l) => l.start(),
            FeatureLocation::Split(s) => s.start(),
        }
    }

    pub fn end(&self) -> i64 {
        match self {
            FeatureLocation::Single(l) => l.end(),
            FeatureLocation::Split(s) => s.end(),
        }
    }

    pub fn strand(&self) -> Strand {
        match self {
            FeatureLocation::Single(l) => l.strand(),
            FeatureLocation::Split(s) => s.strand(),
        }
    }

    /// All spans of this location, in input order. A single location
    /// reports itself as its only span.
    pub fn spans(&self) -> &[Location] {
        match self {
            FeatureLocation::Single(l) => std::slice::from_ref(l),
            FeatureLocation::Split(s) => s.spans(),
        }
    }

    pub fn is_split(&self) -> bool {
        matches!(self, FeatureLocation::Split(_))
    }
}

impl From<Location> for FeatureLocation {
    fn from(l: Location) -> FeatureLocation {
        FeatureLocation::Single(l)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_swaps_reversed_coordinates() {
        for (a, b) in [(10, 5), (5, 10), (7, 7), (-3, -8)] {
            let loc = Location::new(a, b, Strand::Reverse);
            assert_eq!(loc.start(), a.min(b));
            assert_eq!(loc.end(), a.max(b));
            assert_eq!(loc.strand(), Strand::Reverse);
        }
    }

    #[test]
    fn test_strand_from_column() {
        assert_eq!(Strand::from_column("+"), Strand::Forward);
        assert_eq!(Strand::from_column("-"), Strand::Reverse);
        assert_eq!(Strand::from_column("."), Strand::Unknown);
        assert_eq!(Strand::from_column(""), Strand::Unknown);
        assert_eq!(Strand::Forward.flip(), Strand::Reverse);
        assert_eq!(Strand::Unknown.flip(), Strand::Unknown);
    }

    #[test]
    fn test_split_location_bounds() {
        // out of order on purpose; order must be kept
        let spans = vec![
            Location::new(300, 400, Strand::Forward),
            Location::new(100, 150, Strand::Forward),
        ];
        let split = SplitLocation::new(spans.clone()).unwrap();
        assert_eq!(split.start(), 100);
        assert_eq!(split.end(), 400);
        assert_eq!(split.spans(), &spans[..]);

        assert!(SplitLocation::new(Vec::new()).is_none());

        let fl = FeatureLocation::Split(split);
        assert!(fl.is_split());
        assert_eq!(fl.spans().len(), 2);
        assert_eq!(fl.strand(), Strand::Forward);
    }

    #[test]
    fn test_single_location_spans() {
        let fl = FeatureLocation::from(Location::new(5, 1, Strand::Unknown));
        assert_eq!(fl.spans(), &[Location::new(1, 5, Strand::Unknown)]);
        assert_eq!((fl.start(), fl.end()), (1, 5));
    }
}
