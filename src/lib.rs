//! qcmap maps alignment records (SAM) and genome annotation (GFF3/GTF) onto
//! chromosome coordinates, producing the reads and features that quality
//! control tools count and compare.
//!
//! The two entry points are [`AlignmentParser`], which filters alignments and
//! turns each one into zero or more reads, and [`GffParser`], which merges
//! the records of one transcript into a single multi-span feature. Both take
//! a [`ChromosomeResolver`]: a [`Genome`] when positions should be translated
//! onto (pseudo-)chromosomes and bounds checked, or a plain
//! [`ChromosomeFactory`] when only names are known.
//!
//! Recoverable problems with single records never stop a parse. They are
//! collected in the [`ParseContext`] passed to every driver, next to the
//! token used to cancel it.

pub mod alignment;
pub mod annotation;
pub mod cigar;
pub mod error;
pub mod genome;
pub mod location;
pub mod options;
pub mod progress;
pub mod qcmap_utils;
pub mod reader;

pub use alignment::{AlignmentNormalizer, AlignmentParser, AlignmentRecord, NormalizedRead, ReadSink, ReadStore};
pub use annotation::{AnnotationSet, Attributes, Feature, FeatureSink};
pub use error::Rejection;
pub use genome::{Chromosome, ChromosomeFactory, ChromosomeResolver, Genome};
pub use location::{FeatureLocation, Location, SplitLocation, Strand};
pub use progress::{CancellationToken, ParseContext, ParseOutcome};
pub use reader::GffParser;
