pub mod fasta;
pub mod gff;
pub mod sam;
pub use gff::{parse_attributes, GffParser};
pub use sam::AlignmentReader;
