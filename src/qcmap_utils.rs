use flate2::bufread::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::trace;

/// Type alias for a noodles FASTA reader that can read from
/// a `dyn BufRead`. It is used to allow reading from either
/// a compressed or uncompressed FASTA file.
pub type FastaReader = noodles::fasta::io::Reader<Box<dyn BufRead>>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// The file formats qcmap knows about.
///
/// # Variants
///
/// * `GTF` - Gene Transfer Format (GFF2 with `key "value"` attributes).
/// * `GFF` - General Feature Format version 3 (`key=value` attributes).
/// * `SAM` - Sequence Alignment/Map text format.
/// * `BAM` - Binary SAM. Recognized so it can be reported, but not decoded here.
/// * `FASTA` - Reference sequences, used to get chromosome lengths.
pub enum FileFormat {
    GTF,
    GFF,
    SAM,
    BAM,
    FASTA,
}

impl FileFormat {
    /// Guesses the format from the file extension, looking through a
    /// trailing `.gz`.
    pub fn from_path<T: AsRef<Path>>(p: T) -> Option<FileFormat> {
        let name = p.as_ref().file_name()?.to_str()?.to_lowercase();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        let (_, ext) = name.rsplit_once('.')?;
        ext.parse().ok()
    }

    /// GTF and GFF3 files go through the same annotation parser.
    pub fn is_annotation(&self) -> bool {
        matches!(self, FileFormat::GTF | FileFormat::GFF)
    }
}

impl std::str::FromStr for FileFormat {
    type Err = anyhow::Error;

    /// Converts from a [&str] to an appropriate [FileFormat] type.
    /// The result is an error variant if there is no corresponding type for
    /// the input argument `s`.
    fn from_str(s: &str) -> anyhow::Result<FileFormat> {
        let ft = match s.to_lowercase().as_str() {
            "gtf" => FileFormat::GTF,
            "gff2" => FileFormat::GTF,
            "gff" => FileFormat::GFF,
            "gff3" => FileFormat::GFF,
            "sam" => FileFormat::SAM,
            "bam" => FileFormat::BAM,
            "fa" | "fna" | "fasta" => FileFormat::FASTA,
            _ => anyhow::bail!("Cannot parse the file type."),
        };
        Ok(ft)
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileFormat::GTF => write!(f, "GTF"),
            FileFormat::GFF => write!(f, "GFF"),
            FileFormat::SAM => write!(f, "SAM"),
            FileFormat::BAM => write!(f, "BAM"),
            FileFormat::FASTA => write!(f, "FASTA"),
        }
    }
}

/// Checks whether the buffered data starts with the gzip magic number.
/// Nothing is consumed from the reader.
pub fn is_gzipped<T: BufRead>(reader: &mut T) -> std::io::Result<bool> {
    const GZIP_MAGIC_NUMBER: [u8; 2] = [0x1f, 0x8b];

    let src = reader.fill_buf()?;
    if src.get(..2) == Some(&GZIP_MAGIC_NUMBER) {
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Opens `p` for buffered line reading, transparently decompressing gzip
/// input.
pub fn get_reader_from_path<T: AsRef<Path>>(p: T) -> anyhow::Result<Box<dyn BufRead>> {
    let file = File::open(p.as_ref())?;
    let mut inner_rdr = BufReader::new(file);
    if is_gzipped(&mut inner_rdr)? {
        trace!(
            "auto-detected gzipped file {} - reading via decompression",
            p.as_ref().display()
        );
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(inner_rdr))))
    } else {
        Ok(Box::new(inner_rdr))
    }
}

/// Creates a [FastaReader] from the provided path. This function will automatically
/// determine if the provided path points to a gzip compressed or an uncompressed FASTA
/// file, and will return the appropriate reader accordingly.
pub fn get_noodles_reader_from_path<T: AsRef<Path>>(p: T) -> anyhow::Result<FastaReader> {
    Ok(noodles::fasta::io::Reader::new(get_reader_from_path(p)?))
}
