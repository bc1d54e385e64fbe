//! Alignment records from SAM and BAM files.
//!
//! Both formats are decoded with noodles. The header is read when the reader
//! is created; after that every record is reduced to the [`AlignmentRecord`]
//! fields read placement needs.

use crate::alignment::AlignmentRecord;
use crate::cigar::Cigar;
use crate::error::Rejection;
use crate::qcmap_utils::{get_reader_from_path, FileFormat};
use anyhow::Context;
use noodles::core::Position;
use noodles::sam::alignment::Record as SamRecord;
use noodles::{bam, sam};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, Read};
use std::path::Path;

/// The largest position SAM and BAM can hold, 2^31 - 1.
pub const MAX_POSITION: usize = (1 << 31) - 1;

type RecordIter = Box<dyn Iterator<Item = anyhow::Result<AlignmentRecord>>>;

/// Reads [`AlignmentRecord`]s from SAM text or BAM.
///
/// Records noodles cannot decode, and CIGARs that cannot be decoded, are
/// errors that end the file. A record whose positions SAM cannot hold is
/// handed out as a recoverable [`Rejection`] so the caller can skip it.
pub struct AlignmentReader {
    header: sam::Header,
    records: RecordIter,
}

impl AlignmentReader {
    /// Reads the SAM header from `inner` and returns a reader positioned at
    /// the first alignment.
    pub fn from_sam<R: BufRead + 'static>(inner: R) -> anyhow::Result<AlignmentReader> {
        let mut reader = sam::io::Reader::new(inner);
        let header = reader.read_header().context("could not read the SAM header")?;

        let mut record = sam::Record::default();
        let mut n = 0usize;
        let records = std::iter::from_fn(move || match reader.read_record(&mut record) {
            Ok(0) => None,
            Ok(_) => {
                n += 1;
                Some(from_sam_record(&record).with_context(|| format!("SAM record {}", n)))
            }
            Err(e) => Some(Err(
                anyhow::Error::new(e).context(format!("could not read SAM record {}", n + 1))
            )),
        });

        Ok(AlignmentReader {
            header,
            records: Box::new(records),
        })
    }

    /// Reads the BAM header from `inner` and returns a reader positioned at
    /// the first alignment.
    pub fn from_bam<R: Read + 'static>(inner: R) -> anyhow::Result<AlignmentReader> {
        let mut reader = bam::io::Reader::new(inner);
        let header = reader.read_header().context("could not read the BAM header")?;
        let names: Vec<String> = header
            .reference_sequences()
            .keys()
            .map(|name| name.to_string())
            .collect();

        let mut record = bam::Record::default();
        let mut n = 0usize;
        let records = std::iter::from_fn(move || match reader.read_record(&mut record) {
            Ok(0) => None,
            Ok(_) => {
                n += 1;
                Some(from_bam_record(&record, &names).with_context(|| format!("BAM record {}", n)))
            }
            Err(e) => Some(Err(
                anyhow::Error::new(e).context(format!("could not read BAM record {}", n + 1))
            )),
        });

        Ok(AlignmentReader {
            header,
            records: Box::new(records),
        })
    }

    /// Opens a BAM file, or a plain or gzipped SAM file, going by the file
    /// extension.
    pub fn from_path<P: AsRef<Path>>(file_path: P) -> anyhow::Result<AlignmentReader> {
        let path = file_path.as_ref();
        let reader = match FileFormat::from_path(path) {
            Some(FileFormat::BAM) => {
                let file = File::open(path)
                    .with_context(|| format!("could not open BAM file {}", path.display()))?;
                AlignmentReader::from_bam(file)
            }
            _ => {
                let inner = get_reader_from_path(path)
                    .with_context(|| format!("could not open SAM file {}", path.display()))?;
                AlignmentReader::from_sam(inner)
            }
        };
        reader.with_context(|| format!("could not read the header of {}", path.display()))
    }

    pub fn header(&self) -> &sam::Header {
        &self.header
    }
}

impl Iterator for AlignmentReader {
    type Item = anyhow::Result<AlignmentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }
}

/// SAM records name their references; names missing from the header are
/// left for the resolver to report.
fn from_sam_record(record: &sam::Record) -> anyhow::Result<AlignmentRecord> {
    let reference_name = name_or_star(record.reference_sequence_name());
    let mate_reference_name = name_or_star(record.mate_reference_sequence_name());
    to_alignment_record(record, reference_name, mate_reference_name)
}

/// BAM records refer to the header by index.
fn from_bam_record(record: &bam::Record, names: &[String]) -> anyhow::Result<AlignmentRecord> {
    let reference_name = name_for_id(record.reference_sequence_id(), names)?;
    let mate_reference_name = name_for_id(record.mate_reference_sequence_id(), names)?;
    to_alignment_record(record, reference_name, mate_reference_name)
}

fn name_or_star<T: fmt::Display + ?Sized>(name: Option<&T>) -> String {
    name.map(|n| n.to_string())
        .unwrap_or_else(|| String::from("*"))
}

fn name_for_id(id: Option<io::Result<usize>>, names: &[String]) -> anyhow::Result<String> {
    match id.transpose()? {
        Some(id) => names
            .get(id)
            .cloned()
            .with_context(|| format!("reference sequence {} is not in the header", id)),
        None => Ok(String::from("*")),
    }
}

fn to_alignment_record<R: SamRecord + ?Sized>(
    record: &R,
    reference_name: String,
    mate_reference_name: String,
) -> anyhow::Result<AlignmentRecord> {
    let cigar = Cigar::try_from_record_cigar(record.cigar().as_ref())?;
    let read_name = name_or_star(record.name());
    let flags = record.flags()?;
    let mapping_quality = match record.mapping_quality().transpose()? {
        Some(mq) => u8::from(mq),
        None => 255,
    };
    let alignment_start = position(record.alignment_start(), &reference_name)?;
    let mate_alignment_start = position(record.mate_alignment_start(), &mate_reference_name)?;

    Ok(AlignmentRecord {
        read_name,
        flags,
        reference_name,
        alignment_start,
        mapping_quality,
        cigar,
        mate_reference_name,
        mate_alignment_start,
    })
}

/// A missing position is 0, as in SAM.
fn position(position: Option<io::Result<Position>>, reference_name: &str) -> anyhow::Result<i64> {
    let Some(position) = position.transpose()? else {
        return Ok(0);
    };
    let n = position.get();
    if n > MAX_POSITION {
        return Err(Rejection::CoordinateOutOfRange {
            chromosome: reference_name.to_string(),
            position: n as i64,
        }
        .into());
    }
    Ok(n as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Genome;

    const SAM: &str = "\
@HD\tVN:1.6\tSO:coordinate
@SQ\tSN:chr1\tLN:1000
@SQ\tSN:chr2\tLN:500
r1\t0\tchr1\t100\t60\t10M5N10M\t*\t0\t0\t*\t*
r2\t83\tchr2\t300\t30\t50M\t=\t100\t-250\t*\t*\tNM:i:0
r3\t4\t*\t0\t255\t*\t*\t0\t0\t*\t*
";

    fn sam_reader(data: &'static str) -> anyhow::Result<AlignmentReader> {
        AlignmentReader::from_sam(data.as_bytes())
    }

    #[test]
    fn test_header_and_records() {
        let reader = sam_reader(SAM).unwrap();
        let genome = Genome::from_sam_header(reader.header());
        assert_eq!(genome.chromosomes().len(), 2);
        assert_eq!(genome.chromosomes()[1].name(), "chr2");
        assert_eq!(genome.chromosomes()[1].length(), 500);

        let records: Vec<AlignmentRecord> = reader.collect::<anyhow::Result<_>>().unwrap();
        assert_eq!(records.len(), 3);

        let r1 = &records[0];
        assert_eq!(r1.read_name, "r1");
        assert_eq!(r1.reference_name, "chr1");
        assert_eq!(r1.alignment_end(), Ok(124));
        assert_eq!(r1.mapping_quality, 60);
        assert_eq!(r1.mate_reference_name, "*");

        let r2 = &records[1];
        assert!(r2.flags.is_segmented());
        assert!(r2.flags.is_reverse_complemented());
        assert!(r2.flags.is_first_segment());
        assert_eq!(r2.mate_alignment_start, 100);

        let r3 = &records[2];
        assert!(r3.flags.is_unmapped());
        assert!(r3.cigar.is_empty());
        assert_eq!((r3.reference_name.as_str(), r3.alignment_start), ("*", 0));
        assert_eq!(r3.mapping_quality, 255);
    }

    #[test]
    fn test_malformed_cigar_is_fatal() {
        let mut reader = sam_reader("r1\t0\tchr1\t100\t60\t10M5\t*\t0\t0\t*\t*\n").unwrap();
        let err = reader.next().unwrap().unwrap_err();
        let rejection = err.downcast_ref::<Rejection>().unwrap();
        assert!(rejection.is_fatal());

        assert!(sam_reader("@SQ\tSN:chr1\tLN:big\n").is_err());
    }

    #[test]
    fn test_positions_beyond_sam_range() {
        let ok = Position::try_from(MAX_POSITION).unwrap();
        assert_eq!(position(Some(Ok(ok)), "chr1").unwrap(), MAX_POSITION as i64);
        assert_eq!(position(None, "chr1").unwrap(), 0);

        let big = Position::try_from(MAX_POSITION + 1).unwrap();
        let err = position(Some(Ok(big)), "chr1").unwrap_err();
        assert_eq!(
            err.downcast_ref::<Rejection>(),
            Some(&Rejection::CoordinateOutOfRange {
                chromosome: String::from("chr1"),
                position: 1 << 31,
            })
        );
    }

    #[test]
    fn test_headerless_input() {
        let mut reader = sam_reader("r1\t16\tchrX\t5\t0\t3M\t*\t0\t0\t*\t*\n").unwrap();
        assert!(reader.header().reference_sequences().is_empty());
        let r = reader.next().unwrap().unwrap();
        assert!(r.flags.is_reverse_complemented());
        assert_eq!(r.reference_name, "chrX");
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_bam_reference_ids() {
        let names = vec![String::from("chr1"), String::from("chr2")];
        assert_eq!(name_for_id(Some(Ok(1)), &names).unwrap(), "chr2");
        assert_eq!(name_for_id(None, &names).unwrap(), "*");
        assert!(name_for_id(Some(Ok(2)), &names).is_err());
    }
}
