//! Turning alignment records into reads on chromosome coordinates.
//!
//! [`AlignmentNormalizer`] applies the import filters to one
//! [`AlignmentRecord`] and produces zero or more [`NormalizedRead`]s;
//! [`AlignmentParser`] drives it over a stream of records and hands the reads
//! to a [`ReadSink`].

use crate::cigar::{interpret, Cigar, SpanMode};
use crate::error::Rejection;
use crate::genome::{Chromosome, ChromosomeResolver, ChromosomeWithOffset};
use crate::location::Strand;
use crate::options::AlignmentOptions;
use crate::progress::{ParseContext, ParseOutcome};
use std::collections::HashMap;
use tracing::info;

pub use noodles::sam::alignment::record::Flags;

/// Progress is logged every this many records.
const PROGRESS_INTERVAL: usize = 100_000;

/// The fields of an alignment that read placement needs, decoded from a SAM
/// or BAM record.
///
/// Positions are 1-based. A missing mate reference is `*` and a missing mate
/// position is 0, as in SAM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRecord {
    pub read_name: String,
    pub flags: Flags,
    pub reference_name: String,
    pub alignment_start: i64,
    pub mapping_quality: u8,
    pub cigar: Cigar,
    pub mate_reference_name: String,
    pub mate_alignment_start: i64,
}

impl AlignmentRecord {
    /// A record without mate information and with an unavailable (255)
    /// mapping quality.
    pub fn new<T: Into<String>, U: Into<String>>(
        read_name: T,
        flags: Flags,
        reference_name: U,
        alignment_start: i64,
        cigar: Cigar,
    ) -> AlignmentRecord {
        AlignmentRecord {
            read_name: read_name.into(),
            flags,
            reference_name: reference_name.into(),
            alignment_start,
            mapping_quality: 255,
            cigar,
            mate_reference_name: String::from("*"),
            mate_alignment_start: 0,
        }
    }

    pub fn with_mapping_quality(mut self, mapq: u8) -> AlignmentRecord {
        self.mapping_quality = mapq;
        self
    }

    pub fn with_mate<T: Into<String>>(mut self, reference_name: T, start: i64) -> AlignmentRecord {
        self.mate_reference_name = reference_name.into();
        self.mate_alignment_start = start;
        self
    }

    /// The last reference base covered by the alignment.
    pub fn alignment_end(&self) -> Result<i64, Rejection> {
        self.cigar
            .alignment_end(self.alignment_start)
            .ok_or_else(|| Rejection::CoordinateOutOfRange {
                chromosome: self.reference_name.clone(),
                position: self.alignment_start,
            })
    }
}

const LENGTH_BITS: u32 = 30;
const MAX_LENGTH: i64 = (1 << LENGTH_BITS) - 1;

/// A read's start, end and strand packed into a single `u64`.
///
/// The start takes the upper 32 bits, `end - start` the next 30 and the
/// strand the lowest 2, so sorting packed reads sorts them by start first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackedRead(u64);

impl PackedRead {
    /// Packs a read, swapping reversed coordinates.
    ///
    /// ### Returns
    ///
    /// * [`None`] if the start is below 1 or does not fit in 32 bits, or if
    ///   the read is longer than 2^30 bases.
    pub fn new(start: i64, end: i64, strand: Strand) -> Option<PackedRead> {
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        if start < 1 || start > u32::MAX as i64 || end - start > MAX_LENGTH {
            return None;
        }
        Some(PackedRead(
            ((start as u64) << 32) | (((end - start) as u64) << 2) | strand.to_bits(),
        ))
    }

    pub fn start(&self) -> i64 {
        (self.0 >> 32) as i64
    }

    pub fn end(&self) -> i64 {
        self.start() + ((self.0 >> 2) & MAX_LENGTH as u64) as i64
    }

    pub fn strand(&self) -> Strand {
        Strand::from_bits(self.0)
    }

}

/// A read placed on a chromosome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRead {
    pub chromosome: Chromosome,
    pub read: PackedRead,
}

impl NormalizedRead {
    pub fn start(&self) -> i64 {
        self.read.start()
    }

    pub fn end(&self) -> i64 {
        self.read.end()
    }

    pub fn strand(&self) -> Strand {
        self.read.strand()
    }
}

/// Receives every read the parser accepts.
pub trait ReadSink {
    fn add_read(&mut self, read: NormalizedRead);
}

impl ReadSink for Vec<NormalizedRead> {
    fn add_read(&mut self, read: NormalizedRead) {
        self.push(read);
    }
}

/// Packed reads grouped by chromosome.
#[derive(Debug, Clone, Default)]
pub struct ReadStore {
    chromosomes: Vec<Chromosome>,
    reads: Vec<Vec<PackedRead>>,
    index: HashMap<String, usize>,
}

impl ReadStore {
    pub fn new() -> ReadStore {
        ReadStore::default()
    }

    /// Sorts the reads of every chromosome by position.
    pub fn finalise(&mut self) {
        for reads in self.reads.iter_mut() {
            reads.sort_unstable();
        }
    }

    pub fn total_reads(&self) -> usize {
        self.reads.iter().map(|r| r.len()).sum()
    }

    /// Chromosomes in the order their first read arrived.
    pub fn chromosomes(&self) -> &[Chromosome] {
        &self.chromosomes
    }

    pub fn reads_on(&self, chromosome: &str) -> &[PackedRead] {
        match self.index.get(chromosome) {
            Some(&i) => &self.reads[i],
            None => &[],
        }
    }
}

impl ReadSink for ReadStore {
    fn add_read(&mut self, read: NormalizedRead) {
        let i = match self.index.get(read.chromosome.name()) {
            Some(&i) => i,
            None => {
                let i = self.chromosomes.len();
                self.index.insert(read.chromosome.name().to_string(), i);
                self.chromosomes.push(read.chromosome.clone());
                self.reads.push(Vec::new());
                i
            }
        };
        self.reads[i].push(read.read);
    }
}

/// Applies the import filters to single records and places what survives.
#[derive(Debug, Clone, Default)]
pub struct AlignmentNormalizer {
    options: AlignmentOptions,
}

impl AlignmentNormalizer {
    pub fn new(options: AlignmentOptions) -> AlignmentNormalizer {
        AlignmentNormalizer { options }
    }

    pub fn options(&self) -> &AlignmentOptions {
        &self.options
    }

    /// Places one record.
    ///
    /// ### Returns
    ///
    /// * `Ok(reads)` with no reads if the record was filtered out silently,
    ///   one read for single-end and paired fragments, or one read per span
    ///   for spliced reads.
    /// * `Err(rejection)` if the record should be reported and skipped.
    pub fn normalize<R: ChromosomeResolver + ?Sized>(
        &self,
        record: &AlignmentRecord,
        resolver: &mut R,
    ) -> Result<Vec<NormalizedRead>, Rejection> {
        let opts = &self.options;
        let flags = record.flags;
        // fragments are built from pairs unless spliced reads are split
        let fragments = opts.paired_end && !opts.split_spliced;

        if opts.paired_end && !flags.is_segmented() {
            return Err(Rejection::SingleEndInPairedImport);
        }
        if flags.is_unmapped()
            || (opts.primary_only && flags.is_secondary())
            || (fragments && flags.is_mate_unmapped())
            || record.mapping_quality < opts.min_mapping_quality
            || (fragments && !flags.is_reverse_complemented())
            || (fragments && !mate_on_same_chromosome(record, resolver))
        {
            return Ok(Vec::new());
        }

        if fragments {
            self.paired_end_read(record, resolver).map(|r| vec![r])
        } else if opts.split_spliced {
            self.split_read(record, resolver)
        } else {
            self.single_end_read(record, resolver).map(|r| vec![r])
        }
    }

    fn single_end_read<R: ChromosomeResolver + ?Sized>(
        &self,
        record: &AlignmentRecord,
        resolver: &mut R,
    ) -> Result<NormalizedRead, Rejection> {
        let mut start = record.alignment_start;
        let mut end = record.alignment_end()?;
        let strand = if record.flags.is_reverse_complemented() {
            Strand::Reverse
        } else {
            Strand::Forward
        };

        let extend_by = self.options.extend_by;
        if extend_by > 0 {
            let out_of_range = |position| Rejection::CoordinateOutOfRange {
                chromosome: record.reference_name.clone(),
                position,
            };
            match strand {
                Strand::Forward => {
                    end = end.checked_add(extend_by).ok_or_else(|| out_of_range(end))?
                }
                Strand::Reverse => {
                    start = start
                        .checked_sub(extend_by)
                        .ok_or_else(|| out_of_range(start))?
                }
                Strand::Unknown => {}
            }
        }

        let c = resolver.resolve(&record.reference_name)?;
        let (start, end) = (c.position(start)?, c.position(end)?);
        if resolver.checks_bounds() {
            c.check_bounds(start, end)?;
        }
        place(&c, start, end, strand)
    }

    /// Builds the whole fragment from its negative-strand end.
    fn paired_end_read<R: ChromosomeResolver + ?Sized>(
        &self,
        record: &AlignmentRecord,
        resolver: &mut R,
    ) -> Result<NormalizedRead, Rejection> {
        let flags = record.flags;
        if !flags.is_reverse_complemented() {
            return Err(Rejection::DiscordantPair(
                "read passed as a pair was not on the negative strand",
            ));
        }
        if flags.is_mate_reverse_complemented() {
            return Err(Rejection::DiscordantPair("both ends on the negative strand"));
        }

        let c = resolver.resolve(&record.reference_name)?;
        let mate = record.mate_reference_name.as_str();
        let mate_c = if mate == "=" || mate == record.reference_name {
            c.clone()
        } else {
            resolver.resolve(mate)?
        };

        let end = c.position(record.alignment_end()?)?;
        let start = mate_c.position(record.mate_alignment_start)?;
        if start > end {
            return Err(Rejection::DiscordantPair("mate starts after the end of the read"));
        }

        let strand = if flags.is_first_segment() {
            Strand::Reverse
        } else {
            Strand::Forward
        };

        let distance = end.saturating_sub(start).saturating_add(1);
        if distance > self.options.pair_distance {
            return Err(Rejection::DistanceExceeded {
                distance,
                cutoff: self.options.pair_distance,
            });
        }

        if resolver.checks_bounds() {
            c.check_bounds(start, end)?;
        }
        place(&c, start, end, strand)
    }

    /// One read per exon, or one per intron when introns are imported.
    fn split_read<R: ChromosomeResolver + ?Sized>(
        &self,
        record: &AlignmentRecord,
        resolver: &mut R,
    ) -> Result<Vec<NormalizedRead>, Rejection> {
        let flags = record.flags;
        let mut strand = if flags.is_reverse_complemented() {
            Strand::Reverse
        } else {
            Strand::Forward
        };
        // second reads are flipped so the fragment keeps one strand
        if flags.is_segmented() && flags.is_last_segment() {
            strand = strand.flip();
        }

        let c = resolver.resolve(&record.reference_name)?;
        let checks_bounds = resolver.checks_bounds();

        let start = c.position(record.alignment_start)?;
        if checks_bounds && start < 1 {
            return Err(Rejection::BeforeChromosomeStart {
                chromosome: c.chromosome().name().to_string(),
                position: start,
                length: c.chromosome().length(),
            });
        }
        let end = c.position(record.alignment_end()?)?;

        let mode = if self.options.import_introns {
            SpanMode::Introns
        } else {
            SpanMode::Exons
        };

        interpret(&record.cigar, start, end, mode)
            .into_iter()
            .map(|(s, e)| {
                if checks_bounds {
                    c.check_bounds(s, e)?;
                }
                place(&c, s, e, strand)
            })
            .collect()
    }
}

fn place(
    c: &ChromosomeWithOffset,
    start: i64,
    end: i64,
    strand: Strand,
) -> Result<NormalizedRead, Rejection> {
    let read =
        PackedRead::new(start, end, strand).ok_or(Rejection::UnpackableRead { start, end })?;
    Ok(NormalizedRead {
        chromosome: c.chromosome().clone(),
        read,
    })
}

/// Whether both ends of a pair sit on the same chromosome. Names are
/// compared after resolution, so two source sequences aliased onto one
/// pseudo-chromosome count as the same.
fn mate_on_same_chromosome<R: ChromosomeResolver + ?Sized>(
    record: &AlignmentRecord,
    resolver: &mut R,
) -> bool {
    let mate = record.mate_reference_name.as_str();
    if mate == "=" || mate == record.reference_name {
        return true;
    }
    if mate == "*" {
        return false;
    }
    match (
        resolver.resolve(&record.reference_name),
        resolver.resolve(mate),
    ) {
        (Ok(a), Ok(b)) => a.chromosome().name() == b.chromosome().name(),
        // reported as an unknown chromosome once the read is placed
        (Err(_), _) => true,
        (Ok(_), Err(_)) => false,
    }
}

/// Streams alignment records through an [`AlignmentNormalizer`].
#[derive(Debug, Clone, Default)]
pub struct AlignmentParser {
    normalizer: AlignmentNormalizer,
}

impl AlignmentParser {
    pub fn new(options: AlignmentOptions) -> AlignmentParser {
        AlignmentParser {
            normalizer: AlignmentNormalizer::new(options),
        }
    }

    pub fn normalizer(&self) -> &AlignmentNormalizer {
        &self.normalizer
    }

    /// Places every record from `records` and passes the reads to `sink`.
    ///
    /// Recoverable rejections go to `ctx.warnings`, whether they come from
    /// the normalizer or from a reader that could decode the record but not
    /// use it. The cancellation token is checked before each record is
    /// handled; reads of records handled before cancellation or a fatal
    /// error stay in the sink.
    ///
    /// ### Returns
    ///
    /// * `Ok(ParseOutcome)` telling whether the stream was read to the end.
    /// * `Err(anyhow::Error)` if reading a record failed or a record carried
    ///   a fatal rejection such as a malformed CIGAR.
    pub fn parse<I, R, S>(
        &self,
        records: I,
        resolver: &mut R,
        sink: &mut S,
        ctx: &mut ParseContext,
    ) -> anyhow::Result<ParseOutcome>
    where
        I: IntoIterator<Item = anyhow::Result<AlignmentRecord>>,
        R: ChromosomeResolver + ?Sized,
        S: ReadSink + ?Sized,
    {
        let mut n_records = 0usize;
        let mut n_reads = 0usize;

        for result in records {
            if ctx.is_cancelled() {
                info!("Cancelled after {} alignment records", n_records);
                return Ok(ParseOutcome::Cancelled);
            }
            n_records += 1;
            if n_records % PROGRESS_INTERVAL == 0 {
                info!("Read {} alignment records", n_records);
            }

            let record = match result {
                Ok(record) => record,
                Err(e) => match e.downcast_ref::<Rejection>() {
                    Some(r) if !r.is_fatal() => {
                        ctx.warn(r);
                        continue;
                    }
                    _ => return Err(e.context(format!("alignment record {}", n_records))),
                },
            };

            match self.normalizer.normalize(&record, resolver) {
                Ok(reads) => {
                    n_reads += reads.len();
                    for read in reads {
                        sink.add_read(read);
                    }
                }
                Err(e) => ctx.warn(&e),
            }
        }

        info!(
            "Placed {} reads from {} alignment records",
            n_reads, n_records
        );
        ctx.warnings.log_summary("alignments");
        Ok(ParseOutcome::Completed)
    }
}
