use crate::alignment::AlignmentRecord;
use tracing::info;

/// The number of records [`AlignmentOptions::detect_from_records`] looks at
/// when no limit is given by the caller.
pub const DETECTION_RECORD_LIMIT: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Controls how alignment records are turned into reads.
///
/// # Fields
///
/// * `paired_end`: If `true`, every record must be part of a pair. Unless
///   `split_spliced` is also set, each pair becomes one read spanning the
///   whole fragment, built from the end on the negative strand.
/// * `pair_distance`: The longest fragment, in bases, accepted in paired-end
///   mode. Longer fragments are reported and skipped.
/// * `split_spliced`: If `true`, spliced alignments are split into one read
///   per aligned block instead of one read covering the whole alignment.
/// * `import_introns`: Only used with `split_spliced`. If `true`, the skipped
///   regions (introns) become the reads instead of the aligned blocks.
/// * `extend_by`: Extends single-end reads by this many bases in their 3'
///   direction: forward reads at their end, reverse reads at their start.
/// * `min_mapping_quality`: Records with a lower MAPQ are dropped.
/// * `primary_only`: If `true`, secondary alignments are dropped.
///
/// # Examples
///
/// Importing spliced RNA-seq reads and keeping only their introns:
///
/// ```rust
/// use qcmap::options::AlignmentOptions;
///
/// let opts = AlignmentOptions {
///     split_spliced: true,
///     import_introns: true,
///     ..AlignmentOptions::default()
/// };
/// assert!(!opts.paired_end);
/// ```
pub struct AlignmentOptions {
    pub paired_end: bool,
    pub pair_distance: i64,
    pub split_spliced: bool,
    pub import_introns: bool,
    pub extend_by: i64,
    pub min_mapping_quality: u8,
    pub primary_only: bool,
}

impl Default for AlignmentOptions {
    fn default() -> AlignmentOptions {
        AlignmentOptions {
            paired_end: false,
            pair_distance: 1000,
            split_spliced: false,
            import_introns: false,
            extend_by: 0,
            min_mapping_quality: 0,
            primary_only: true,
        }
    }
}

impl AlignmentOptions {
    /// Constructs a new `AlignmentOptions` with every field given explicitly.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        paired_end: bool,
        pair_distance: i64,
        split_spliced: bool,
        import_introns: bool,
        extend_by: i64,
        min_mapping_quality: u8,
        primary_only: bool,
    ) -> AlignmentOptions {
        AlignmentOptions {
            paired_end,
            pair_distance,
            split_spliced,
            import_introns,
            extend_by,
            min_mapping_quality,
            primary_only,
        }
    }

    /// Suggests options by looking at the first records of a file.
    ///
    /// Paired-end import is suggested if any record carries the paired flag,
    /// and splitting if any CIGAR contains a reference skip. The remaining
    /// fields keep their defaults. Records that fail to read are skipped here;
    /// the real import reports them.
    ///
    /// ### Arguments
    ///
    /// * `records`: The records to inspect, usually a fresh reader over the
    ///   file that will be imported.
    /// * `limit`: How many records to look at, at most.
    pub fn detect_from_records<I>(records: I, limit: usize) -> AlignmentOptions
    where
        I: IntoIterator<Item = anyhow::Result<AlignmentRecord>>,
    {
        let mut opts = AlignmentOptions::default();
        let mut seen = 0usize;
        for record in records.into_iter().take(limit).flatten() {
            seen += 1;
            opts.paired_end |= record.flags.is_segmented();
            opts.split_spliced |= record.cigar.has_skip();
            if opts.paired_end && opts.split_spliced {
                break;
            }
        }
        info!(
            "Looked at {} records: paired_end={}, split_spliced={}",
            seen, opts.paired_end, opts.split_spliced
        );
        opts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Controls how GFF3/GTF records are turned into features.
///
/// # Fields
///
/// * `feature_prefix`: Prepended to every feature type, e.g. `"ens_"` turns
///   `gene` into `ens_gene`. Grouping still uses the unprefixed type.
/// * `checkpoint_interval`: After this many lines the feature sink is asked
///   to checkpoint, which lets a rotating sink bound the size of each
///   annotation set. `None` never checkpoints.
pub struct AnnotationOptions {
    pub feature_prefix: String,
    pub checkpoint_interval: Option<usize>,
}

impl Default for AnnotationOptions {
    fn default() -> AnnotationOptions {
        AnnotationOptions {
            feature_prefix: String::new(),
            checkpoint_interval: Some(1_000_000),
        }
    }
}

impl AnnotationOptions {
    pub fn new<T: Into<String>>(
        feature_prefix: T,
        checkpoint_interval: Option<usize>,
    ) -> AnnotationOptions {
        AnnotationOptions {
            feature_prefix: feature_prefix.into(),
            checkpoint_interval,
        }
    }
}
