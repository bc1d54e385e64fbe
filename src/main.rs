use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use peak_alloc::PeakAlloc;
use qcmap::annotation::RotatingAnnotationSets;
use qcmap::genome::{ChromosomeFactory, Genome};
use qcmap::options::{AlignmentOptions, AnnotationOptions, DETECTION_RECORD_LIMIT};
use qcmap::progress::{ParseContext, ParseOutcome};
use qcmap::qcmap_utils::{get_reader_from_path, FileFormat};
use qcmap::reader::{AlignmentReader, GffParser};
use qcmap::{AlignmentParser, ReadStore};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

#[global_allocator]
static PEAK_ALLOC: PeakAlloc = PeakAlloc;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse a GFF3/GTF file and summarise its features
    Annotation(AnnotationArgs),
    /// Place the alignments of a SAM or BAM file on chromosome coordinates
    Alignments(AlignmentArgs),
}

#[derive(Debug, Args)]
struct GenomeArgs {
    /// FASTA file whose sequences are the chromosomes
    #[arg(long, conflicts_with = "chr_list")]
    genome: Option<PathBuf>,
    /// Tab-separated `name length` list of chromosomes
    #[arg(long)]
    chr_list: Option<PathBuf>,
    /// Tab-separated `source chromosome offset` lines placing source
    /// sequences on pseudo-chromosomes
    #[arg(long)]
    aliases: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct AnnotationArgs {
    /// GFF3 or GTF file, plain or gzipped
    file: PathBuf,
    #[command(flatten)]
    genome: GenomeArgs,
    /// Prefix added to every feature type
    #[arg(long, default_value = "")]
    prefix: String,
    /// Start a new annotation set every this many lines (0 never does)
    #[arg(long, default_value_t = 1_000_000)]
    checkpoint_interval: usize,
}

#[derive(Debug, Args)]
struct AlignmentArgs {
    /// BAM file, or SAM file (plain or gzipped)
    file: PathBuf,
    #[command(flatten)]
    genome: GenomeArgs,
    /// Build one read per fragment from paired-end data
    #[arg(long)]
    paired_end: bool,
    /// Longest fragment accepted in paired-end mode
    #[arg(long, default_value_t = 1000)]
    pair_distance: i64,
    /// Split spliced reads into one read per aligned block
    #[arg(long)]
    split_spliced: bool,
    /// With --split-spliced, keep the introns instead of the exons
    #[arg(long, requires = "split_spliced")]
    import_introns: bool,
    /// Extend single-end reads by this many bases in their 3' direction
    #[arg(long, default_value_t = 0)]
    extend_by: i64,
    /// Drop alignments with a lower mapping quality
    #[arg(long, default_value_t = 0)]
    min_mapq: u8,
    /// Keep secondary alignments
    #[arg(long)]
    include_secondary: bool,
    /// Turn on paired-end and spliced import if the first records call for it
    #[arg(long)]
    detect: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let start = Instant::now();

    match cli.command {
        Commands::Annotation(args) => run_annotation(args)?,
        Commands::Alignments(args) => run_alignments(args)?,
    }

    let duration: Duration = start.elapsed();
    info!("finished in {:?}", duration);
    let peak_mem = PEAK_ALLOC.peak_usage_as_mb();
    println!("Peak memory usage was {:.1} MB", peak_mem);
    Ok(())
}

/// Loads the genome given on the command line, if any.
fn load_genome(args: &GenomeArgs) -> anyhow::Result<Option<Genome>> {
    let mut genome = match (&args.genome, &args.chr_list) {
        (Some(fasta), _) => Genome::from_fasta(fasta)?,
        (None, Some(list)) => Genome::from_chr_list(get_reader_from_path(list)?)
            .with_context(|| format!("could not read chromosome list {}", list.display()))?,
        (None, None) => {
            if args.aliases.is_some() {
                anyhow::bail!("--aliases needs --genome or --chr-list");
            }
            return Ok(None);
        }
    };
    if let Some(aliases) = &args.aliases {
        genome
            .read_aliases(get_reader_from_path(aliases)?)
            .with_context(|| format!("could not read aliases from {}", aliases.display()))?;
    }
    Ok(Some(genome))
}

fn run_annotation(args: AnnotationArgs) -> anyhow::Result<()> {
    match FileFormat::from_path(&args.file) {
        Some(ft) if ft.is_annotation() => info!("reading {} annotation", ft),
        Some(ft) => anyhow::bail!("{} looks like {}, not GFF3/GTF", args.file.display(), ft),
        None => warn!("unknown extension on {}, reading it as GFF3/GTF", args.file.display()),
    }
    let interval = (args.checkpoint_interval > 0).then_some(args.checkpoint_interval);
    let parser = GffParser::new(AnnotationOptions::new(args.prefix.clone(), interval));
    let mut sink = RotatingAnnotationSets::new();
    let mut ctx = ParseContext::new();

    let outcome = match load_genome(&args.genome)? {
        Some(mut genome) => parser.parse_path(&args.file, &mut genome, &mut sink, &mut ctx)?,
        None => parser.parse_path(
            &args.file,
            &mut ChromosomeFactory::new(),
            &mut sink,
            &mut ctx,
        )?,
    };
    let sets = sink.into_sets();

    let mut per_type: BTreeMap<&str, usize> = BTreeMap::new();
    for set in &sets {
        for ft in set.list_feature_types() {
            *per_type.entry(ft.as_str()).or_insert(0) += set.features_of_type(ft).len();
        }
    }

    println!("{} in {} annotation set(s)", args.file.display(), sets.len());
    for (ft, n) in per_type {
        println!("{}\t{}", ft, n);
    }
    report(outcome, &ctx);
    Ok(())
}

fn run_alignments(args: AlignmentArgs) -> anyhow::Result<()> {
    match FileFormat::from_path(&args.file) {
        Some(FileFormat::SAM) | Some(FileFormat::BAM) => {}
        Some(ft) => anyhow::bail!("{} looks like {}, not SAM/BAM", args.file.display(), ft),
        None => warn!("unknown extension on {}, reading it as SAM", args.file.display()),
    }
    let mut options = AlignmentOptions::new(
        args.paired_end,
        args.pair_distance,
        args.split_spliced,
        args.import_introns,
        args.extend_by,
        args.min_mapq,
        !args.include_secondary,
    );
    if args.detect {
        let detected = detect(&args.file)?;
        options.paired_end |= detected.paired_end;
        options.split_spliced |= detected.split_spliced;
    }
    info!("alignment options: {:?}", options);

    let reader = AlignmentReader::from_path(&args.file)?;
    let mut genome = match load_genome(&args.genome)? {
        Some(genome) => genome,
        None => Genome::from_sam_header(reader.header()),
    };
    if genome.chromosomes().is_empty() {
        anyhow::bail!(
            "{} has no @SQ header lines; pass --genome or --chr-list",
            args.file.display()
        );
    }

    let mut store = ReadStore::new();
    let mut ctx = ParseContext::new();
    let outcome = AlignmentParser::new(options).parse(reader, &mut genome, &mut store, &mut ctx)?;
    store.finalise();

    println!(
        "{}: {} reads on {} chromosome(s)",
        args.file.display(),
        store.total_reads(),
        store.chromosomes().len()
    );
    for chrom in store.chromosomes() {
        println!("{}\t{}", chrom.name(), store.reads_on(chrom.name()).len());
    }
    report(outcome, &ctx);
    Ok(())
}

fn detect(file: &Path) -> anyhow::Result<AlignmentOptions> {
    let reader = AlignmentReader::from_path(file)?;
    Ok(AlignmentOptions::detect_from_records(
        reader,
        DETECTION_RECORD_LIMIT,
    ))
}

fn report(outcome: ParseOutcome, ctx: &ParseContext) {
    if outcome == ParseOutcome::Cancelled {
        println!("parsing was cancelled");
    }
    println!("{} warning(s)", ctx.warnings.count());
    for msg in ctx.warnings.sample() {
        println!("  {}", msg);
    }
}
