use flate2::write::GzEncoder;
use flate2::Compression;
use noodles::core::Position;
use noodles::sam::alignment::io::Write as _;
use noodles::sam::alignment::record::cigar::{op::Kind, Op};
use noodles::sam::alignment::record::{Flags, MappingQuality};
use noodles::sam::alignment::RecordBuf;
use noodles::sam::header::record::value::{map::ReferenceSequence, Map};
use noodles::{bam, sam};
use qcmap::annotation::RotatingAnnotationSets;
use qcmap::options::{AlignmentOptions, AnnotationOptions};
use qcmap::reader::AlignmentReader;
use qcmap::{
    AlignmentParser, AnnotationSet, ChromosomeFactory, Genome, GffParser, NormalizedRead,
    ParseContext, ParseOutcome, ReadStore, Rejection, Strand,
};
use std::io::{Cursor, Write};
use std::num::NonZeroUsize;

const CHR_LIST: &str = "chr1\t10000\nchr2\t5000\n";
const ALIASES: &str = "scaffold_1\tchr2\t1000\n";

fn genome() -> anyhow::Result<Genome> {
    let mut genome = Genome::from_chr_list(Cursor::new(CHR_LIST))?;
    genome.read_aliases(Cursor::new(ALIASES))?;
    Ok(genome)
}

#[test]
fn test_gtf_against_genome() -> anyhow::Result<()> {
    let gtf = "\
#!genome-build test
chr1\ttest\tgene\t100\t2000\t.\t+\t.\tgene_id \"G1\"; gene_name \"Foo\";
chr1\ttest\ttranscript\t100\t2000\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\";
chr1\ttest\texon\t100\t300\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\"; exon_number \"1\";
chr1\ttest\texon\t900\t1100\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\"; exon_number \"2\";
chr1\ttest\texon\t1800\t2000\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\"; exon_number \"3\";
scaffold_1\ttest\tgene\t1\t500\t.\t-\t.\tgene_id \"G2\";
chr3\ttest\tgene\t1\t500\t.\t-\t.\tgene_id \"G3\";
";
    let mut genome = genome()?;
    let mut set = AnnotationSet::new();
    let mut ctx = ParseContext::new();
    let outcome = GffParser::default().parse_into(
        Cursor::new(gtf),
        &mut genome,
        &mut set,
        &mut ctx,
    )?;
    set.finalise();

    assert_eq!(outcome, ParseOutcome::Completed);
    assert_eq!(ctx.warnings.count(), 1);

    // gene lines carry no transcript_id, so each one stands alone
    let genes = set.features_of_type("gene");
    assert_eq!(genes.len(), 2);
    assert_eq!(genes[0].name(), Some("Foo"));

    let mrna = set.features_of_type("mRNA");
    assert_eq!(mrna.len(), 1);
    assert_eq!(mrna[0].location().spans().len(), 3);

    // the transcript line is its own (transcript, T1) group
    assert_eq!(set.features_of_type("transcript").len(), 1);

    let g2 = set.features_on("chr2", "gene");
    assert_eq!(g2.len(), 1);
    assert_eq!(g2[0].location().start(), 1001);
    assert_eq!(g2[0].location().strand(), Strand::Reverse);

    let hits = set.features_overlapping("chr1", 950, 960);
    assert_eq!(hits.len(), 3);

    let df = set.to_df()?;
    assert_eq!(df.height(), 4);
    Ok(())
}

#[test]
fn test_gff3_preview_without_genome() -> anyhow::Result<()> {
    let gff = "\
##gff-version 3
ctgA\t.\tgene\t1000\t9000\t.\t+\t.\tID=gene00001;Name=EDEN
ctgA\t.\tmRNA\t1050\t9000\t.\t+\t.\tID=mRNA00001;Parent=gene00001
ctgA\t.\texon\t1050\t1500\t.\t+\t.\tParent=mRNA00001
ctgA\t.\texon\t3000\t3902\t.\t+\t.\tParent=mRNA00001
ctgA\t.\texon\t5000\t5500\t.\t+\t.\tParent=mRNA00001
ctgA\t.\texon\t7000\t9000\t.\t+\t.\tParent=mRNA00001
ctgB\t.\tmotif\t20\t10\t.\t.\t.\tNote=reversed
";
    let parser = GffParser::new(AnnotationOptions::new("eden_", None));
    let mut ctx = ParseContext::new();
    let (set, outcome) = parser.parse_names_only(Cursor::new(gff), &mut ctx)?;

    assert_eq!(outcome, ParseOutcome::Completed);
    assert!(ctx.warnings.is_empty());
    assert_eq!(set.list_feature_types(), &["eden_motif", "eden_gene", "eden_mRNA"]);

    let mrna = set.features_of_type("eden_mRNA");
    assert_eq!(mrna.len(), 1);
    assert_eq!(mrna[0].location().spans().len(), 4);
    assert_eq!(mrna[0].location().start(), 1050);

    let motif = set.features_of_type("eden_motif");
    assert_eq!((motif[0].location().start(), motif[0].location().end()), (10, 20));
    assert_eq!(set.chromosome_factory().len(), 2);
    Ok(())
}

#[test]
fn test_gzipped_annotation_from_path() -> anyhow::Result<()> {
    let path = std::env::temp_dir().join(format!("qcmap_test_{}.gtf.gz", std::process::id()));
    {
        let file = std::fs::File::create(&path)?;
        let mut enc = GzEncoder::new(file, Compression::default());
        for i in 0..10 {
            writeln!(
                enc,
                "chr1\ttest\texon\t{}\t{}\t.\t+\t.\ttranscript_id \"T{}\";",
                i * 100 + 1,
                i * 100 + 50,
                i % 2
            )?;
        }
        enc.finish()?;
    }

    let parser = GffParser::new(AnnotationOptions::new("", Some(4)));
    let mut sink = RotatingAnnotationSets::new();
    let mut ctx = ParseContext::new();
    let res = parser.parse_path(&path, &mut ChromosomeFactory::new(), &mut sink, &mut ctx);
    std::fs::remove_file(&path)?;
    assert_eq!(res?, ParseOutcome::Completed);

    let sets = sink.into_sets();
    let mrna: Vec<_> = sets.iter().flat_map(|s| s.features_of_type("mRNA")).collect();
    assert_eq!(mrna.len(), 2);
    assert!(mrna.iter().all(|f| f.location().spans().len() == 5));
    Ok(())
}

const SAM: &str = "\
@HD\tVN:1.6
@SQ\tSN:chr1\tLN:10000
@SQ\tSN:chr2\tLN:5000
single\t0\tchr1\t100\t60\t50M\t*\t0\t0\t*\t*
spliced\t16\tchr1\t1000\t60\t20M100N30M\t*\t0\t0\t*\t*
lowq\t0\tchr1\t100\t3\t50M\t*\t0\t0\t*\t*
unknown\t0\tchrM\t10\t60\t50M\t*\t0\t0\t*\t*
offend\t0\tchr2\t4990\t60\t50M\t*\t0\t0\t*\t*
";

#[test]
fn test_sam_single_end_import() -> anyhow::Result<()> {
    let reader = AlignmentReader::from_sam(Cursor::new(SAM))?;
    let mut genome = Genome::from_sam_header(reader.header());
    let options = AlignmentOptions {
        min_mapping_quality: 10,
        ..AlignmentOptions::default()
    };

    let mut store = ReadStore::new();
    let mut ctx = ParseContext::new();
    let outcome = AlignmentParser::new(options).parse(reader, &mut genome, &mut store, &mut ctx)?;
    store.finalise();

    assert_eq!(outcome, ParseOutcome::Completed);
    assert_eq!(store.total_reads(), 2);
    let chr1 = store.reads_on("chr1");
    assert_eq!((chr1[0].start(), chr1[0].end()), (100, 149));
    // unsplit reads keep their introns
    assert_eq!((chr1[1].start(), chr1[1].end(), chr1[1].strand()), (1000, 1149, Strand::Reverse));

    // unknown chromosome and the read running off chr2
    assert_eq!(ctx.warnings.count(), 2);
    Ok(())
}

#[test]
fn test_sam_spliced_import() -> anyhow::Result<()> {
    let reader = AlignmentReader::from_sam(Cursor::new(SAM))?;
    let mut genome = Genome::from_sam_header(reader.header());
    let options = AlignmentOptions {
        split_spliced: true,
        import_introns: true,
        ..AlignmentOptions::default()
    };

    let mut reads: Vec<NormalizedRead> = Vec::new();
    let mut ctx = ParseContext::new();
    AlignmentParser::new(options).parse(reader, &mut genome, &mut reads, &mut ctx)?;

    assert_eq!(reads.len(), 1);
    assert_eq!((reads[0].start(), reads[0].end()), (1020, 1119));
    assert_eq!(reads[0].chromosome.name(), "chr1");
    Ok(())
}

#[test]
fn test_sam_paired_end_import() -> anyhow::Result<()> {
    let sam: &'static str = "\
@SQ\tSN:chr1\tLN:10000
p1\t99\tchr1\t100\t60\t50M\t=\t300\t250\t*\t*
p1\t147\tchr1\t300\t60\t50M\t=\t100\t-250\t*\t*
p2\t97\tchr1\t100\t60\t50M\tchr2\t300\t0\t*\t*
p3\t115\tchr1\t500\t60\t50M\t=\t100\t0\t*\t*
s1\t0\tchr1\t500\t60\t50M\t*\t0\t0\t*\t*
";
    let reader = AlignmentReader::from_sam(Cursor::new(sam))?;
    let mut genome = Genome::from_sam_header(reader.header());
    let options = AlignmentOptions {
        paired_end: true,
        ..AlignmentOptions::default()
    };

    let mut reads: Vec<NormalizedRead> = Vec::new();
    let mut ctx = ParseContext::new();
    AlignmentParser::new(options).parse(reader, &mut genome, &mut reads, &mut ctx)?;

    assert_eq!(reads.len(), 1);
    assert_eq!(
        (reads[0].start(), reads[0].end(), reads[0].strand()),
        (100, 349, Strand::Forward)
    );
    // p3 has both ends reversed, s1 is single ended
    assert_eq!(ctx.warnings.count(), 2);
    Ok(())
}

fn bam_record(name: &str, flags: Flags, start: usize, ops: &[(Kind, usize)]) -> anyhow::Result<RecordBuf> {
    let mut record = RecordBuf::default();
    *record.name_mut() = Some(name.into());
    *record.flags_mut() = flags;
    *record.reference_sequence_id_mut() = Some(0);
    *record.alignment_start_mut() = Some(Position::try_from(start)?);
    *record.mapping_quality_mut() = MappingQuality::new(60);
    *record.cigar_mut() = ops.iter().map(|&(kind, len)| Op::new(kind, len)).collect();
    Ok(record)
}

#[test]
fn test_bam_import() -> anyhow::Result<()> {
    let header = sam::Header::builder()
        .add_reference_sequence(
            "chr1",
            Map::<ReferenceSequence>::new(NonZeroUsize::try_from(10_000)?),
        )
        .build();
    let records = vec![
        bam_record("a", Flags::empty(), 100, &[(Kind::Match, 50)])?,
        bam_record(
            "b",
            Flags::REVERSE_COMPLEMENTED,
            1000,
            &[(Kind::Match, 20), (Kind::Skip, 100), (Kind::Match, 30)],
        )?,
        bam_record("c", Flags::empty(), 9990, &[(Kind::Match, 50)])?,
    ];

    let path = std::env::temp_dir().join(format!("qcmap_test_{}.bam", std::process::id()));
    {
        let mut writer = bam::io::Writer::new(std::fs::File::create(&path)?);
        writer.write_header(&header)?;
        for record in &records {
            writer.write_alignment_record(&header, record)?;
        }
    }

    let res = (|| -> anyhow::Result<(Vec<NormalizedRead>, ParseContext)> {
        let reader = AlignmentReader::from_path(&path)?;
        let mut genome = Genome::from_sam_header(reader.header());
        let options = AlignmentOptions {
            split_spliced: true,
            ..AlignmentOptions::default()
        };
        let mut reads: Vec<NormalizedRead> = Vec::new();
        let mut ctx = ParseContext::new();
        AlignmentParser::new(options).parse(reader, &mut genome, &mut reads, &mut ctx)?;
        Ok((reads, ctx))
    })();
    std::fs::remove_file(&path)?;
    let (reads, ctx) = res?;

    let spans: Vec<_> = reads.iter().map(|r| (r.start(), r.end(), r.strand())).collect();
    assert_eq!(
        spans,
        vec![
            (100, 149, Strand::Forward),
            (1000, 1019, Strand::Reverse),
            (1120, 1149, Strand::Reverse),
        ]
    );
    // c runs off the end of chr1
    assert_eq!(ctx.warnings.count(), 1);
    Ok(())
}

#[test]
fn test_sam_with_broken_cigar_stops_the_file() -> anyhow::Result<()> {
    let sam: &'static str = "\
@SQ\tSN:chr1\tLN:10000
a\t0\tchr1\t100\t60\t50M\t*\t0\t0\t*\t*
b\t0\tchr1\t200\t60\t50M5\t*\t0\t0\t*\t*
c\t0\tchr1\t300\t60\t50M\t*\t0\t0\t*\t*
";
    let reader = AlignmentReader::from_sam(Cursor::new(sam))?;
    let mut genome = Genome::from_sam_header(reader.header());
    let mut store = ReadStore::new();
    let mut ctx = ParseContext::new();
    let err = AlignmentParser::default()
        .parse(reader, &mut genome, &mut store, &mut ctx)
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<Rejection>(),
        Some(Rejection::MalformedCigar { .. })
    ));
    assert_eq!(store.total_reads(), 1);
    Ok(())
}
