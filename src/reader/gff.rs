//! GFF3 and GTF parsing.
//!
//! Both formats go through the same line parser. Records that belong together
//! (the exons of one transcript, found through a GFF3 `Parent` or a GTF
//! `transcript_id`) are collected into feature groups while the file is read
//! and only become [`Feature`]s once the whole input has been seen.

use crate::annotation::{AnnotationSet, Attributes, Feature, FeatureSink};
use crate::error::Rejection;
use crate::genome::{Chromosome, ChromosomeFactory, ChromosomeResolver};
use crate::location::{FeatureLocation, Location, SplitLocation, Strand};
use crate::options::AnnotationOptions;
use crate::progress::{ParseContext, ParseOutcome};
use crate::qcmap_utils::get_reader_from_path;
use anyhow::Context;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use tracing::info;

const PROGRESS_INTERVAL: usize = 1_000_000;

/// Parses the attribute column of a GFF3 (`key=value`) or GTF
/// (`key "value"`) record.
///
/// Tokens are separated by `;` and may be surrounded by spaces. Tokens in
/// neither form are reported to `ctx` and skipped.
pub fn parse_attributes(field: &str, ctx: &mut ParseContext) -> Attributes {
    let mut attrs = Attributes::new();
    for token in field.split(';') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if let Some((key, value)) = token.split_once('=') {
            attrs.insert(key.trim(), value.trim());
            continue;
        }
        let parts: Vec<&str> = token.split(" \"").collect();
        if parts.len() == 2 {
            let value = parts[1].strip_suffix('"').unwrap_or(parts[1]);
            attrs.insert(parts[0].trim(), value);
        } else {
            ctx.warn(&Rejection::MalformedAttribute(token.to_string()));
        }
    }
    attrs
}

/// One data line after column parsing and coordinate translation.
#[derive(Debug, Clone)]
struct AnnotationRecord {
    feature_type: String,
    chromosome: Chromosome,
    location: Location,
    attributes: Attributes,
}

/// What a record contributes to, decided from its type and attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Grouping {
    /// A child of every listed GFF3 parent.
    Parents(Vec<String>),
    /// A part of a GTF transcript.
    Transcript(String),
    /// A record with its own id, which may still gain parts.
    Identified(String),
    /// A standalone feature.
    Ungrouped,
}

impl Grouping {
    fn classify(feature_type: &str, attrs: &Attributes) -> Grouping {
        // an mRNA's parent is its gene, which it must not become a part of
        if feature_type != "mRNA" {
            if let Some(parents) = attrs.first("Parent") {
                return Grouping::Parents(parents.split(',').map(|p| p.to_string()).collect());
            }
        }
        if let Some(tid) = attrs.first("transcript_id") {
            return Grouping::Transcript(tid.to_string());
        }
        if let Some(id) = attrs.first("ID") {
            return Grouping::Identified(id.to_string());
        }
        Grouping::Ungrouped
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    feature_type: String,
    group_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Created by a record carrying the group's own `ID`.
    Record,
    /// Created by the first child that referenced it.
    Children,
}

/// A feature that is still collecting its parts.
#[derive(Debug, Clone)]
struct FeatureGroup {
    feature_type: String,
    chromosome: Chromosome,
    location: Location,
    attributes: Attributes,
    origin: Origin,
    sublocations: Vec<Location>,
}

impl FeatureGroup {
    fn into_feature(self) -> Feature {
        let location = match self.sublocations.len() {
            0 => FeatureLocation::Single(self.location),
            1 => FeatureLocation::Single(self.sublocations[0]),
            _ => SplitLocation::new(self.sublocations)
                .map_or(FeatureLocation::Single(self.location), FeatureLocation::Split),
        };
        Feature::new(
            self.feature_type,
            self.chromosome,
            location,
            self.attributes,
        )
    }
}

/// Collects grouped records until the end of the input. Groups are emitted in
/// the order they were opened.
#[derive(Debug)]
struct FeatureGrouper<'a> {
    prefix: &'a str,
    groups: Vec<FeatureGroup>,
    index: HashMap<GroupKey, usize>,
    emitted: usize,
}

impl<'a> FeatureGrouper<'a> {
    fn new(prefix: &'a str) -> FeatureGrouper<'a> {
        FeatureGrouper {
            prefix,
            groups: Vec::new(),
            index: HashMap::new(),
            emitted: 0,
        }
    }

    fn add<S: FeatureSink + ?Sized>(&mut self, record: AnnotationRecord, sink: &mut S) {
        match Grouping::classify(&record.feature_type, &record.attributes) {
            Grouping::Parents(ids) => {
                let feature_type = grouped_type(&record.feature_type);
                for id in ids {
                    self.add_part(
                        GroupKey {
                            feature_type: feature_type.to_string(),
                            group_id: id,
                        },
                        &record,
                    );
                }
            }
            Grouping::Transcript(id) => {
                let key = GroupKey {
                    feature_type: grouped_type(&record.feature_type).to_string(),
                    group_id: id,
                };
                self.add_part(key, &record);
            }
            Grouping::Identified(id) => {
                let key = GroupKey {
                    feature_type: record.feature_type.clone(),
                    group_id: id,
                };
                self.add_identified(key, record);
            }
            Grouping::Ungrouped => {
                sink.add_feature(Feature::new(
                    format!("{}{}", self.prefix, record.feature_type),
                    record.chromosome,
                    record.location,
                    record.attributes,
                ));
                self.emitted += 1;
            }
        }
    }

    fn add_part(&mut self, key: GroupKey, record: &AnnotationRecord) {
        if let Some(&i) = self.index.get(&key) {
            self.groups[i].sublocations.push(record.location);
            return;
        }
        self.open(
            key,
            FeatureGroup {
                feature_type: String::new(),
                chromosome: record.chromosome.clone(),
                location: record.location,
                attributes: record.attributes.clone(),
                origin: Origin::Children,
                sublocations: vec![record.location],
            },
        );
    }

    fn add_identified(&mut self, key: GroupKey, record: AnnotationRecord) {
        let Some(&i) = self.index.get(&key) else {
            self.open(
                key,
                FeatureGroup {
                    feature_type: String::new(),
                    chromosome: record.chromosome,
                    location: record.location,
                    attributes: record.attributes,
                    origin: Origin::Record,
                    sublocations: Vec::new(),
                },
            );
            return;
        };

        let group = &mut self.groups[i];
        match group.origin {
            // the same ID on several lines, e.g. a CDS split over exons
            Origin::Record => {
                if group.sublocations.is_empty() {
                    group.sublocations.push(group.location);
                }
                group.sublocations.push(record.location);
            }
            // the parent shows up after its children
            Origin::Children => {
                group.chromosome = record.chromosome;
                group.location = record.location;
                group.attributes = record.attributes;
                group.origin = Origin::Record;
            }
        }
    }

    fn open(&mut self, key: GroupKey, mut group: FeatureGroup) {
        group.feature_type = format!("{}{}", self.prefix, key.feature_type);
        self.index.insert(key, self.groups.len());
        self.groups.push(group);
    }

    fn finish<S: FeatureSink + ?Sized>(self, sink: &mut S) -> usize {
        let n = self.emitted + self.groups.len();
        for group in self.groups {
            sink.add_feature(group.into_feature());
        }
        n
    }
}

/// Exons are collected into the transcript they belong to.
fn grouped_type(feature_type: &str) -> &str {
    if feature_type == "exon" {
        "mRNA"
    } else {
        feature_type
    }
}

/// Reads GFF3/GTF annotation into a [`FeatureSink`].
#[derive(Debug, Clone, Default)]
pub struct GffParser {
    options: AnnotationOptions,
}

impl GffParser {
    pub fn new(options: AnnotationOptions) -> GffParser {
        GffParser { options }
    }

    pub fn options(&self) -> &AnnotationOptions {
        &self.options
    }

    /// Parses annotation lines from `reader`.
    ///
    /// Sequence names are translated with `resolver`. When the resolver checks
    /// bounds, features reaching outside their chromosome are reported and
    /// skipped. Grouped features reach `sink` only after the last line; if
    /// the parse is cancelled, groups still open are dropped while features
    /// already handed to `sink` stay there.
    ///
    /// ### Returns
    ///
    /// * `Ok(ParseOutcome)` telling whether the input was read to the end.
    /// * `Err(anyhow::Error)` if reading from `reader` failed.
    pub fn parse_into<B, R, S>(
        &self,
        reader: B,
        resolver: &mut R,
        sink: &mut S,
        ctx: &mut ParseContext,
    ) -> anyhow::Result<ParseOutcome>
    where
        B: BufRead,
        R: ChromosomeResolver + ?Sized,
        S: FeatureSink + ?Sized,
    {
        let mut grouper = FeatureGrouper::new(&self.options.feature_prefix);

        for (i, line) in reader.lines().enumerate() {
            if ctx.is_cancelled() {
                info!("Cancelled after {} annotation lines", i);
                return Ok(ParseOutcome::Cancelled);
            }
            let lineno = i + 1;
            let line = line.with_context(|| format!("could not read annotation line {}", lineno))?;

            if lineno % PROGRESS_INTERVAL == 0 {
                info!("Read {} annotation lines", lineno);
            }
            if let Some(n) = self.options.checkpoint_interval {
                if n > 0 && lineno % n == 0 {
                    sink.checkpoint();
                }
            }

            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_record(&line, resolver, ctx) {
                Ok(record) => grouper.add(record, sink),
                Err(e) => ctx.warn(&e),
            }
        }

        let n_features = grouper.finish(sink);
        info!("Parsed {} annotation features", n_features);
        ctx.warnings.log_summary("annotation");
        Ok(ParseOutcome::Completed)
    }

    /// Opens `file_path` (plain or gzipped) and parses it with
    /// [`GffParser::parse_into`].
    pub fn parse_path<P, R, S>(
        &self,
        file_path: P,
        resolver: &mut R,
        sink: &mut S,
        ctx: &mut ParseContext,
    ) -> anyhow::Result<ParseOutcome>
    where
        P: AsRef<Path>,
        R: ChromosomeResolver + ?Sized,
        S: FeatureSink + ?Sized,
    {
        let reader = get_reader_from_path(&file_path).with_context(|| {
            format!(
                "could not open annotation file {}",
                file_path.as_ref().display()
            )
        })?;
        info!("Parsing annotation from {}", file_path.as_ref().display());
        self.parse_into(reader, resolver, sink, ctx)
    }

    /// Parses without a genome: chromosomes are created from the sequence
    /// names as they appear, no offsets are applied and nothing is bounds
    /// checked. The returned set is finalised.
    pub fn parse_names_only<B: BufRead>(
        &self,
        reader: B,
        ctx: &mut ParseContext,
    ) -> anyhow::Result<(AnnotationSet, ParseOutcome)> {
        let mut factory = ChromosomeFactory::new();
        let mut set = AnnotationSet::new();
        let outcome = self.parse_into(reader, &mut factory, &mut set, ctx)?;
        set.finalise();
        Ok((set, outcome))
    }
}

/// Splits one data line into a record.
///
/// The columns are `seqid source type start end score strand frame
/// attributes`. Five columns are needed; without the strand column the
/// strand is unknown and without the attribute column there are no
/// attributes.
fn parse_record<R: ChromosomeResolver + ?Sized>(
    line: &str,
    resolver: &mut R,
    ctx: &mut ParseContext,
) -> Result<AnnotationRecord, Rejection> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 5 {
        return Err(Rejection::NotEnoughColumns(line.to_string()));
    }

    let (Ok(start), Ok(end)) = (
        fields[3].trim().parse::<i64>(),
        fields[4].trim().parse::<i64>(),
    ) else {
        return Err(Rejection::MalformedNumber {
            start: fields[3].to_string(),
            end: fields[4].to_string(),
        });
    };
    let strand = fields
        .get(6)
        .map(|s| Strand::from_column(s.trim()))
        .unwrap_or(Strand::Unknown);

    let c = resolver.resolve(fields[0])?;
    let location = Location::new(c.position(start)?, c.position(end)?, strand);
    if resolver.checks_bounds() {
        c.check_bounds(location.start(), location.end())?;
    }

    let attributes = match fields.get(8) {
        Some(a) if !a.trim().is_empty() => parse_attributes(a, ctx),
        _ => Attributes::new(),
    };

    Ok(AnnotationRecord {
        feature_type: fields[2].to_string(),
        chromosome: c.chromosome().clone(),
        location,
        attributes,
    })
}
