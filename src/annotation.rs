//! Parsed annotation features and the sets that hold them.

use crate::genome::{Chromosome, ChromosomeFactory};
use crate::location::FeatureLocation;
use lazy_static::lazy_static;
use nutype::nutype;
use polars::prelude::*;
use rust_lapper::{Interval, Lapper};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

// every annotation set gets a process-unique id in
// the order the sets were created.
lazy_static! {
    static ref ANNOTATION_SET_COUNTER: AtomicU32 = AtomicU32::new(0);
}

type LapperType = Lapper<u64, usize>;

#[nutype]
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRef)]
/// The id of an [`AnnotationSet`].
pub struct AnnotationSetId(u32);

/// The attribute column of a GFF3/GTF record.
///
/// A key can occur several times; its values are kept in encounter order, and
/// keys keep the order in which they were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: Vec<(String, Vec<String>)>,
}

impl Attributes {
    pub fn new() -> Attributes {
        Attributes::default()
    }

    /// Appends `value` to the values of `key`.
    pub fn insert<K: AsRef<str>, V: Into<String>>(&mut self, key: K, value: V) {
        let key = key.as_ref();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, values)) => values.push(value.into()),
            None => self.entries.push((key.to_string(), vec![value.into()])),
        }
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// The first value of `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.first()).map(|s| s.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// The number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One annotated feature, e.g. a gene or an mRNA with its exons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    feature_type: String,
    chromosome: Chromosome,
    location: FeatureLocation,
    attributes: Attributes,
}

impl Feature {
    pub fn new<T: Into<String>, L: Into<FeatureLocation>>(
        feature_type: T,
        chromosome: Chromosome,
        location: L,
        attributes: Attributes,
    ) -> Feature {
        Feature {
            feature_type: feature_type.into(),
            chromosome,
            location: location.into(),
            attributes,
        }
    }

    pub fn feature_type(&self) -> &str {
        &self.feature_type
    }

    pub fn chromosome(&self) -> &Chromosome {
        &self.chromosome
    }

    pub fn location(&self) -> &FeatureLocation {
        &self.location
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// A display name: the first of `Name`, `ID`, `gene_name`,
    /// `transcript_id` and `gene_id` that is present.
    pub fn name(&self) -> Option<&str> {
        ["Name", "ID", "gene_name", "transcript_id", "gene_id"]
            .iter()
            .find_map(|k| self.attributes.first(k))
    }
}

/// Receives finished features from the annotation parser.
pub trait FeatureSink {
    fn add_feature(&mut self, feature: Feature);

    /// Called by the parser at regular line intervals. Sinks that bound their
    /// memory use rotate here.
    fn checkpoint(&mut self) {}
}

/// Features indexed by type and, once finalised, by position.
#[derive(Debug, Clone)]
pub struct AnnotationSet {
    id: AnnotationSetId,
    factory: ChromosomeFactory,
    features: Vec<Feature>,
    by_type: HashMap<String, Vec<usize>>,
    type_order: Vec<String>,
    lappers: Option<HashMap<String, LapperType>>,
}

impl Default for AnnotationSet {
    fn default() -> AnnotationSet {
        AnnotationSet::new()
    }
}

impl AnnotationSet {
    pub fn new() -> AnnotationSet {
        let id = ANNOTATION_SET_COUNTER.fetch_add(1, Ordering::SeqCst);
        AnnotationSet {
            id: AnnotationSetId::new(id),
            factory: ChromosomeFactory::new(),
            features: Vec::new(),
            by_type: HashMap::new(),
            type_order: Vec::new(),
            lappers: None,
        }
    }

    pub fn id(&self) -> AnnotationSetId {
        self.id
    }

    /// Adds a feature and makes its chromosome known to this set. Any
    /// positional index built by [`AnnotationSet::finalise`] is dropped.
    pub fn add_feature(&mut self, feature: Feature) {
        self.factory.register(feature.chromosome());
        let idx = self.features.len();
        match self.by_type.get_mut(feature.feature_type()) {
            Some(v) => v.push(idx),
            None => {
                self.type_order.push(feature.feature_type().to_string());
                self.by_type
                    .insert(feature.feature_type().to_string(), vec![idx]);
            }
        }
        self.features.push(feature);
        self.lappers = None;
    }

    /// Builds one interval tree per chromosome for overlap queries.
    pub fn finalise(&mut self) {
        let mut ivs: HashMap<String, Vec<Interval<u64, usize>>> = HashMap::new();
        for (idx, f) in self.features.iter().enumerate() {
            // lapper intervals are right-exclusive
            ivs.entry(f.chromosome().name().to_string())
                .or_default()
                .push(Interval {
                    start: f.location().start().max(0) as u64,
                    stop: f.location().end().max(0) as u64 + 1,
                    val: idx,
                });
        }
        let lappers: HashMap<String, LapperType> = ivs
            .into_iter()
            .map(|(chr, v)| (chr, Lapper::new(v)))
            .collect();
        debug!(
            "finalised annotation set {} with {} features on {} chromosomes",
            self.id.as_ref(),
            self.features.len(),
            lappers.len()
        );
        self.lappers = Some(lappers);
    }

    pub fn is_finalised(&self) -> bool {
        self.lappers.is_some()
    }

    /// Features on `chromosome` whose `[start, end]` overlaps the closed
    /// interval `[start, end]`, in insertion order. Works on a set that is
    /// not finalised too, by scanning every feature.
    pub fn features_overlapping(&self, chromosome: &str, start: i64, end: i64) -> Vec<&Feature> {
        let mut hits: Vec<usize> = match &self.lappers {
            Some(lappers) => match lappers.get(chromosome) {
                Some(lapper) => lapper
                    .find(start.max(0) as u64, end.max(0) as u64 + 1)
                    .map(|iv| iv.val)
                    .collect(),
                None => Vec::new(),
            },
            None => self
                .features
                .iter()
                .enumerate()
                .filter(|(_, f)| {
                    f.chromosome().name() == chromosome
                        && f.location().start() <= end
                        && start <= f.location().end()
                })
                .map(|(i, _)| i)
                .collect(),
        };
        hits.sort_unstable();
        hits.into_iter().map(|i| &self.features[i]).collect()
    }

    /// Feature types in the order they were first added.
    pub fn list_feature_types(&self) -> &[String] {
        &self.type_order
    }

    pub fn features_of_type(&self, feature_type: &str) -> Vec<&Feature> {
        self.by_type
            .get(feature_type)
            .map(|idxs| idxs.iter().map(|&i| &self.features[i]).collect())
            .unwrap_or_default()
    }

    pub fn features_on(&self, chromosome: &str, feature_type: &str) -> Vec<&Feature> {
        self.features_of_type(feature_type)
            .into_iter()
            .filter(|f| f.chromosome().name() == chromosome)
            .collect()
    }

    pub fn all_features(&self) -> &[Feature] {
        &self.features
    }

    pub fn has_features(&self) -> bool {
        !self.features.is_empty()
    }

    pub fn chromosome_factory(&self) -> &ChromosomeFactory {
        &self.factory
    }

    /// Exports one row per feature with the columns `seqname`,
    /// `feature_type`, `start`, `end`, `strand` and `n_spans`.
    pub fn to_df(&self) -> anyhow::Result<DataFrame> {
        let n = self.features.len();
        let mut seqname = Vec::with_capacity(n);
        let mut feature_type = Vec::with_capacity(n);
        let mut start = Vec::with_capacity(n);
        let mut end = Vec::with_capacity(n);
        let mut strand = Vec::with_capacity(n);
        let mut n_spans: Vec<u32> = Vec::with_capacity(n);

        for f in &self.features {
            seqname.push(f.chromosome().name().to_string());
            feature_type.push(f.feature_type().to_string());
            start.push(f.location().start());
            end.push(f.location().end());
            strand.push(f.location().strand().to_string());
            n_spans.push(f.location().spans().len() as u32);
        }

        let df = DataFrame::new(vec![
            Series::new("seqname", seqname),
            Series::new("feature_type", feature_type),
            Series::new("start", start),
            Series::new("end", end),
            Series::new("strand", strand),
            Series::new("n_spans", n_spans),
        ])?;
        Ok(df)
    }
}

impl FeatureSink for AnnotationSet {
    fn add_feature(&mut self, feature: Feature) {
        AnnotationSet::add_feature(self, feature);
    }
}

/// A sink that finalises its current [`AnnotationSet`] at every checkpoint
/// and starts a new one, so large annotations end up in several smaller
/// sets.
#[derive(Debug, Default)]
pub struct RotatingAnnotationSets {
    done: Vec<AnnotationSet>,
    current: AnnotationSet,
}

impl RotatingAnnotationSets {
    pub fn new() -> RotatingAnnotationSets {
        RotatingAnnotationSets::default()
    }

    /// The sets finalised so far, not counting the one being filled.
    pub fn completed(&self) -> &[AnnotationSet] {
        &self.done
    }

    pub fn total_features(&self) -> usize {
        self.done
            .iter()
            .chain(std::iter::once(&self.current))
            .map(|s| s.all_features().len())
            .sum()
    }

    /// Finalises the set being filled and returns all sets. The result is
    /// never empty.
    pub fn into_sets(mut self) -> Vec<AnnotationSet> {
        if self.current.has_features() || self.done.is_empty() {
            self.current.finalise();
            self.done.push(self.current);
        }
        self.done
    }
}

impl FeatureSink for RotatingAnnotationSets {
    fn add_feature(&mut self, feature: Feature) {
        self.current.add_feature(feature);
    }

    fn checkpoint(&mut self) {
        if !self.current.has_features() {
            return;
        }
        let mut full = std::mem::take(&mut self.current);
        full.finalise();
        debug!(
            "rotating annotation set {} after {} features",
            full.id().as_ref(),
            full.all_features().len()
        );
        self.done.push(full);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{Location, SplitLocation, Strand};

    fn feature(ft: &str, chr: &str, start: i64, end: i64) -> Feature {
        Feature::new(
            ft,
            Chromosome::new(chr, 0),
            Location::new(start, end, Strand::Forward),
            Attributes::new(),
        )
    }

    #[test]
    fn test_attributes_multimap() {
        let mut attrs = Attributes::new();
        attrs.insert("tag", "basic");
        attrs.insert("gene_id", "G1");
        attrs.insert("tag", "CCDS");
        assert_eq!(attrs.len(), 2);
        assert_eq!(
            attrs.get("tag").unwrap(),
            &[String::from("basic"), String::from("CCDS")]
        );
        assert_eq!(attrs.first("gene_id"), Some("G1"));
        assert!(!attrs.contains_key("Parent"));
        let keys: Vec<&str> = attrs.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["tag", "gene_id"]);
    }

    #[test]
    fn test_indexing_by_type_and_chromosome() {
        let mut set = AnnotationSet::new();
        set.add_feature(feature("gene", "1", 100, 200));
        set.add_feature(feature("exon", "1", 120, 150));
        set.add_feature(feature("gene", "2", 10, 20));

        assert_eq!(set.list_feature_types(), &["gene", "exon"]);
        assert_eq!(set.features_of_type("gene").len(), 2);
        assert_eq!(set.features_on("2", "gene").len(), 1);
        assert!(set.features_of_type("CDS").is_empty());
        assert!(set.chromosome_factory().contains("2"));
        assert!(set.has_features());
    }

    #[test]
    fn test_overlaps_before_and_after_finalise() {
        let mut set = AnnotationSet::new();
        set.add_feature(feature("gene", "1", 100, 200));
        set.add_feature(feature("gene", "1", 201, 300));
        set.add_feature(feature("gene", "2", 100, 200));

        let scan: Vec<i64> = set
            .features_overlapping("1", 200, 200)
            .iter()
            .map(|f| f.location().start())
            .collect();
        assert_eq!(scan, vec![100]);

        set.finalise();
        assert!(set.is_finalised());
        let indexed: Vec<i64> = set
            .features_overlapping("1", 150, 250)
            .iter()
            .map(|f| f.location().start())
            .collect();
        assert_eq!(indexed, vec![100, 201]);
        assert_eq!(set.features_overlapping("1", 200, 200).len(), 1);
        assert!(set.features_overlapping("3", 1, 1000).is_empty());

        set.add_feature(feature("gene", "1", 400, 500));
        assert!(!set.is_finalised());
    }

    #[test]
    fn test_unique_ids() {
        let a = AnnotationSet::new();
        let b = AnnotationSet::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_to_df() {
        let mut set = AnnotationSet::new();
        set.add_feature(feature("gene", "1", 100, 200));
        let split = SplitLocation::new(vec![
            Location::new(100, 120, Strand::Reverse),
            Location::new(150, 200, Strand::Reverse),
        ])
        .unwrap();
        set.add_feature(Feature::new(
            "mRNA",
            Chromosome::new("1", 0),
            FeatureLocation::Split(split),
            Attributes::new(),
        ));

        let df = set.to_df().unwrap();
        assert_eq!(df.shape(), (2, 6));
        let n_spans: Vec<Option<u32>> = df.column("n_spans").unwrap().u32().unwrap().into_iter().collect();
        assert_eq!(n_spans, vec![Some(1), Some(2)]);
        let strand: Vec<Option<&str>> = df.column("strand").unwrap().utf8().unwrap().into_iter().collect();
        assert_eq!(strand, vec![Some("+"), Some("-")]);
    }

    #[test]
    fn test_rotation() {
        let mut sink = RotatingAnnotationSets::new();
        sink.checkpoint();
        sink.add_feature(feature("gene", "1", 1, 10));
        sink.add_feature(feature("gene", "1", 20, 30));
        sink.checkpoint();
        sink.add_feature(feature("gene", "1", 40, 50));
        assert_eq!(sink.completed().len(), 1);
        assert_eq!(sink.total_features(), 3);

        let sets = sink.into_sets();
        assert_eq!(sets.len(), 2);
        assert!(sets.iter().all(|s| s.is_finalised()));
        assert_eq!(sets[1].all_features().len(), 1);

        assert_eq!(RotatingAnnotationSets::new().into_sets().len(), 1);
    }
}
