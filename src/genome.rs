//! Chromosomes and the translation of reference sequence names into
//! chromosome coordinates.
//!
//! A [`Genome`] knows the real chromosomes and, for concatenated
//! pseudo-chromosome genomes, which source sequence sits at which offset of
//! which pseudo-chromosome. A [`ChromosomeFactory`] only interns names and is
//! what annotation previews use when no genome is loaded. Both implement
//! [`ChromosomeResolver`], so the parsers run the same code either way.

use crate::error::Rejection;
use crate::reader::fasta::get_chromsize;
use anyhow::{bail, Context};
use noodles::sam;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// A named chromosome with its length in bases.
///
/// Cloning is cheap; the name is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chromosome {
    name: Arc<str>,
    length: i64,
}

impl Chromosome {
    pub fn new<T: AsRef<str>>(name: T, length: i64) -> Chromosome {
        Chromosome {
            name: Arc::from(name.as_ref()),
            length,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The length of the chromosome. Zero means the length is not known.
    pub fn length(&self) -> i64 {
        self.length
    }
}

/// Interns [`Chromosome`]s by name.
///
/// Lookups are case-sensitive. Chromosomes keep the order in which they were
/// first seen.
#[derive(Debug, Clone, Default)]
pub struct ChromosomeFactory {
    chromosomes: Vec<Chromosome>,
    index: HashMap<String, usize>,
}

impl ChromosomeFactory {
    pub fn new() -> ChromosomeFactory {
        ChromosomeFactory::default()
    }

    /// Returns the chromosome called `name`, creating it with an unknown
    /// (zero) length the first time the name is seen.
    pub fn get_or_create(&mut self, name: &str) -> Chromosome {
        if let Some(&i) = self.index.get(name) {
            return self.chromosomes[i].clone();
        }
        let chrom = Chromosome::new(name, 0);
        self.index.insert(name.to_string(), self.chromosomes.len());
        self.chromosomes.push(chrom.clone());
        chrom
    }

    pub fn get(&self, name: &str) -> Option<&Chromosome> {
        self.index.get(name).map(|&i| &self.chromosomes[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Makes `chrom` known to this factory. An existing entry with the same
    /// name takes over the length of `chrom` if it had none.
    pub fn register(&mut self, chrom: &Chromosome) {
        match self.index.get(chrom.name()) {
            Some(&i) => {
                if self.chromosomes[i].length == 0 {
                    self.chromosomes[i].length = chrom.length;
                }
            }
            None => {
                self.index
                    .insert(chrom.name().to_string(), self.chromosomes.len());
                self.chromosomes.push(chrom.clone());
            }
        }
    }

    /// Sets the length of `name`, creating the chromosome if needed.
    /// Only meant for genome construction, before any parsing starts.
    pub fn set_length(&mut self, name: &str, length: i64) {
        self.get_or_create(name);
        if let Some(&i) = self.index.get(name) {
            self.chromosomes[i].length = length;
        }
    }

    pub fn chromosomes(&self) -> &[Chromosome] {
        &self.chromosomes
    }

    pub fn len(&self) -> usize {
        self.chromosomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chromosomes.is_empty()
    }
}

/// A chromosome together with the offset at which a source sequence starts
/// inside it. The offset is 0 unless the genome is made of pseudo-chromosomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromosomeWithOffset {
    chromosome: Chromosome,
    offset: i64,
}

impl ChromosomeWithOffset {
    pub fn new(chromosome: Chromosome, offset: i64) -> ChromosomeWithOffset {
        ChromosomeWithOffset { chromosome, offset }
    }

    pub fn chromosome(&self) -> &Chromosome {
        &self.chromosome
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Translates a position local to the source sequence into a position on
    /// the chromosome.
    #[inline]
    pub fn position(&self, local_pos: i64) -> Result<i64, Rejection> {
        local_pos
            .checked_add(self.offset)
            .ok_or_else(|| Rejection::CoordinateOutOfRange {
                chromosome: self.chromosome.name().to_string(),
                position: local_pos,
            })
    }

    /// Checks already translated coordinates against the chromosome.
    /// The end is checked before the start.
    pub fn check_bounds(&self, start: i64, end: i64) -> Result<(), Rejection> {
        let length = self.chromosome.length();
        if end > length {
            return Err(Rejection::PastChromosomeEnd {
                chromosome: self.chromosome.name().to_string(),
                position: end,
                overrun: end - length,
                length,
            });
        }
        if start < 1 {
            return Err(Rejection::BeforeChromosomeStart {
                chromosome: self.chromosome.name().to_string(),
                position: start,
                length,
            });
        }
        Ok(())
    }
}

/// Something that can turn a reference sequence name from an input file into
/// a chromosome and an offset.
pub trait ChromosomeResolver {
    /// Resolves `name`, failing with [`Rejection::UnknownChromosome`] if the
    /// name is not known. Callers skip the record and carry on.
    fn resolve(&mut self, name: &str) -> Result<ChromosomeWithOffset, Rejection>;

    /// Whether translated positions should be checked against chromosome
    /// lengths.
    fn checks_bounds(&self) -> bool {
        true
    }
}

/// Name-only resolution: every name is accepted, offsets are zero and no
/// bounds are checked since lengths are unknown.
impl ChromosomeResolver for ChromosomeFactory {
    fn resolve(&mut self, name: &str) -> Result<ChromosomeWithOffset, Rejection> {
        Ok(ChromosomeWithOffset::new(self.get_or_create(name), 0))
    }

    fn checks_bounds(&self) -> bool {
        false
    }
}

/// The chromosomes of a genome plus the aliases that place source sequences
/// on pseudo-chromosomes.
#[derive(Debug, Clone, Default)]
pub struct Genome {
    factory: ChromosomeFactory,
    aliases: HashMap<String, (String, i64)>,
}

impl Genome {
    pub fn new() -> Genome {
        Genome::default()
    }

    /// Builds a genome from `(name, length)` pairs, e.g. the `@SQ` lines of a
    /// SAM header.
    pub fn from_reference_sequences<I, T>(seqs: I) -> Genome
    where
        I: IntoIterator<Item = (T, i64)>,
        T: AsRef<str>,
    {
        let mut genome = Genome::new();
        for (name, length) in seqs {
            genome.add_chromosome(name.as_ref(), length);
        }
        genome
    }

    /// Builds a genome from the sequence names and lengths of a FASTA file
    /// (plain or gzipped).
    pub fn from_fasta<T: AsRef<Path>>(file_path: T) -> anyhow::Result<Genome> {
        let (seqnames, seqlengths) = get_chromsize(&file_path).with_context(|| {
            format!(
                "could not read chromosome sizes from {}",
                file_path.as_ref().display()
            )
        })?;
        let genome = Genome::from_reference_sequences(
            seqnames
                .into_iter()
                .zip(seqlengths.into_iter().map(|l| l as i64)),
        );
        info!(
            "Loaded {} chromosomes from {}",
            genome.chromosomes().len(),
            file_path.as_ref().display()
        );
        Ok(genome)
    }

    /// Builds a genome from the reference sequences (`@SQ` lines) of a SAM or
    /// BAM header.
    pub fn from_sam_header(header: &sam::Header) -> Genome {
        Genome::from_reference_sequences(
            header
                .reference_sequences()
                .iter()
                .map(|(name, rs)| (name.to_string(), rs.length().get() as i64)),
        )
    }

    /// Reads a chromosome list: one `name<TAB>length` entry per line.
    pub fn from_chr_list<R: BufRead>(reader: R) -> anyhow::Result<Genome> {
        let mut genome = Genome::new();
        for (i, l) in reader.lines().enumerate() {
            let line = l?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split('\t');
            let (Some(name), Some(length)) = (fields.next(), fields.next()) else {
                bail!("chromosome list line {} has fewer than 2 fields", i + 1);
            };
            let length = length
                .trim()
                .parse::<i64>()
                .with_context(|| format!("invalid chromosome length on line {}", i + 1))?;
            genome.add_chromosome(name, length);
        }
        Ok(genome)
    }

    /// Reads pseudo-chromosome aliases: one
    /// `source_name<TAB>chromosome<TAB>offset` entry per line. The chromosome
    /// must already be part of the genome.
    pub fn read_aliases<R: BufRead>(&mut self, reader: R) -> anyhow::Result<()> {
        for (i, l) in reader.lines().enumerate() {
            let line = l?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 3 {
                bail!("alias line {} has fewer than 3 fields", i + 1);
            }
            let offset = fields[2]
                .trim()
                .parse::<i64>()
                .with_context(|| format!("invalid offset on alias line {}", i + 1))?;
            self.add_alias(fields[0], fields[1], offset)?;
        }
        Ok(())
    }

    pub fn add_chromosome(&mut self, name: &str, length: i64) {
        self.factory.set_length(name, length);
    }

    /// Places the source sequence `source_name` at `offset` on `chromosome`.
    pub fn add_alias(&mut self, source_name: &str, chromosome: &str, offset: i64) -> anyhow::Result<()> {
        if !self.factory.contains(chromosome) {
            bail!(
                "cannot alias {} to unknown chromosome {}",
                source_name,
                chromosome
            );
        }
        self.aliases
            .insert(source_name.to_string(), (chromosome.to_string(), offset));
        Ok(())
    }

    pub fn chromosomes(&self) -> &[Chromosome] {
        self.factory.chromosomes()
    }

    pub fn chromosome_factory(&self) -> &ChromosomeFactory {
        &self.factory
    }

    /// Resolves a name without needing mutable access.
    pub fn get_chromosome(&self, name: &str) -> Result<ChromosomeWithOffset, Rejection> {
        if let Some(c) = self.factory.get(name) {
            return Ok(ChromosomeWithOffset::new(c.clone(), 0));
        }
        if let Some((chr_name, offset)) = self.aliases.get(name) {
            if let Some(c) = self.factory.get(chr_name) {
                return Ok(ChromosomeWithOffset::new(c.clone(), *offset));
            }
        }
        Err(Rejection::UnknownChromosome(name.to_string()))
    }
}

impl ChromosomeResolver for Genome {
    fn resolve(&mut self, name: &str) -> Result<ChromosomeWithOffset, Rejection> {
        self.get_chromosome(name)
    }
}

impl ChromosomeResolver for &Genome {
    fn resolve(&mut self, name: &str) -> Result<ChromosomeWithOffset, Rejection> {
        self.get_chromosome(name)
    }
}
