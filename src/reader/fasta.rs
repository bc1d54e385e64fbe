use crate::qcmap_utils::get_noodles_reader_from_path;
use noodles::fasta;
use std::io::BufRead;
use std::path::Path;

/// Extracts sequence names and lengths from a FASTA file.
///
/// This function parses a FASTA file (plain or gzipped) to extract the names
/// (identifiers) and lengths of the sequences it contains. Only the first
/// whitespace-delimited word of a definition line is used as the name.
///
/// # Returns
///
/// Returns `anyhow::Result<(Vec<String>, Vec<usize>)>`:
/// * `Ok((Vec<String>, Vec<usize>))`: A tuple containing two vectors, the first with sequence names and
///   the second with their corresponding lengths.
/// * `Err(anyhow::Error)`: An error if there is a problem opening the file or reading from it.
pub fn get_chromsize<T: AsRef<Path>>(file_path: T) -> anyhow::Result<(Vec<String>, Vec<usize>)> {
    let mut reader = get_noodles_reader_from_path(file_path)?;
    _get_chromsize(&mut reader)
}

fn _get_chromsize<T: BufRead>(
    rdr: &mut fasta::io::Reader<T>,
) -> anyhow::Result<(Vec<String>, Vec<usize>)> {
    let mut seqname: Vec<String> = Vec::new();
    let mut seqlengths: Vec<usize> = Vec::new();

    for result in rdr.records() {
        let record = result?;

        let record_name = std::str::from_utf8(record.name())?;

        seqname.push(
            record_name
                .split_once(' ')
                .unwrap_or((record_name, ""))
                .0
                .to_string(),
        );
        seqlengths.push(record.sequence().len());
    }

    Ok((seqname, seqlengths))
}
