// src/kraken_tsv.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::{ReportError, Result};
use crate::types::KrakenRecord;

/// Read Kraken2 per-read output (`status, read name, taxon, length, hit list`), plain or `.gz`.
/// `max_reads == 0` reads everything.
pub fn read_kraken_records<P: AsRef<Path>>(path: P, max_reads: usize) -> Result<Vec<KrakenRecord>> {
    let path = path.as_ref();
    let f = File::open(path)?;

    let is_gz = path.extension().map(|ext| ext == "gz").unwrap_or(false);

    let reader: Box<dyn BufRead> = if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };

    parse_kraken_records(reader, max_reads)
}

pub fn parse_kraken_records<R: BufRead>(mut reader: R, max_reads: usize) -> Result<Vec<KrakenRecord>> {
    let mut records = Vec::new();
    let mut line = String::new();
    let mut line_no = 0usize;

    loop {
        if max_reads > 0 && records.len() >= max_reads {
            break;
        }
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break; // EOF
        }
        line_no += 1;

        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.trim().is_empty() {
            continue;
        }
        records.push(parse_kraken_line(trimmed, line_no)?);
    }

    Ok(records)
}

fn parse_kraken_line(line: &str, line_no: usize) -> Result<KrakenRecord> {
    let malformed = |msg: String| ReportError::MalformedRecord { line: line_no, msg };

    let fields: Vec<&str> = line.splitn(5, '\t').collect();
    if fields.len() < 5 {
        return Err(malformed(format!(
            "expected 5 tab-separated columns, found {}",
            fields.len()
        )));
    }

    let tax_id = fields[2]
        .trim()
        .parse()
        .map_err(|_| malformed(format!("taxon '{}' is not an integer", fields[2])))?;

    Ok(KrakenRecord {
        status: fields[0].trim().chars().next().unwrap_or('?'),
        read_id: fields[1].to_string(),
        tax_id,
        length: fields[3].to_string(),
        hitlist: fields[4].to_string(),
    })
}
