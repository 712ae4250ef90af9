//src/taxdb.rs

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::error::{ReportError, Result};
use crate::types::{LineageMap, LineagePath, TaxId, Taxon, ROOT_TAXID};

pub type ParentMap = HashMap<TaxId, TaxId>;
pub type NameMap = HashMap<TaxId, String>;
pub type RankMap = HashMap<TaxId, String>;

/// Turns taxon ids into root-to-taxon lineages.
///
/// Called once per report with every distinct assigned id. Ids the resolver does not know are
/// simply absent from the returned map; the taxonomy builder reports them.
pub trait LineageResolver {
    fn resolve(&self, ids: &[TaxId]) -> Result<LineageMap>;
}

/// An already resolved map answers with the requested subset.
impl LineageResolver for LineageMap {
    fn resolve(&self, ids: &[TaxId]) -> Result<LineageMap> {
        Ok(ids
            .iter()
            .filter_map(|id| self.get(id).map(|path| (*id, path.clone())))
            .collect())
    }
}

impl<R: LineageResolver + ?Sized> LineageResolver for Box<R> {
    fn resolve(&self, ids: &[TaxId]) -> Result<LineageMap> {
        (**self).resolve(ids)
    }
}

/// Parses a taxDB file in the format:
/// ```text
/// <taxid>\t<parentid>\t<taxname>\t<rank>
/// ```
/// Returns:
/// - a `ParentMap` mapping child_taxid -> parent_taxid
/// - a `NameMap` mapping taxid -> taxname
/// - a `RankMap` mapping taxid -> rank
pub fn parse_taxdb<P: AsRef<Path>>(filepath: P) -> io::Result<(ParentMap, NameMap, RankMap)> {
    let file = File::open(filepath)?;
    parse_taxdb_reader(BufReader::new(file))
}

pub fn parse_taxdb_reader<R: BufRead>(reader: R) -> io::Result<(ParentMap, NameMap, RankMap)> {
    let mut parent_map: ParentMap = HashMap::new();
    let mut name_map: NameMap = HashMap::new();
    let mut rank_map: RankMap = HashMap::new();

    for line_result in reader.lines() {
        let line = line_result?;
        // e.g. "2\t1\tBacteria\tsuperkingdom"
        let parts: Vec<&str> = line.split('\t').collect();

        // Skip malformed lines
        if parts.len() < 4 {
            continue;
        }

        let (taxid, parentid) = match (parts[0].trim().parse(), parts[1].trim().parse()) {
            (Ok(t), Ok(p)) => (t, p),
            _ => {
                log::debug!("Skipping taxDB line with non-numeric ids: {line}");
                continue;
            }
        };

        if taxid != 0 {
            parent_map.insert(taxid, parentid);
            name_map.insert(taxid, parts[2].trim().to_string());
            rank_map.insert(taxid, parts[3].trim().to_string());
        }
    }
    Ok((parent_map, name_map, rank_map))
}

/// Offline resolver backed by a krakenuniq-style taxDB file.
#[derive(Debug, Default)]
pub struct TaxDbResolver {
    parent_map: ParentMap,
    name_map: NameMap,
    rank_map: RankMap,
}

impl TaxDbResolver {
    pub fn open<P: AsRef<Path>>(filepath: P) -> Result<Self> {
        let (parent_map, name_map, rank_map) = parse_taxdb(filepath)?;
        log::info!("Loaded {} taxa from taxDB", parent_map.len());
        Ok(Self::from_maps(parent_map, name_map, rank_map))
    }

    pub fn from_maps(parent_map: ParentMap, name_map: NameMap, rank_map: RankMap) -> Self {
        TaxDbResolver {
            parent_map,
            name_map,
            rank_map,
        }
    }

    /// Walk parent links up to the root. `Ok(None)` when `tax_id` is not in the taxDB.
    pub fn lineage(&self, tax_id: TaxId) -> Result<Option<LineagePath>> {
        if !self.parent_map.contains_key(&tax_id) {
            return Ok(None);
        }

        let mut chain = Vec::new();
        let mut node = tax_id;
        loop {
            if chain.len() > self.parent_map.len() {
                return Err(ReportError::InvalidLineage {
                    tax_id,
                    msg: "parent links form a cycle".to_string(),
                });
            }
            chain.push(node);

            match self.parent_map.get(&node) {
                // root points at itself
                Some(&p) if p != node && p != 0 => node = p,
                Some(_) => break,
                None => {
                    return Err(ReportError::InvalidLineage {
                        tax_id,
                        msg: format!("ancestor {node} is missing from the taxDB"),
                    })
                }
            }
        }

        chain.reverse();
        let path = chain
            .into_iter()
            .enumerate()
            .map(|(depth, id)| {
                let rank = self.rank_map.get(&id).map(String::as_str).unwrap_or("no rank");
                let name = self.name_map.get(&id).map(String::as_str).unwrap_or_default();
                Taxon::new(id, rank, name, depth)
            })
            .collect();
        Ok(Some(path))
    }
}

impl LineageResolver for TaxDbResolver {
    fn resolve(&self, ids: &[TaxId]) -> Result<LineageMap> {
        let mut lineages = LineageMap::with_capacity(ids.len());
        for &id in ids {
            if let Some(path) = self.lineage(id)? {
                lineages.insert(id, path);
            }
        }
        Ok(lineages)
    }
}

/// Resolver that shells out to `taxonkit lineage -R -t -n`, one batch per call.
#[derive(Debug, Clone)]
pub struct TaxonkitResolver {
    pub program: PathBuf,
    pub timeout: Duration,
}

impl Default for TaxonkitResolver {
    fn default() -> Self {
        TaxonkitResolver {
            program: PathBuf::from("taxonkit"),
            timeout: Duration::from_secs(600),
        }
    }
}

impl TaxonkitResolver {
    pub fn new<P: Into<PathBuf>>(program: P, timeout: Duration) -> Self {
        TaxonkitResolver {
            program: program.into(),
            timeout,
        }
    }

    fn run(&self, input: String) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(["lineage", "-R", "-t", "-n"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ReportError::Resolver(format!("cannot start {}: {e}", self.program.display()))
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            ReportError::Resolver("taxonkit stdin is not available".to_string())
        })?;
        let mut stdout = child.stdout.take().ok_or_else(|| {
            ReportError::Resolver("taxonkit stdout is not available".to_string())
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| {
            ReportError::Resolver("taxonkit stderr is not available".to_string())
        })?;

        let writer = thread::spawn(move || stdin.write_all(input.as_bytes()));
        let err_reader = thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        });
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = String::new();
            let res = stdout.read_to_string(&mut buf).map(|_| buf);
            let _ = tx.send(res);
        });

        let output = match rx.recv_timeout(self.timeout) {
            Ok(res) => res,
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ReportError::ResolverTimeout(self.timeout));
            }
        };

        // status and stderr take precedence over a failed write
        let status = child.wait()?;
        let stderr_text = err_reader.join().unwrap_or_default();
        let written = writer.join();
        if !status.success() {
            return Err(ReportError::Resolver(format!(
                "taxonkit exited with {status}: {}",
                stderr_text.trim()
            )));
        }
        let output = output?;
        match written {
            Ok(Ok(())) => Ok(output),
            Ok(Err(e)) => Err(ReportError::Resolver(format!(
                "cannot send ids to taxonkit: {e}: {}",
                stderr_text.trim()
            ))),
            Err(_) => Err(ReportError::Resolver("stdin writer panicked".to_string())),
        }
    }
}

/// Parse `taxonkit lineage -R -t -n` output:
/// `query \t names \t taxids \t name \t ranks`, lineage columns `;`-separated.
pub fn parse_taxonkit_output(output: &str) -> Result<LineageMap> {
    let mut lineages = LineageMap::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 5 {
            return Err(ReportError::Resolver(format!("unexpected taxonkit line: {line}")));
        }

        let query: TaxId = fields[0].trim().parse().map_err(|_| {
            ReportError::Resolver(format!("unexpected taxonkit query id: {}", fields[0]))
        })?;
        // unknown ids come back with empty lineage columns
        if fields[2].trim().is_empty() {
            log::debug!("taxonkit could not resolve {query}");
            continue;
        }

        let names: Vec<&str> = fields[1].split(';').collect();
        let ranks: Vec<&str> = fields[4].split(';').collect();
        let mut ids = Vec::with_capacity(names.len());
        for raw in fields[2].split(';') {
            let id: TaxId = raw.trim().parse().map_err(|_| ReportError::InvalidLineage {
                tax_id: query,
                msg: format!("non-numeric taxid '{raw}' in taxonkit lineage"),
            })?;
            ids.push(id);
        }
        if names.len() != ids.len() || ranks.len() != ids.len() {
            return Err(ReportError::InvalidLineage {
                tax_id: query,
                msg: "taxonkit name, id and rank columns differ in length".to_string(),
            });
        }

        let mut path: LineagePath = Vec::with_capacity(ids.len() + 1);
        if ids[0] != ROOT_TAXID {
            path.push(Taxon::new(ROOT_TAXID, "no rank", "root", 0));
        }
        for ((id, rank), name) in ids.iter().zip(&ranks).zip(&names) {
            path.push(Taxon::new(*id, rank, name, path.len()));
        }

        if let Some(last) = path.last_mut() {
            if last.tax_id != query {
                log::warn!("Taxon {query} was merged into {}; counting it as {query}", last.tax_id);
                last.tax_id = query;
            }
        }
        lineages.insert(query, path);
    }

    Ok(lineages)
}

impl LineageResolver for TaxonkitResolver {
    fn resolve(&self, ids: &[TaxId]) -> Result<LineageMap> {
        if ids.is_empty() {
            return Ok(LineageMap::new());
        }
        let mut input = String::with_capacity(ids.len() * 8);
        for id in ids {
            input.push_str(&id.to_string());
            input.push('\n');
        }
        let output = self.run(input)?;
        parse_taxonkit_output(&output)
    }
}

/// Memoises another resolver. Only ids not seen before are forwarded, as one batch.
pub struct CachedResolver<R> {
    inner: R,
    cache: Mutex<AHashMap<TaxId, Option<LineagePath>>>,
}

impl<R: LineageResolver> CachedResolver<R> {
    pub fn new(inner: R) -> Self {
        CachedResolver {
            inner,
            cache: Mutex::new(AHashMap::new()),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}

impl<R: LineageResolver> LineageResolver for CachedResolver<R> {
    fn resolve(&self, ids: &[TaxId]) -> Result<LineageMap> {
        let mut cache = self.cache.lock();

        let uncached: Vec<TaxId> = ids
            .iter()
            .copied()
            .filter(|id| !cache.contains_key(id))
            .collect();
        if !uncached.is_empty() {
            log::debug!("Resolving {} uncached taxa ({} cached)", uncached.len(), cache.len());
            let mut fresh = self.inner.resolve(&uncached)?;
            for id in uncached {
                // remember misses too, so they are not asked again
                cache.insert(id, fresh.remove(&id));
            }
        }

        Ok(ids
            .iter()
            .filter_map(|id| match cache.get(id) {
                Some(Some(path)) => Some((*id, path.clone())),
                _ => None,
            })
            .collect())
    }
}
