//! Sequence alignment reading and missing-data filtering.
//!
//! Produces the fixed-width sequence block the estimator reads:
//! `<n_seqs> <seq_len>` followed by one `<id><pad>   <sequence>` row per sequence.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use crate::domain::error::DomainError;
use crate::domain::DomainResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentFormat {
    Fasta,
    Phylip,
}

impl AlignmentFormat {
    /// Guess from the file extension, defaulting to FASTA.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("phy" | "phylip") => AlignmentFormat::Phylip,
            _ => AlignmentFormat::Fasta,
        }
    }
}

impl FromStr for AlignmentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fasta" | "fa" => Ok(AlignmentFormat::Fasta),
            "phylip" | "phy" => Ok(AlignmentFormat::Phylip),
            other => Err(format!("unsupported alignment format '{}', expected fasta or phylip", other)),
        }
    }
}

impl fmt::Display for AlignmentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignmentFormat::Fasta => f.write_str("fasta"),
            AlignmentFormat::Phylip => f.write_str("phylip"),
        }
    }
}

/// Aligned sequences of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    ids: Vec<String>,
    seqs: Vec<Vec<u8>>,
}

impl Alignment {
    pub fn parse(content: &str, format: AlignmentFormat) -> DomainResult<Self> {
        let (ids, seqs) = match format {
            AlignmentFormat::Fasta => parse_fasta(content)?,
            AlignmentFormat::Phylip => parse_phylip(content)?,
        };
        Self::new(ids, seqs)
    }

    pub fn new(ids: Vec<String>, seqs: Vec<Vec<u8>>) -> DomainResult<Self> {
        if ids.len() != seqs.len() {
            return Err(DomainError::Alignment(format!(
                "{} identifiers for {} sequences",
                ids.len(),
                seqs.len()
            )));
        }
        let Some(width) = seqs.first().map(Vec::len) else {
            return Err(DomainError::Alignment("no sequences".into()));
        };
        if let Some((id, seq)) = ids.iter().zip(&seqs).find(|(_, s)| s.len() != width) {
            return Err(DomainError::Alignment(format!(
                "sequence {} has length {}, expected {}",
                id,
                seq.len(),
                width
            )));
        }
        Ok(Self { ids, seqs })
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn site_count(&self) -> usize {
        self.seqs.first().map_or(0, Vec::len)
    }

    /// Keep sites whose fraction of `N`/`-` is below `cutoff`.
    ///
    /// A cutoff of 0 disables filtering.
    pub fn filter_missing(&self, cutoff: f64) -> DomainResult<Self> {
        if cutoff <= 0.0 {
            return Ok(self.clone());
        }
        let rows = self.seqs.len() as f64;
        let kept: Vec<usize> = (0..self.site_count())
            .filter(|&site| {
                let missing = self
                    .seqs
                    .iter()
                    .filter(|s| matches!(s[site], b'N' | b'n' | b'-'))
                    .count();
                (missing as f64) / rows < cutoff
            })
            .collect();
        debug!(
            "filter_missing: kept {} of {} sites at cutoff {}",
            kept.len(),
            self.site_count(),
            cutoff
        );
        if kept.is_empty() {
            return Err(DomainError::Alignment(format!(
                "no sites left after filtering with cutoff {}",
                cutoff
            )));
        }
        let seqs = self
            .seqs
            .iter()
            .map(|s| kept.iter().map(|&site| s[site]).collect())
            .collect();
        Ok(Self {
            ids: self.ids.clone(),
            seqs,
        })
    }

    /// Fixed-width block with a `<n_seqs> <seq_len>` header.
    pub fn to_block(&self) -> String {
        let width = self.ids.iter().map(String::len).max().unwrap_or(0);
        let mut out = format!("{} {}\n", self.len(), self.site_count());
        for (id, seq) in self.ids.iter().zip(&self.seqs) {
            out.push_str(&format!("{:<width$}   {}\n", id, String::from_utf8_lossy(seq), width = width));
        }
        out
    }
}

type Parsed = (Vec<String>, Vec<Vec<u8>>);

fn parse_fasta(content: &str) -> DomainResult<Parsed> {
    let mut ids = Vec::new();
    let mut seqs: Vec<Vec<u8>> = Vec::new();
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(header) = line.strip_prefix('>') {
            let id = header.split_whitespace().next().unwrap_or_default();
            if id.is_empty() {
                return Err(DomainError::Alignment("FASTA record without id".into()));
            }
            ids.push(id.to_string());
            seqs.push(Vec::new());
        } else if let Some(seq) = seqs.last_mut() {
            seq.extend(line.bytes().filter(|b| !b.is_ascii_whitespace()));
        } else {
            return Err(DomainError::Alignment("sequence data before first FASTA header".into()));
        }
    }
    Ok((ids, seqs))
}

// Sequential PHYLIP; a sequence may wrap over several lines.
fn parse_phylip(content: &str) -> DomainResult<Parsed> {
    let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());
    let header = lines
        .next()
        .ok_or_else(|| DomainError::Alignment("empty PHYLIP file".into()))?;
    let dims: Vec<usize> = header
        .split_whitespace()
        .take(2)
        .map(|t| t.parse::<usize>())
        .collect::<Result<_, _>>()
        .map_err(|_| DomainError::Alignment(format!("bad PHYLIP header: {}", header)))?;
    let [n_seqs, n_sites] = dims[..] else {
        return Err(DomainError::Alignment(format!("bad PHYLIP header: {}", header)));
    };

    let mut ids = Vec::with_capacity(n_seqs);
    let mut seqs: Vec<Vec<u8>> = Vec::with_capacity(n_seqs);
    for line in lines {
        match seqs.last_mut() {
            Some(seq) if seq.len() < n_sites => {
                seq.extend(line.bytes().filter(|b| !b.is_ascii_whitespace()));
            }
            _ => {
                let (id, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
                ids.push(id.to_string());
                seqs.push(rest.bytes().filter(|b| !b.is_ascii_whitespace()).collect());
            }
        }
    }
    if ids.len() != n_seqs {
        return Err(DomainError::Alignment(format!(
            "PHYLIP header declares {} sequences, found {}",
            n_seqs,
            ids.len()
        )));
    }
    Ok((ids, seqs))
}
