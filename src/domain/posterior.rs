//! Posterior summary parsing and node re-association.
//!
//! The estimator numbers internal nodes in pre-order and reports one line per
//! node after the `Posterior mean` header:
//!
//! ```text
//! Posterior mean (95% Equal-tail CI) (95% HPD CI) HPD-CI-width
//!
//! t_n6           0.5126 (0.3021, 0.7834) (0.2880, 0.7590)  0.4710 (Jnode  4)
//! ```
//!
//! The reported interval is the HPD one when present.

use regex::Regex;
use tracing::{debug, instrument};

use crate::domain::arena::PhyloTree;
use crate::domain::error::DomainError;
use crate::domain::DomainResult;

pub const POSTERIOR_MARKER: &str = "Posterior mean";
pub const TABLE_HEADER: &str = "NodeName\tNodeTime\tLower\tUpper";

/// One node line of the posterior summary, values kept as reported.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorRecord {
    pub label: String,
    pub time: String,
    pub lower: String,
    pub upper: String,
}

/// A posterior record attached to a node of the input tree.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTime {
    pub name: String,
    pub time: String,
    pub lower: String,
    pub upper: String,
}

pub struct PosteriorParser {
    record: Regex,
}

impl Default for PosteriorParser {
    fn default() -> Self {
        Self::new()
    }
}

const NUM: &str = r"-?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?";

impl PosteriorParser {
    pub fn new() -> Self {
        let interval = format!(r"\(\s*({NUM})\s*,\s*({NUM})\s*\)");
        let record = format!(r"^\s*(t_\S+)\s+({NUM})\s*{interval}(?:\s*{interval})?");
        Self {
            record: Regex::new(&record).unwrap(),
        }
    }

    /// Node-time records of the posterior block, in report order.
    ///
    /// The block starts after the last marker line; node lines are those
    /// whose first token starts with `t_`, and the block ends at the first
    /// other non-blank line.
    #[instrument(level = "debug", skip(self, report))]
    pub fn parse(&self, report: &str) -> DomainResult<Vec<PosteriorRecord>> {
        let all: Vec<&str> = report.lines().collect();
        let marker = all
            .iter()
            .rposition(|l| l.starts_with(POSTERIOR_MARKER))
            .ok_or(DomainError::PosteriorMarkerMissing)?;
        let lines = all[marker + 1..].iter().copied();

        let mut records = Vec::new();
        for line in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                if records.is_empty() {
                    continue;
                }
                break;
            }
            if !trimmed.starts_with("t_") {
                break;
            }
            records.push(self.parse_record(line)?);
        }
        debug!("parsed {} posterior records", records.len());
        Ok(records)
    }

    fn parse_record(&self, line: &str) -> DomainResult<PosteriorRecord> {
        let caps = self
            .record
            .captures(line)
            .ok_or_else(|| DomainError::MalformedRecord {
                line: line.trim().to_string(),
            })?;
        // HPD interval (groups 5, 6) when present, else equal-tail (3, 4)
        let (lower, upper) = match (caps.get(5), caps.get(6)) {
            (Some(l), Some(u)) => (l.as_str(), u.as_str()),
            _ => (&caps[3], &caps[4]),
        };
        Ok(PosteriorRecord {
            label: caps[1].to_string(),
            time: caps[2].to_string(),
            lower: lower.to_string(),
            upper: upper.to_string(),
        })
    }
}

/// Pair records 1:1 with the tree's qualifying internal nodes.
///
/// Unnamed nodes are reported as `NoName0`, `NoName1`, ... in traversal order.
/// The pairing is positional, so the counts must match exactly.
pub fn assign_node_times(tree: &PhyloTree, records: &[PosteriorRecord]) -> DomainResult<Vec<NodeTime>> {
    let nodes = tree.qualifying_internal_nodes();
    if nodes.len() != records.len() {
        return Err(DomainError::RecordCountMismatch {
            expected: nodes.len(),
            found: records.len(),
        });
    }

    let mut unnamed = 0;
    let mut rows = Vec::with_capacity(nodes.len());
    for (idx, record) in nodes.into_iter().zip(records) {
        let name = match tree.get_node(idx).and_then(|n| n.label()) {
            Some(label) => label.to_string(),
            None => {
                let name = format!("NoName{}", unnamed);
                unnamed += 1;
                name
            }
        };
        rows.push(NodeTime {
            name,
            time: record.time.clone(),
            lower: record.lower.clone(),
            upper: record.upper.clone(),
        });
    }
    Ok(rows)
}

/// Tab-separated table with a header row.
pub fn render_time_table(rows: &[NodeTime]) -> String {
    let mut out = String::from(TABLE_HEADER);
    out.push('\n');
    for row in rows {
        out.push_str(&format!("{}\t{}\t{}\t{}\n", row.name, row.time, row.lower, row.upper));
    }
    out
}
