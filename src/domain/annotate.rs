//! Calibration annotation and automatic root calibration.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, instrument, warn};

use crate::domain::arena::PhyloTree;
use crate::domain::error::DomainError;
use crate::domain::prior::{Calibration, Prior};
use crate::domain::DomainResult;

/// Tree ready for the estimator plus the root-age prior, if any.
#[derive(Debug, Clone)]
pub struct AnnotatedTree {
    pub tree: PhyloTree,
    pub root_age: Option<Prior>,
    pub leaf_count: usize,
}

impl AnnotatedTree {
    /// Tree file contents: `<tips> 1`, a blank line, then the Newick string.
    pub fn to_tree_file(&self) -> String {
        format!("{} 1\n\n{}\n", self.leaf_count, self.tree.to_newick())
    }
}

/// Attach calibrations to a normalized tree.
///
/// A calibration naming the root becomes `root_age` instead of an in-tree
/// prior. Afterwards every internal, non-root node that was not calibrated
/// loses its label so the estimator cannot mistake it for a prior, and unary
/// nodes left without label or prior are pruned.
#[instrument(level = "debug", skip(tree, calibrations))]
pub fn annotate(mut tree: PhyloTree, calibrations: &[Calibration]) -> DomainResult<AnnotatedTree> {
    let root = tree
        .root()
        .ok_or(DomainError::DegenerateTree { leaves: 0 })?;
    let root_label = tree.root_label().map(str::to_string);

    // Resolve every target before touching the tree.
    let mut targets = Vec::with_capacity(calibrations.len());
    let mut root_age = None;
    for calibration in calibrations {
        if root_label.as_deref() == Some(calibration.node.as_str()) {
            debug!("root calibration {} -> {}", calibration.node, calibration.prior);
            root_age = Some(calibration.prior);
            continue;
        }
        let idx = tree
            .find_by_label(&calibration.node)
            .ok_or_else(|| DomainError::NodeNotFound(calibration.node.clone()))?;
        targets.push((idx, calibration.prior));
    }

    for (idx, prior) in targets {
        if let Some(node) = tree.get_node_mut(idx) {
            node.prior = Some(prior);
        }
    }

    let used: HashSet<&str> = calibrations.iter().map(|c| c.node.as_str()).collect();
    let stray: Vec<_> = tree
        .iter()
        .filter(|(idx, node)| *idx != root && !node.is_leaf())
        .filter(|(_, node)| node.label().is_some_and(|l| !used.contains(l)))
        .map(|(idx, _)| idx)
        .collect();
    debug!("clearing {} unconstrained internal labels", stray.len());
    for idx in stray {
        if let Some(node) = tree.get_node_mut(idx) {
            node.label = None;
        }
    }

    let leaf_count = tree.normalize()?;
    Ok(AnnotatedTree {
        tree,
        root_age,
        leaf_count,
    })
}

/// Published root-age bounds keyed by haplogroup name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationTable {
    entries: BTreeMap<String, (f64, f64)>,
}

impl CalibrationTable {
    /// Parse a tab-separated table with `Haplogroup`, `Lower1` and `Upper1` columns.
    pub fn parse(content: &str) -> DomainResult<Self> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let header: Vec<&str> = lines
            .next()
            .ok_or_else(|| DomainError::CalibrationTable("empty table".into()))?
            .split('\t')
            .map(str::trim)
            .collect();
        let column = |name: &str| {
            header
                .iter()
                .position(|h| *h == name)
                .ok_or_else(|| DomainError::CalibrationTable(format!("missing column {name}")))
        };
        let (name_col, lower_col, upper_col) = (column("Haplogroup")?, column("Lower1")?, column("Upper1")?);

        let mut entries = BTreeMap::new();
        for line in lines {
            let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
            let field = |col: usize| {
                fields
                    .get(col)
                    .copied()
                    .ok_or_else(|| DomainError::CalibrationTable(format!("short row: {line}")))
            };
            let bound = |col: usize| -> DomainResult<f64> {
                let raw = field(col)?;
                raw.parse::<f64>()
                    .map_err(|_| DomainError::CalibrationTable(format!("bad bound {raw:?} in: {line}")))
            };
            entries.insert(field(name_col)?.to_string(), (bound(lower_col)?, bound(upper_col)?));
        }
        Ok(Self { entries })
    }

    pub fn insert(&mut self, haplogroup: impl Into<String>, lower: f64, upper: f64) {
        self.entries.insert(haplogroup.into(), (lower, upper));
    }

    pub fn get(&self, haplogroup: &str) -> Option<Prior> {
        self.entries
            .get(haplogroup)
            .map(|&(lower, upper)| Prior::Bounded(lower, upper))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Root-age prior looked up from the tree's root label.
///
/// Missing or unknown root names are not an error: a warning is logged and
/// the run continues without a root prior.
pub fn auto_root_age(tree: &PhyloTree, table: &CalibrationTable) -> Option<Prior> {
    match tree.root_label() {
        None => {
            warn!("The root name does not exist, auto prior calibration will not be set");
            None
        }
        Some(name) => match table.get(name) {
            Some(prior) => {
                debug!("auto calibration for root {} -> {}", name, prior);
                Some(prior)
            }
            None => {
                warn!(
                    "Cannot find calibration time for root name {}, auto prior calibration will not be set",
                    name
                );
                None
            }
        },
    }
}
