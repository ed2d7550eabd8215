use generational_arena::{Arena, Index};
use std::fmt;
use termtree::Tree;
use tracing::{debug, instrument};

use crate::domain::error::DomainError;
use crate::domain::prior::Prior;
use crate::domain::DomainResult;

/// Node of a haplogroup tree.
///
/// `label` carries the haplogroup name, `prior` the calibration attached by
/// annotation. When both are set the prior is what gets written out.
#[derive(Debug, Clone, PartialEq)]
pub struct PhyloNode {
    pub label: Option<String>,
    pub prior: Option<Prior>,
    /// Index of parent node in the arena, None for the root
    pub parent: Option<Index>,
    /// Indices of child nodes in the arena, in tree order
    pub children: Vec<Index>,
}

impl PhyloNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Internal node the estimator numbers: two or more children.
    pub fn is_qualifying_internal(&self) -> bool {
        self.children.len() >= 2
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl fmt::Display for PhyloNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.label, &self.prior) {
            (Some(label), Some(prior)) => write!(f, "{} [{}]", label, prior),
            (Some(label), None) => write!(f, "{}", label),
            (None, Some(prior)) => write!(f, "[{}]", prior),
            (None, None) => write!(f, "*"),
        }
    }
}

/// Rooted haplogroup tree stored in a generational arena.
///
/// Node indices stay valid across node removal, which lets the normalizer
/// splice nodes out while walking a pre-order snapshot.
#[derive(Debug, Clone)]
pub struct PhyloTree {
    arena: Arena<PhyloNode>,
    root: Option<Index>,
}

impl Default for PhyloTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PhyloTree {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            root: None,
        }
    }

    /// Append a node under `parent` (or as the root). Empty labels are stored as None.
    #[instrument(level = "trace", skip(self))]
    pub fn insert_node(&mut self, label: Option<String>, parent: Option<Index>) -> Index {
        let node = PhyloNode {
            label: label.filter(|l| !l.is_empty()),
            prior: None,
            parent,
            children: Vec::new(),
        };
        let node_idx = self.arena.insert(node);

        if let Some(parent_idx) = parent {
            if let Some(parent) = self.arena.get_mut(parent_idx) {
                parent.children.push(node_idx);
            }
        } else {
            self.root = Some(node_idx);
        }

        node_idx
    }

    pub fn get_node(&self, idx: Index) -> Option<&PhyloNode> {
        self.arena.get(idx)
    }

    pub fn get_node_mut(&mut self, idx: Index) -> Option<&mut PhyloNode> {
        self.arena.get_mut(idx)
    }

    pub fn root(&self) -> Option<Index> {
        self.root
    }

    pub fn root_node(&self) -> Option<&PhyloNode> {
        self.root.and_then(|idx| self.get_node(idx))
    }

    pub fn root_label(&self) -> Option<&str> {
        self.root_node().and_then(PhyloNode::label)
    }

    /// Pre-order, left to right.
    pub fn iter(&self) -> PreOrderIterator {
        PreOrderIterator::new(self)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        self.iter().filter(|(_, node)| node.is_leaf()).count()
    }

    /// Leaf labels in tree order; unnamed leaves are skipped.
    pub fn leaf_labels(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, node)| node.is_leaf())
            .filter_map(|(_, node)| node.label.clone())
            .collect()
    }

    /// First node in pre-order carrying exactly this label.
    pub fn find_by_label(&self, label: &str) -> Option<Index> {
        self.iter()
            .find(|(_, node)| node.label() == Some(label))
            .map(|(idx, _)| idx)
    }

    /// Internal nodes in the order the estimator numbers them.
    ///
    /// Pre-order, nodes with at least two children. Unary nodes never
    /// qualify, so the sequence is the same for a tree before and after
    /// normalization.
    pub fn qualifying_internal_nodes(&self) -> Vec<Index> {
        self.iter()
            .filter(|(_, node)| node.is_qualifying_internal())
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Remove unnamed unary nodes and return the leaf count.
    ///
    /// Each removed node is replaced in its parent's child list by its only
    /// child; a removed root hands the root over to its child. Nodes with a
    /// label or a prior are never removed.
    #[instrument(level = "debug", skip(self))]
    pub fn normalize(&mut self) -> DomainResult<usize> {
        let removed = self.prune_unary();
        let leaves = self.leaf_count();
        debug!("normalize: removed {} unary nodes, {} leaves", removed, leaves);
        if leaves < 2 {
            return Err(DomainError::DegenerateTree { leaves });
        }
        Ok(leaves)
    }

    fn prune_unary(&mut self) -> usize {
        // Snapshot first: splicing only drops the visited node, so the
        // remaining indices are still live and in pre-order.
        let candidates: Vec<Index> = self.iter().map(|(idx, _)| idx).collect();
        let mut removed = 0;
        for idx in candidates {
            let only_child = match self.arena.get(idx) {
                Some(node)
                    if node.children.len() == 1 && node.label.is_none() && node.prior.is_none() =>
                {
                    node.children[0]
                }
                _ => continue,
            };
            self.splice_out(idx, only_child);
            removed += 1;
        }
        removed
    }

    fn splice_out(&mut self, idx: Index, child: Index) {
        let parent = self.arena.get(idx).and_then(|node| node.parent);
        if let Some(child_node) = self.arena.get_mut(child) {
            child_node.parent = parent;
        }
        match parent {
            Some(parent_idx) => {
                if let Some(parent_node) = self.arena.get_mut(parent_idx) {
                    if let Some(slot) = parent_node.children.iter_mut().find(|c| **c == idx) {
                        *slot = child;
                    }
                }
            }
            None => self.root = Some(child),
        }
        self.arena.remove(idx);
    }

    /// Serialize to Newick, no branch lengths, terminated by `;`.
    pub fn to_newick(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.root {
            self.write_newick(root, &mut out);
        }
        out.push(';');
        out
    }

    fn write_newick(&self, idx: Index, out: &mut String) {
        let Some(node) = self.get_node(idx) else {
            return;
        };
        if !node.is_leaf() {
            out.push('(');
            for (i, &child) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.write_newick(child, out);
            }
            out.push(')');
        }
        match (&node.prior, &node.label) {
            (Some(prior), _) => out.push_str(&prior.to_string()),
            (None, Some(label)) => out.push_str(&quote_label(label)),
            (None, None) => {}
        }
    }

    /// Render as an indented tree for terminal display.
    pub fn to_display_tree(&self) -> Tree<String> {
        fn build(tree: &PhyloTree, idx: Index) -> Tree<String> {
            let Some(node) = tree.get_node(idx) else {
                return Tree::new(String::new());
            };
            let leaves: Vec<_> = node.children.iter().map(|&c| build(tree, c)).collect();
            Tree::new(node.to_string()).with_leaves(leaves)
        }

        match self.root {
            Some(root) => build(self, root),
            None => Tree::new("Empty tree".to_string()),
        }
    }
}

fn quote_label(label: &str) -> String {
    if label
        .chars()
        .any(|c| c.is_whitespace() || "()[]':;,".contains(c))
    {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}

pub struct PreOrderIterator<'a> {
    tree: &'a PhyloTree,
    stack: Vec<Index>,
}

impl<'a> PreOrderIterator<'a> {
    fn new(tree: &'a PhyloTree) -> Self {
        let mut stack = Vec::new();
        if let Some(root) = tree.root() {
            stack.push(root);
        }
        Self { tree, stack }
    }
}

impl<'a> Iterator for PreOrderIterator<'a> {
    type Item = (Index, &'a PhyloNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(current_idx) = self.stack.pop() {
            if let Some(node) = self.tree.get_node(current_idx) {
                // Push children in reverse order for left-to-right traversal
                for &child in node.children.iter().rev() {
                    self.stack.push(child);
                }
                return Some((current_idx, node));
            }
        }
        None
    }
}
