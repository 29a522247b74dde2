//! Ledger files as ordered node sequences
//!
//! A `LedgerFile` is the destination or source of a filing run. It is held as a list
//! of nodes, each either a dated directive or a raw span (comments, blank lines,
//! pragmas, org-mode headers). Nodes keep their exact source text, so rendering a
//! file is concatenation and anything a merge did not insert or replace is
//! byte-identical.
//!
//! Directive blocks are read with `beancount_parser`. The filing pipeline uses
//! transactions and account open/close; every other directive stays opaque.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::TransactionRecord;

mod read;
mod render;

pub use render::format_transaction;

/// What a dated directive is
#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveBody {
    Transaction(TransactionRecord),
    Open {
        account: String,
        currencies: Vec<String>,
    },
    Close {
        account: String,
    },
    /// balance, pad, note, price... or a block that could not be read
    Other { keyword: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub date: NaiveDate,
    pub body: DirectiveBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Directive(Directive),
    Raw,
}

/// A span of ledger text
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Exact source text, including line endings
    pub text: String,
    pub kind: NodeKind,
    /// 1-based line where the node starts (0 for inserted nodes)
    pub line: usize,
    /// Added by a merge in this run
    pub inserted: bool,
    /// Rewritten by a superseding entry in this run
    pub replaced: bool,
}

impl Node {
    pub fn date(&self) -> Option<NaiveDate> {
        match &self.kind {
            NodeKind::Directive(d) => Some(d.date),
            NodeKind::Raw => None,
        }
    }

    pub fn transaction(&self) -> Option<&TransactionRecord> {
        match &self.kind {
            NodeKind::Directive(Directive {
                body: DirectiveBody::Transaction(tx),
                ..
            }) => Some(tx),
            _ => None,
        }
    }
}

/// A ledger file held as nodes
#[derive(Debug, Clone)]
pub struct LedgerFile {
    path: Option<PathBuf>,
    nodes: Vec<Node>,
    /// SHA-256 of the text as loaded
    fingerprint: String,
}

impl LedgerFile {
    /// Read ledger text that has no backing file
    pub fn parse(text: &str) -> Self {
        Self {
            path: None,
            nodes: read::split_nodes(text),
            fingerprint: fingerprint(text),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut file = Self::parse(&text);
        file.path = Some(path.to_path_buf());
        debug!(
            "Loaded {} ({} nodes, {} transactions)",
            path.display(),
            file.nodes.len(),
            file.transactions().count()
        );
        Ok(file)
    }

    /// Load `path`, or start an empty ledger there if it does not exist yet
    pub fn load_or_new(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        debug!("{} does not exist, starting empty", path.display());
        let mut file = Self::parse("");
        file.path = Some(path.to_path_buf());
        Ok(file)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Current text of the file, including any inserted nodes
    pub fn text(&self) -> String {
        self.nodes.iter().map(|n| n.text.as_str()).collect()
    }

    /// Whether a merge has inserted or replaced anything
    pub fn is_modified(&self) -> bool {
        self.nodes.iter().any(|n| n.inserted || n.replaced)
    }

    pub fn directives(&self) -> impl Iterator<Item = &Directive> {
        self.nodes.iter().filter_map(|n| match &n.kind {
            NodeKind::Directive(d) => Some(d),
            NodeKind::Raw => None,
        })
    }

    pub fn transactions(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.nodes.iter().filter_map(Node::transaction)
    }

    /// Targets of `include` lines, as written
    pub fn includes(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Raw))
            .flat_map(|n| n.text.lines())
            .filter_map(read::include_target)
            .collect()
    }

    pub(crate) fn insert_node(&mut self, index: usize, node: Node) {
        self.nodes.insert(index, node);
    }

    pub(crate) fn replace_node(&mut self, index: usize, node: Node) {
        self.nodes[index] = node;
    }
}

/// Read a rendered entry back through the grammar
pub(crate) fn read_entry(text: &str) -> std::result::Result<Directive, String> {
    read::read_directive(text)
}

/// SHA-256 hex digest of ledger text
pub fn fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Load a ledger and every file it includes, root first.
///
/// Include paths are relative to the including file. Glob includes and missing
/// files are skipped with a warning; each file is loaded once.
pub fn load_tree(root: &Path) -> Result<Vec<LedgerFile>> {
    let mut files = Vec::new();
    let mut seen = HashSet::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(path) = pending.pop() {
        let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if !seen.insert(key) {
            continue;
        }

        if path != root && !path.exists() {
            warn!("Included file not found: {}", path.display());
            continue;
        }
        let file = LedgerFile::load(&path)?;

        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        for include in file.includes().into_iter().rev() {
            if include.contains(['*', '?', '[']) {
                warn!("Skipping glob include '{}' in {}", include, path.display());
                continue;
            }
            pending.push(base.join(include));
        }
        files.push(file);
    }

    Ok(files)
}
