//! Alias expansion (`ntree_replace_aliases` in the original): a `define`
//! record binds a name to a Newick expression, and later `constraint`/
//! `outgroup` expressions may use that name as a tip placeholder. Expansion
//! substitutes the bound expression in for every such placeholder, working
//! on the parsed tree rather than the raw text so nested aliases compose.

use bpp_core::RawNode;
use bpp_error::{BppError, BppResult, Provenance};
use std::collections::HashMap;

/// How many nested alias substitutions to allow before declaring a cycle.
/// A real constraint file nests aliases at most a handful of levels deep;
/// this bound exists only to turn an accidental `define X as X` into a
/// clean error instead of a stack overflow.
const MAX_ALIAS_DEPTH: usize = 64;

pub struct AliasTable {
    defs: HashMap<String, RawNode>,
}

impl AliasTable {
    pub fn new() -> Self {
        AliasTable {
            defs: HashMap::new(),
        }
    }

    /// Registers `alias` bound to the already-alias-expanded `expanded`.
    pub fn define(&mut self, alias: String, expanded: RawNode, lineno: u64) -> BppResult<()> {
        if self.defs.insert(alias.clone(), expanded).is_some() {
            return Err(BppError::semantic(
                Provenance::at_line(format!("line {lineno}"), lineno),
                format!("alias '{alias}' defined more than once"),
            ));
        }
        Ok(())
    }

    /// Expands every alias placeholder tip in `raw`, recursively.
    pub fn expand(&self, raw: &RawNode, lineno: u64) -> BppResult<RawNode> {
        self.expand_depth(raw, lineno, 0)
    }

    fn expand_depth(&self, raw: &RawNode, lineno: u64, depth: usize) -> BppResult<RawNode> {
        if depth > MAX_ALIAS_DEPTH {
            return Err(BppError::semantic(
                Provenance::at_line(format!("line {lineno}"), lineno),
                "alias definitions form a cycle",
            ));
        }
        if raw.is_leaf() {
            if let Some(label) = &raw.label {
                if let Some(def) = self.defs.get(label) {
                    let mut expanded = self.expand_depth(def, lineno, depth + 1)?;
                    if raw.branch_length.is_some() {
                        expanded.branch_length = raw.branch_length;
                    }
                    return Ok(expanded);
                }
            }
            return Ok(raw.clone());
        }
        let mut children = Vec::with_capacity(raw.children.len());
        for child in &raw.children {
            children.push(self.expand_depth(child, lineno, depth)?);
        }
        Ok(RawNode {
            label: raw.label.clone(),
            branch_length: raw.branch_length,
            children,
        })
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::new()
    }
}
