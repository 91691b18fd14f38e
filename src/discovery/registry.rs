//! The command registry: a flat, ordered tree of discovered commands keyed by
//! full name.

use super::grammar::HelpEntry;
use crate::error::{Result, ShellError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandNode {
    pub id: String,
    pub name: String,
    /// Space-joined path from the root, e.g. `net stats iface`.
    pub full_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub usage: String,
    #[serde(default)]
    pub args: Vec<Argument>,
    /// Full name of the parent node.
    #[serde(default)]
    pub parent_name: Option<String>,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default)]
    pub is_category: bool,
    /// Added by hand. Never pruned.
    #[serde(default)]
    pub is_custom: bool,
    /// Edited by hand. Never overwritten by a re-scan.
    #[serde(default)]
    pub user_modified: bool,
}

impl CommandNode {
    pub fn root(entry: HelpEntry) -> Self {
        Self {
            id: entry.name.clone(),
            full_name: entry.name.clone(),
            name: entry.name,
            description: entry.description,
            usage: entry.usage,
            args: entry.args,
            parent_name: None,
            is_root: true,
            is_category: false,
            is_custom: false,
            user_modified: false,
        }
    }

    pub fn child(parent_full_name: &str, entry: HelpEntry) -> Self {
        Self {
            id: format!("{parent_full_name}_{}", entry.name),
            full_name: format!("{parent_full_name} {}", entry.name),
            name: entry.name,
            description: entry.description,
            usage: entry.usage,
            args: entry.args,
            parent_name: Some(parent_full_name.to_string()),
            is_root: false,
            is_category: false,
            is_custom: false,
            user_modified: false,
        }
    }

    /// A hand-written command, exempt from pruning and re-scan updates.
    pub fn custom(full_name: &str, description: &str, args: Vec<Argument>) -> Self {
        let full_name = full_name.split_whitespace().collect::<Vec<_>>().join(" ");
        let name = full_name.rsplit(' ').next().unwrap_or_default().to_string();
        Self {
            id: full_name.replace(' ', "_"),
            name,
            full_name,
            description: description.to_string(),
            usage: String::new(),
            args,
            parent_name: None,
            is_root: true,
            is_category: false,
            is_custom: true,
            user_modified: true,
        }
    }

    /// The recorded usage, or one built from the arguments.
    pub fn usage_line(&self) -> String {
        if !self.usage.is_empty() {
            return self.usage.clone();
        }
        let mut usage = self.full_name.clone();
        for arg in &self.args {
            if arg.required {
                usage.push_str(&format!(" <{}>", arg.name));
            } else {
                usage.push_str(&format!(" [{}]", arg.name));
            }
        }
        usage
    }

    pub fn requires_arguments(&self) -> bool {
        self.args.iter().any(|a| a.required)
    }

    /// The command line to send, with argument values in declaration order.
    /// Blank or missing values are left out.
    pub fn invocation(&self, values: &HashMap<String, String>) -> String {
        let mut line = self.full_name.clone();
        for arg in &self.args {
            if let Some(value) = values.get(&arg.name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
                line.push(' ');
                line.push_str(value);
            }
        }
        line
    }

    fn refresh(&mut self, entry: HelpEntry) {
        self.description = entry.description;
        self.usage = entry.usage;
        self.args = entry.args;
    }
}

/// Ordered command nodes with lookup by full name.
///
/// Order is depth-first: every node is followed by its subtree. Nodes are
/// only ever inserted or removed whole, so a reader never sees a half-built
/// entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    order: Vec<String>,
    nodes: HashMap<String, CommandNode>,
}

impl Registry {
    /// Build from persisted nodes, dropping duplicates and dangling parents.
    pub fn from_nodes(nodes: impl IntoIterator<Item = CommandNode>) -> Self {
        let mut registry = Self::default();
        for node in nodes {
            if registry.nodes.contains_key(&node.full_name) {
                continue;
            }
            registry.order.push(node.full_name.clone());
            registry.nodes.insert(node.full_name.clone(), node);
        }
        let known: HashSet<String> = registry.order.iter().cloned().collect();
        for node in registry.nodes.values_mut() {
            if node.parent_name.as_ref().is_some_and(|p| !known.contains(p)) {
                node.parent_name = None;
            }
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, full_name: &str) -> Option<&CommandNode> {
        self.nodes.get(full_name)
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.nodes.contains_key(full_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandNode> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    /// All nodes in order, cloned.
    pub fn nodes(&self) -> Vec<CommandNode> {
        self.iter().cloned().collect()
    }

    pub fn roots(&self) -> impl Iterator<Item = &CommandNode> {
        self.iter().filter(|n| n.is_root)
    }

    pub fn children(&self, full_name: &str) -> Vec<&CommandNode> {
        self.iter()
            .filter(|n| n.parent_name.as_deref() == Some(full_name))
            .collect()
    }

    /// Merge a root listing. Existing roots keep their id and position and
    /// are refreshed unless edited by hand. Returns the number of new roots.
    pub fn merge_roots(&mut self, entries: Vec<HelpEntry>) -> usize {
        let mut added = 0;
        for entry in entries {
            match self.nodes.get_mut(&entry.name) {
                Some(existing) => {
                    if !existing.user_modified {
                        existing.refresh(entry);
                    }
                }
                None => {
                    let node = CommandNode::root(entry);
                    self.order.push(node.full_name.clone());
                    self.nodes.insert(node.full_name.clone(), node);
                    added += 1;
                }
            }
        }
        added
    }

    /// Insert or refresh a child of `parent`, placed after the parent's
    /// existing subtree. Returns the stored node, or `None` if the parent is
    /// unknown.
    pub fn upsert_child(&mut self, parent: &str, entry: HelpEntry) -> Option<CommandNode> {
        let parent_pos = self.position(parent)?;
        let full_name = format!("{parent} {}", entry.name);
        if let Some(existing) = self.nodes.get_mut(&full_name) {
            if !existing.user_modified {
                existing.refresh(entry);
                existing.parent_name = Some(parent.to_string());
            }
            return Some(existing.clone());
        }

        let prefix = format!("{parent} ");
        let mut at = parent_pos + 1;
        while at < self.order.len() && self.order[at].starts_with(&prefix) {
            at += 1;
        }
        let node = CommandNode::child(parent, entry);
        self.order.insert(at, node.full_name.clone());
        self.nodes.insert(node.full_name.clone(), node.clone());
        Some(node)
    }

    pub fn mark_category(&mut self, full_name: &str) {
        if let Some(node) = self.nodes.get_mut(full_name) {
            if !node.user_modified {
                node.is_category = true;
            }
        }
    }

    /// Add a hand-written command, replacing any node with the same full name
    /// in place.
    pub fn add_custom(&mut self, node: CommandNode) {
        if let Some(existing) = self.nodes.get_mut(&node.full_name) {
            *existing = node;
            return;
        }
        self.order.push(node.full_name.clone());
        self.nodes.insert(node.full_name.clone(), node);
    }

    /// Edit a node by hand. The node is marked `user_modified`.
    pub fn edit(&mut self, full_name: &str, edit: impl FnOnce(&mut CommandNode)) -> Result<()> {
        let node = self
            .nodes
            .get_mut(full_name)
            .ok_or_else(|| ShellError::not_found("command", full_name))?;
        edit(node);
        node.user_modified = true;
        Ok(())
    }

    /// Move `from` to the position currently held by `to`.
    pub fn move_to(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let from_pos = self
            .position(from)
            .ok_or_else(|| ShellError::not_found("command", from))?;
        let to_pos = self
            .position(to)
            .ok_or_else(|| ShellError::not_found("command", to))?;
        let moved = self.order.remove(from_pos);
        self.order.insert(to_pos, moved);
        Ok(())
    }

    /// Remove one node. Its children move up to its parent.
    pub fn remove(&mut self, full_name: &str) -> Result<CommandNode> {
        self.detach(full_name)
            .ok_or_else(|| ShellError::not_found("command", full_name))
    }

    /// Roots to deep-scan: discovered (not custom) roots, optionally limited
    /// to the given names.
    pub fn scan_roots(&self, selection: Option<&[String]>) -> Vec<CommandNode> {
        self.roots()
            .filter(|n| !n.is_custom)
            .filter(|n| selection.is_none_or(|names| names.iter().any(|s| *s == n.full_name)))
            .cloned()
            .collect()
    }

    /// Remove every category that is not custom. Returns the removed names.
    pub fn prune_categories(&mut self) -> Vec<String> {
        let doomed: Vec<String> = self
            .iter()
            .filter(|n| n.is_category && !n.is_custom)
            .map(|n| n.full_name.clone())
            .collect();
        for name in &doomed {
            self.detach(name);
        }
        doomed
    }

    fn position(&self, full_name: &str) -> Option<usize> {
        self.order.iter().position(|n| n == full_name)
    }

    fn detach(&mut self, full_name: &str) -> Option<CommandNode> {
        let node = self.nodes.remove(full_name)?;
        self.order.retain(|n| n != full_name);
        for child in self.nodes.values_mut() {
            if child.parent_name.as_deref() == Some(full_name) {
                child.parent_name = node.parent_name.clone();
            }
        }
        Some(node)
    }
}
