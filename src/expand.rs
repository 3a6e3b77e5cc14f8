//! Pattern-set expansion: inheritance closure and cycle detection.
//!
//! Inheritance edges are declared between specific patterns. Traversal uses
//! exact string equality of the edge's parent against a currently held
//! pattern; a held wildcard does NOT satisfy an edge declared with a more
//! specific parent. See DESIGN.md for the reasoning behind the conservative
//! choice.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::errors::{AccessError, AccessResult};
use crate::models::{EffectivePermission, InheritanceEdge};
use crate::pattern::PermissionPattern;

pub const SOURCE_ROLE: &str = "role";
pub const SOURCE_SET: &str = "set";
pub const SOURCE_INHERITED: &str = "inherited";
pub const SOURCE_OVERRIDE: &str = "override";

/// Index edges by their literal parent pattern for O(1) traversal.
pub fn index_edges(edges: &[InheritanceEdge]) -> HashMap<String, Vec<PermissionPattern>> {
    let mut by_parent: HashMap<String, Vec<PermissionPattern>> = HashMap::new();
    for edge in edges {
        by_parent
            .entry(edge.parent.as_str().to_string())
            .or_default()
            .push(edge.child.clone());
    }
    by_parent
}

/// Expand `granted` to its transitive closure under the inheritance edges.
///
/// Repeatedly applies "held pattern P with an edge P -> C adds C" until a
/// fixed point, capped at `edge_count + 1` passes. The cap cannot be hit
/// with an acyclic edge set (the loader rejects cycles), so exceeding it is
/// reported as a configuration error rather than looping.
pub fn inheritance_closure(
    granted: &mut BTreeMap<String, EffectivePermission>,
    edges_by_parent: &HashMap<String, Vec<PermissionPattern>>,
    edge_count: usize,
) -> AccessResult<()> {
    if edges_by_parent.is_empty() || granted.is_empty() {
        return Ok(());
    }

    for _ in 0..=edge_count {
        let mut added: Vec<(String, String)> = Vec::new();
        for parent in granted.keys() {
            if let Some(children) = edges_by_parent.get(parent) {
                for child in children {
                    if !granted.contains_key(child.as_str()) {
                        added.push((child.as_str().to_string(), parent.clone()));
                    }
                }
            }
        }
        if added.is_empty() {
            return Ok(());
        }
        for (child, parent) in added {
            granted.entry(child.clone()).or_insert(EffectivePermission {
                pattern: child,
                source: SOURCE_INHERITED.to_string(),
                role_name: None,
                via: Some(parent),
            });
        }
    }

    let sample = granted.keys().next().cloned().unwrap_or_default();
    Err(AccessError::inheritance_cycle(sample))
}

/// Find a cycle in the inheritance edge set, returning one pattern on the
/// cycle if present. Runs at snapshot load, never at resolution time.
pub fn find_cycle(edges: &[InheritanceEdge]) -> Option<String> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        adjacency
            .entry(edge.parent.as_str())
            .or_default()
            .push(edge.child.as_str());
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut in_stack: HashSet<&str> = HashSet::new();

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        in_stack: &mut HashSet<&'a str>,
    ) -> Option<String> {
        if in_stack.contains(node) {
            return Some(node.to_string());
        }
        if !visited.insert(node) {
            return None;
        }
        in_stack.insert(node);
        if let Some(children) = adjacency.get(node) {
            for child in children {
                if let Some(found) = visit(child, adjacency, visited, in_stack) {
                    return Some(found);
                }
            }
        }
        in_stack.remove(node);
        None
    }

    let nodes: Vec<&str> = adjacency.keys().copied().collect();
    for node in nodes {
        if let Some(found) = visit(node, &adjacency, &mut visited, &mut in_stack) {
            return Some(found);
        }
    }
    None
}
