//! Declared deletion order between resource types.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Dependency graph among resource type tags.
///
/// `declare(dependent, dependency)` means resources tagged `dependent`
/// (e.g. objects) must be deleted before resources tagged `dependency`
/// (e.g. the container holding them).
#[derive(Debug, Default)]
pub struct TagDependencies {
    /// tag -> tags that must be deleted before it.
    before: RwLock<HashMap<String, Vec<String>>>,
}

impl TagDependencies {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that `dependent` must be deleted before `dependency`.
    pub fn declare(&self, dependent: impl Into<String>, dependency: impl Into<String>) {
        let dependent = dependent.into();
        let mut before = self.before.write();
        let entry = before.entry(dependency.into()).or_default();
        if !entry.contains(&dependent) {
            entry.push(dependent);
        }
    }

    /// Orders `tags` so every declared dependent precedes its dependency.
    ///
    /// Constraints are followed transitively, even through tags that were
    /// not requested. Unconstrained tags keep the caller's relative order.
    /// Returns the cycle path if the declarations are cyclic.
    pub fn order(&self, tags: &[&str]) -> Result<Vec<String>, Vec<String>> {
        let before = self.before.read();
        let requested: HashSet<&str> = tags.iter().copied().collect();
        let mut visited = HashSet::new();
        let mut in_stack = HashSet::new();
        let mut path = Vec::new();
        let mut order = Vec::new();

        fn dfs(
            node: &str,
            before: &HashMap<String, Vec<String>>,
            requested: &HashSet<&str>,
            visited: &mut HashSet<String>,
            in_stack: &mut HashSet<String>,
            path: &mut Vec<String>,
            order: &mut Vec<String>,
        ) -> Result<(), Vec<String>> {
            if in_stack.contains(node) {
                let start = path.iter().position(|n| n == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].to_vec();
                cycle.push(node.to_string());
                return Err(cycle);
            }
            if visited.contains(node) {
                return Ok(());
            }

            in_stack.insert(node.to_string());
            path.push(node.to_string());

            if let Some(predecessors) = before.get(node) {
                for predecessor in predecessors {
                    dfs(predecessor, before, requested, visited, in_stack, path, order)?;
                }
            }

            in_stack.remove(node);
            path.pop();
            visited.insert(node.to_string());
            if requested.contains(node) {
                order.push(node.to_string());
            }
            Ok(())
        }

        for tag in tags {
            dfs(
                tag,
                &before,
                &requested,
                &mut visited,
                &mut in_stack,
                &mut path,
                &mut order,
            )?;
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_caller_order_kept_without_declarations() {
        let deps = TagDependencies::new();
        assert_eq!(
            deps.order(&["b", "a", "c"]).unwrap(),
            vec!["b".to_string(), "a".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn test_dependent_moves_before_dependency() {
        let deps = TagDependencies::new();
        deps.declare("swift.object", "swift.container");

        let order = deps
            .order(&["swift.container", "data_source", "swift.object"])
            .unwrap();
        assert_eq!(order, vec!["swift.object", "swift.container", "data_source"]);
    }

    #[test]
    fn test_transitive_through_unrequested_tag() {
        let deps = TagDependencies::new();
        deps.declare("a", "b");
        deps.declare("b", "c");

        assert_eq!(deps.order(&["c", "a"]).unwrap(), vec!["a", "c"]);
    }

    #[test]
    fn test_cycle_detected() {
        let deps = TagDependencies::new();
        deps.declare("a", "b");
        deps.declare("b", "a");

        let cycle = deps.order(&["a"]).unwrap_err();
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.len() >= 3);
    }

    #[test]
    fn test_duplicate_tags_collapse() {
        let deps = TagDependencies::new();
        assert_eq!(deps.order(&["a", "a"]).unwrap(), vec!["a"]);
    }
}
