//! Foreign-key dependency graph.
//!
//! Edges point from the referencing table to the referenced table. Only
//! immediate edges are stored; an edge that would close a cycle is refused
//! and the caller records it as deferred.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{MigrateError, Result};

#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// table -> tables it references
    outgoing: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, table: &str) {
        self.outgoing.entry(table.to_string()).or_default();
    }

    /// Whether `to` is reachable from `from` along immediate edges.
    pub fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            if let Some(next) = self.outgoing.get(node) {
                stack.extend(next.iter().map(String::as_str));
            }
        }
        false
    }

    /// Add `from -> to` unless it would close a cycle. Returns whether the edge was added.
    pub fn try_add_edge(&mut self, from: &str, to: &str) -> bool {
        if from == to || self.reaches(to, from) {
            return false;
        }
        self.add_node(to);
        self.outgoing
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        true
    }

    /// Tables `table` directly depends on.
    pub fn dependencies(&self, table: &str) -> impl Iterator<Item = &str> {
        self.outgoing
            .get(table)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    /// Partition the tables into levels with Kahn's algorithm. Every table's
    /// dependencies sit in earlier levels; each level is sorted by name.
    pub fn levels(&self) -> Result<Vec<Vec<String>>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .outgoing
            .iter()
            .map(|(table, deps)| (table.as_str(), deps.len()))
            .collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (table, deps) in &self.outgoing {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(table.as_str());
            }
        }

        let mut levels = Vec::new();
        while !remaining.is_empty() {
            let ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, count)| **count == 0)
                .map(|(table, _)| *table)
                .collect();
            if ready.is_empty() {
                let stuck: Vec<&str> = remaining.keys().copied().collect();
                return Err(MigrateError::State(format!(
                    "dependency cycle among {}",
                    stuck.join(", ")
                )));
            }
            for table in &ready {
                remaining.remove(table);
                for dependent in dependents.get(table).into_iter().flatten() {
                    if let Some(count) = remaining.get_mut(dependent) {
                        *count -= 1;
                    }
                }
            }
            levels.push(ready.into_iter().map(str::to_string).collect());
        }
        Ok(levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_edge_refused() {
        let mut g = DependencyGraph::new();
        g.add_node("EMPLOYEES");
        assert!(!g.try_add_edge("EMPLOYEES", "EMPLOYEES"));
        assert_eq!(g.levels().unwrap(), vec![vec!["EMPLOYEES".to_string()]]);
    }

    #[test]
    fn test_cycle_closing_edge_refused() {
        let mut g = DependencyGraph::new();
        assert!(g.try_add_edge("A", "B"));
        assert!(g.try_add_edge("B", "C"));
        assert!(!g.try_add_edge("C", "A"));
        assert_eq!(
            g.levels().unwrap(),
            vec![vec!["C".to_string()], vec!["B".to_string()], vec!["A".to_string()]]
        );
    }

    #[test]
    fn test_levels_sorted_by_name() {
        let mut g = DependencyGraph::new();
        for t in ["ZED", "ALPHA", "MID"] {
            g.add_node(t);
        }
        g.try_add_edge("MID", "ZED");
        let levels = g.levels().unwrap();
        assert_eq!(levels[0], vec!["ALPHA".to_string(), "ZED".to_string()]);
        assert_eq!(levels[1], vec!["MID".to_string()]);
    }

    #[test]
    fn test_reaches() {
        let mut g = DependencyGraph::new();
        g.try_add_edge("A", "B");
        g.try_add_edge("B", "C");
        assert!(g.reaches("A", "C"));
        assert!(!g.reaches("C", "A"));
    }
}
