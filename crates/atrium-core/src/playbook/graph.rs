// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Prerequisite graph: cycle detection, reverse index and topological order.

use std::collections::{HashMap, HashSet};

/// Prerequisite DAG over node slugs.
///
/// Edges point from a node to each of its prerequisites. The reverse index
/// (`unlocks_of`) maps a prerequisite to the nodes it helps unlock.
#[derive(Debug, Clone, Default)]
pub struct PrerequisiteGraph {
    /// Node slugs in declaration order.
    order: Vec<String>,
    prerequisites: HashMap<String, Vec<String>>,
    unlocks_of: HashMap<String, Vec<String>>,
}

impl PrerequisiteGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with its prerequisite slugs. Repeated slugs count once.
    pub fn add_node(&mut self, slug: &str, prerequisites: &[String]) {
        self.order.push(slug.to_string());
        let mut distinct: Vec<String> = Vec::with_capacity(prerequisites.len());
        for prerequisite in prerequisites {
            if !distinct.contains(prerequisite) {
                distinct.push(prerequisite.clone());
            }
        }
        for prerequisite in &distinct {
            self.unlocks_of
                .entry(prerequisite.clone())
                .or_default()
                .push(slug.to_string());
        }
        self.prerequisites.insert(slug.to_string(), distinct);
    }

    /// Prerequisites of `slug`.
    pub fn prerequisites(&self, slug: &str) -> &[String] {
        self.prerequisites.get(slug).map_or(&[], Vec::as_slice)
    }

    /// Nodes that list `slug` as a prerequisite.
    pub fn dependents(&self, slug: &str) -> &[String] {
        self.unlocks_of.get(slug).map_or(&[], Vec::as_slice)
    }

    /// Returns `Ok(())` if the graph is acyclic, or `Err` with the cycle path.
    pub fn detect_cycles(&self) -> Result<(), Vec<String>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        for slug in &self.order {
            self.dfs(slug, &mut visited, &mut path)?;
        }
        Ok(())
    }

    fn dfs<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), Vec<String>> {
        if let Some(start) = path.iter().position(|n| *n == node) {
            let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(node.to_string());
            return Err(cycle);
        }
        if visited.contains(node) {
            return Ok(());
        }

        path.push(node);
        for prerequisite in self.prerequisites(node) {
            self.dfs(prerequisite, visited, path)?;
        }
        path.pop();
        visited.insert(node);
        Ok(())
    }

    /// Slugs ordered so every node follows all of its prerequisites.
    ///
    /// Ties keep declaration order. Only meaningful on an acyclic graph.
    pub fn topological_order(&self) -> Vec<String> {
        let mut placed: HashSet<&str> = HashSet::new();
        let mut result = Vec::with_capacity(self.order.len());
        while result.len() < self.order.len() {
            let before = result.len();
            for slug in &self.order {
                if placed.contains(slug.as_str()) {
                    continue;
                }
                if self
                    .prerequisites(slug)
                    .iter()
                    .all(|p| placed.contains(p.as_str()))
                {
                    placed.insert(slug);
                    result.push(slug.clone());
                }
            }
            if result.len() == before {
                break;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> PrerequisiteGraph {
        let mut g = PrerequisiteGraph::new();
        for (slug, prereqs) in edges {
            let prereqs: Vec<String> = prereqs.iter().map(|s| s.to_string()).collect();
            g.add_node(slug, &prereqs);
        }
        g
    }

    #[test]
    fn test_no_cycles() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        assert!(g.detect_cycles().is_ok());
        assert_eq!(g.topological_order(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_simple_cycle() {
        let g = graph(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]);
        let cycle = g.detect_cycles().unwrap_err();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
    }

    #[test]
    fn test_repeated_prerequisite_counts_once() {
        let g = graph(&[("a", &[]), ("b", &["a", "a"])]);
        assert_eq!(g.prerequisites("b"), &["a".to_string()]);
        assert_eq!(g.dependents("a"), &["b".to_string()]);
    }

    #[test]
    fn test_self_reference() {
        let g = graph(&[("a", &["a"])]);
        assert_eq!(g.detect_cycles().unwrap_err(), vec!["a", "a"]);
    }

    #[test]
    fn test_diamond_no_cycle() {
        let g = graph(&[("z", &["x", "y"]), ("x", &["root"]), ("y", &["root"]), ("root", &[])]);
        assert!(g.detect_cycles().is_ok());
        let order = g.topological_order();
        assert_eq!(order.first().map(String::as_str), Some("root"));
        assert_eq!(order.last().map(String::as_str), Some("z"));
        let mut deps = g.dependents("root").to_vec();
        deps.sort();
        assert_eq!(deps, vec!["x", "y"]);
        assert_eq!(g.dependents("z"), &[] as &[String]);
    }
}
