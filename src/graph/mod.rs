//! Relation graph inferred from the classified identifier columns
//!
//! Nodes are table names. A directed edge `A -> B` exists iff `A` carries a
//! foreign column matching `B`'s identifier category; several foreign
//! columns to the same table (`person_id` and `associated_person_id`)
//! collapse into one edge. Adjacency is stored both ways: forward edges
//! (owner toward referenced table) drive join-key path search, reverse
//! edges drive root reachability.

use crate::schema::classify::CategoryMap;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Directed foreign-key graph over table names
#[derive(Debug, Clone, Default)]
pub struct RelationGraph {
    forward: BTreeMap<String, BTreeSet<String>>,
    reverse: BTreeMap<String, BTreeSet<String>>,
}

impl RelationGraph {
    /// Build the graph from classified identifier categories
    ///
    /// Self-references (a category claiming a decorated column of its own
    /// table, e.g. a `parent_person_id` on `person`) are dropped: they add
    /// no join information and would only introduce trivial cycles.
    #[must_use]
    pub fn from_categories(categories: &CategoryMap, id_suffix: &str) -> Self {
        let mut graph = Self::default();
        for (category, columns) in categories {
            let Some(referenced) = category.strip_suffix(id_suffix) else {
                continue;
            };
            for qualified in columns {
                if qualified.table != referenced {
                    graph.add_edge(&qualified.table, referenced);
                }
            }
        }
        graph
    }

    /// Build a graph from explicit `(owner, referenced)` edges
    pub fn from_edges<I, S>(edges: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let mut graph = Self::default();
        for (from, to) in edges {
            let (from, to) = (from.into(), to.into());
            graph.add_edge(&from, &to);
        }
        graph
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        self.forward
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.reverse
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());
    }

    /// Tables directly referenced by `table`
    #[must_use]
    pub fn referenced_by(&self, table: &str) -> Vec<&str> {
        self.forward
            .get(table)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Shortest path of referenced tables from `from` to `to`
    ///
    /// The returned path excludes `from` itself and ends at `to`; its first
    /// element is the table whose identifier joins `from` toward `to`.
    /// `relation_path(a, a)` is an empty path. An unreachable target yields
    /// `None`, never an error. BFS with an explicit visited set, so a
    /// cyclic graph cannot loop the search.
    #[must_use]
    pub fn relation_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(Vec::new());
        }

        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut predecessor: BTreeMap<&str, &str> = BTreeMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        visited.insert(from);
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            let Some(next_tables) = self.forward.get(current) else {
                continue;
            };
            for next in next_tables {
                let next = next.as_str();
                if !visited.insert(next) {
                    continue;
                }
                predecessor.insert(next, current);
                if next == to {
                    // Walk predecessors back to (but excluding) `from`
                    let mut path: SmallVec<[String; 8]> = SmallVec::new();
                    let mut node: &str = next;
                    while node != from {
                        path.push(node.to_string());
                        node = predecessor[node];
                    }
                    path.reverse();
                    return Some(path.into_vec());
                }
                queue.push_back(next);
            }
        }

        None
    }

    /// All tables transitively referencing `root`, in traversal order
    ///
    /// BFS over reverse edges with a globally-visited set; terminates on
    /// arbitrary cycles, including self-references. The root itself is not
    /// part of the result. A table nothing references yields an empty set.
    #[must_use]
    pub fn reachable_set(&self, root: &str) -> Vec<String> {
        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut order: Vec<String> = Vec::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        visited.insert(root);
        queue.push_back(root);

        while let Some(current) = queue.pop_front() {
            let Some(referers) = self.reverse.get(current) else {
                continue;
            };
            for referer in referers {
                if visited.insert(referer.as_str()) {
                    order.push(referer.clone());
                    queue.push_back(referer.as_str());
                }
            }
        }

        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaSnapshot;
    use crate::schema::classify::classify;

    fn graph() -> RelationGraph {
        let snapshot = SchemaSnapshot::from_tables(vec![
            (
                "measurement",
                vec!["measurement_id", "person_id", "associated_person_id"],
            ),
            ("measurement_note", vec!["measurement_note_id", "measurement_id"]),
            ("person", vec!["person_id", "care_site_id"]),
            ("care_site", vec!["care_site_id"]),
        ]);
        RelationGraph::from_categories(&classify(&snapshot, "_id"), "_id")
    }

    #[test]
    fn parallel_foreign_keys_collapse_into_one_edge() {
        let graph = graph();
        assert_eq!(graph.referenced_by("measurement"), vec!["person"]);
    }

    #[test]
    fn path_to_self_is_empty() {
        assert_eq!(
            graph().relation_path("person", "person"),
            Some(Vec::new())
        );
    }

    #[test]
    fn path_first_element_is_the_join_table() {
        let graph = graph();
        assert_eq!(
            graph.relation_path("measurement", "person"),
            Some(vec!["person".to_string()])
        );
        assert_eq!(
            graph.relation_path("measurement_note", "person"),
            Some(vec!["measurement".to_string(), "person".to_string()])
        );
    }

    #[test]
    fn unreachable_target_is_none_not_an_error() {
        let graph = graph();
        assert_eq!(graph.relation_path("person", "measurement"), None);
        assert_eq!(graph.relation_path("care_site", "person"), None);
    }

    #[test]
    fn reachability_follows_reverse_edges() {
        let set = graph().reachable_set("person");
        assert_eq!(set, vec!["measurement", "measurement_note"]);
        assert!(graph().reachable_set("measurement_note").is_empty());
    }

    #[test]
    fn cyclic_graphs_terminate() {
        let graph = RelationGraph::from_edges(vec![
            ("a", "a"),
            ("a", "b"),
            ("b", "a"),
            ("c", "b"),
        ]);
        let mut set = graph.reachable_set("a");
        set.sort();
        assert_eq!(set, vec!["b", "c"]);
        assert_eq!(graph.relation_path("c", "a").unwrap().last().unwrap(), "a");
        assert_eq!(graph.relation_path("b", "c"), None);
    }
}
