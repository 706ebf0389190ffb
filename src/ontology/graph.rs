//! Graph analysis helpers over an ontology.
//!
//! Connected-component counting feeds the critic's connectivity dimension;
//! hierarchy-cycle enumeration feeds both the critic's consistency dimension
//! and the validator's circular-dependency check.

use std::collections::{BTreeSet, HashMap};

use super::types::Ontology;

/// Relationship types forming the subsumption/composition hierarchy.
pub const HIERARCHY_TYPES: &[&str] = &["is_a", "part_of"];

/// Number of connected components over the entity set.
///
/// Every entity is a node; every relationship whose endpoints both resolve
/// is an (undirected) edge. An empty ontology has zero components.
pub fn connected_components(ontology: &Ontology) -> usize {
    let ids: Vec<&str> = ontology.entities.keys().map(String::as_str).collect();
    if ids.is_empty() {
        return 0;
    }
    let index: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut parent: Vec<usize> = (0..ids.len()).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for rel in ontology.relationships.values() {
        let (Some(&a), Some(&b)) = (
            index.get(rel.source_id.as_str()),
            index.get(rel.target_id.as_str()),
        ) else {
            continue;
        };
        let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
        if ra != rb {
            parent[ra] = rb;
        }
    }

    (0..ids.len())
        .map(|i| find(&mut parent, i))
        .collect::<BTreeSet<_>>()
        .len()
}

/// Cycles through `is_a`/`part_of` edges, as entity-id paths.
///
/// Each cycle is reported once, canonicalized to start at its smallest id,
/// with the closing id repeated at the end of the path. Output order is
/// deterministic.
pub fn hierarchy_cycles(ontology: &Ontology) -> Vec<Vec<String>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for rel in ontology.relationships.values() {
        if !HIERARCHY_TYPES.contains(&rel.relation_type.as_str()) {
            continue;
        }
        if !ontology.entities.contains_key(&rel.source_id)
            || !ontology.entities.contains_key(&rel.target_id)
        {
            continue;
        }
        adjacency
            .entry(rel.source_id.as_str())
            .or_default()
            .push(rel.target_id.as_str());
    }
    for targets in adjacency.values_mut() {
        targets.sort();
        targets.dedup();
    }

    let mut found: BTreeSet<Vec<String>> = BTreeSet::new();
    for start in ontology.entities.keys() {
        let mut path: Vec<&str> = Vec::new();
        walk(start.as_str(), &adjacency, &mut path, &mut found);
    }
    found.into_iter().collect()
}

fn walk<'a>(
    node: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    path: &mut Vec<&'a str>,
    found: &mut BTreeSet<Vec<String>>,
) {
    if let Some(pos) = path.iter().position(|&n| n == node) {
        let cycle: Vec<&str> = path[pos..].to_vec();
        found.insert(canonicalize(&cycle));
        return;
    }

    path.push(node);
    if let Some(next) = adjacency.get(node) {
        for &target in next {
            walk(target, adjacency, path, found);
        }
    }
    path.pop();
}

/// Rotate the cycle to start at its smallest id and close it.
fn canonicalize(cycle: &[&str]) -> Vec<String> {
    let min_pos = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, id)| **id)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut rotated: Vec<String> = cycle[min_pos..]
        .iter()
        .chain(cycle[..min_pos].iter())
        .map(|s| s.to_string())
        .collect();
    rotated.push(rotated[0].clone());
    rotated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::types::{Entity, Relationship};

    fn ontology_with(entities: &[&str], edges: &[(&str, &str, &str)]) -> Ontology {
        let mut ontology = Ontology::new();
        for id in entities {
            ontology.insert_entity(Entity::with_id(*id, "Concept", *id));
        }
        for (i, (source, relation_type, target)) in edges.iter().enumerate() {
            ontology.insert_relationship(Relationship::with_id(
                format!("r{i}"),
                *source,
                *relation_type,
                *target,
            ));
        }
        ontology
    }

    #[test]
    fn test_components_empty() {
        assert_eq!(connected_components(&Ontology::new()), 0);
    }

    #[test]
    fn test_components_counts() {
        let ontology = ontology_with(
            &["a", "b", "c", "d"],
            &[("a", "related_to", "b"), ("b", "related_to", "c")],
        );
        assert_eq!(connected_components(&ontology), 2); // {a,b,c} and {d}
    }

    #[test]
    fn test_components_ignores_dangling() {
        let ontology = ontology_with(&["a", "b"], &[("a", "related_to", "ghost")]);
        assert_eq!(connected_components(&ontology), 2);
    }

    #[test]
    fn test_no_cycles_in_tree() {
        let ontology = ontology_with(
            &["a", "b", "c"],
            &[("a", "is_a", "b"), ("b", "part_of", "c")],
        );
        assert!(hierarchy_cycles(&ontology).is_empty());
    }

    #[test]
    fn test_simple_cycle_reported_once() {
        let ontology = ontology_with(
            &["a", "b", "c"],
            &[("a", "is_a", "b"), ("b", "is_a", "c"), ("c", "is_a", "a")],
        );
        let cycles = hierarchy_cycles(&ontology);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_non_hierarchy_edges_ignored() {
        let ontology = ontology_with(
            &["a", "b"],
            &[("a", "related_to", "b"), ("b", "related_to", "a")],
        );
        assert!(hierarchy_cycles(&ontology).is_empty());
    }

    #[test]
    fn test_self_loop_cycle() {
        let ontology = ontology_with(&["a"], &[("a", "part_of", "a")]);
        let cycles = hierarchy_cycles(&ontology);
        assert_eq!(cycles, vec![vec!["a".to_string(), "a".to_string()]]);
    }
}
