use std::collections::{HashMap, HashSet, VecDeque};

/// Graph structure for traversal and analysis.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Adjacency list: kind -> list of downstream kinds.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: kind -> list of upstream kinds.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Kinds with no incoming edges.
  entry_points: Vec<String>,
  /// Kinds with multiple incoming edges (join points).
  join_points: HashSet<String>,
}

impl Graph {
  /// Build a graph from step kinds and `(from, to)` edges.
  pub fn new<'a>(kinds: impl IntoIterator<Item = &'a str>, edges: &[(String, String)]) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut order = Vec::new();

    // Initialize all kinds
    for kind in kinds {
      adjacency.entry(kind.to_string()).or_default();
      reverse_adjacency.entry(kind.to_string()).or_default();
      order.push(kind.to_string());
    }

    // Build adjacency lists, ignoring repeated edges
    for (from, to) in edges {
      let downstream = adjacency.entry(from.clone()).or_default();
      if downstream.contains(to) {
        continue;
      }
      downstream.push(to.clone());
      reverse_adjacency
        .entry(to.clone())
        .or_default()
        .push(from.clone());
    }

    let entry_points: Vec<String> = order
      .iter()
      .filter(|kind| reverse_adjacency.get(*kind).is_none_or(|v| v.is_empty()))
      .cloned()
      .collect();

    let join_points: HashSet<String> = reverse_adjacency
      .iter()
      .filter(|(_, incoming)| incoming.len() > 1)
      .map(|(kind, _)| kind.clone())
      .collect();

    Self {
      adjacency,
      reverse_adjacency,
      entry_points,
      join_points,
    }
  }

  /// Get entry points (kinds with no incoming edges).
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Get downstream kinds for a given kind.
  pub fn downstream(&self, kind: &str) -> &[String] {
    self
      .adjacency
      .get(kind)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get upstream kinds for a given kind.
  pub fn upstream(&self, kind: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(kind)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Check if a kind is a join point (has multiple incoming edges).
  pub fn is_join_point(&self, kind: &str) -> bool {
    self.join_points.contains(kind)
  }

  /// Get all join points.
  pub fn join_points(&self) -> &HashSet<String> {
    &self.join_points
  }

  /// Every kind reachable from `start`, including `start` itself.
  pub fn reachable_from(&self, start: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([start.to_string()]);

    while let Some(kind) = queue.pop_front() {
      if !seen.insert(kind.clone()) {
        continue;
      }
      for next in self.downstream(&kind) {
        if !seen.contains(next) {
          queue.push_back(next.clone());
        }
      }
    }

    seen
  }

  /// Find a kind that sits on a cycle, using DFS colouring.
  pub fn find_cycle(&self) -> Option<String> {
    // 0 = unvisited, 1 = in progress, 2 = done
    let mut color: HashMap<&str, u8> = self.adjacency.keys().map(|k| (k.as_str(), 0u8)).collect();

    fn dfs<'a>(
      kind: &'a str,
      adjacency: &'a HashMap<String, Vec<String>>,
      color: &mut HashMap<&'a str, u8>,
    ) -> Option<String> {
      color.insert(kind, 1);

      if let Some(neighbors) = adjacency.get(kind) {
        for neighbor in neighbors {
          match color.get(neighbor.as_str()) {
            Some(1) => return Some(neighbor.clone()),
            Some(0) => {
              if let Some(found) = dfs(neighbor, adjacency, color) {
                return Some(found);
              }
            }
            _ => {}
          }
        }
      }

      color.insert(kind, 2);
      None
    }

    let mut kinds: Vec<&str> = self.adjacency.keys().map(String::as_str).collect();
    kinds.sort_unstable();

    for kind in kinds {
      if color.get(kind) == Some(&0) {
        if let Some(found) = dfs(kind, &self.adjacency, &mut color) {
          return Some(found);
        }
      }
    }

    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn edge(from: &str, to: &str) -> (String, String) {
    (from.to_string(), to.to_string())
  }

  #[test]
  fn test_entry_and_join_points() {
    let graph = Graph::new(
      ["s", "a", "b", "j"],
      &[edge("s", "a"), edge("s", "b"), edge("a", "j"), edge("b", "j")],
    );

    assert_eq!(graph.entry_points(), &["s".to_string()]);
    assert!(graph.is_join_point("j"));
    assert!(!graph.is_join_point("a"));
    assert_eq!(graph.downstream("s"), &["a".to_string(), "b".to_string()]);
    assert_eq!(graph.upstream("j").len(), 2);
  }

  #[test]
  fn test_reachable_from() {
    let graph = Graph::new(["s", "a", "orphan"], &[edge("s", "a")]);
    let reachable = graph.reachable_from("s");

    assert!(reachable.contains("s"));
    assert!(reachable.contains("a"));
    assert!(!reachable.contains("orphan"));
  }

  #[test]
  fn test_find_cycle() {
    let acyclic = Graph::new(["a", "b"], &[edge("a", "b")]);
    assert!(acyclic.find_cycle().is_none());

    let cyclic = Graph::new(["a", "b", "c"], &[edge("a", "b"), edge("b", "c"), edge("c", "b")]);
    assert!(cyclic.find_cycle().is_some());
  }

  #[test]
  fn test_repeated_edges_are_collapsed() {
    let graph = Graph::new(["a", "b"], &[edge("a", "b"), edge("a", "b")]);
    assert_eq!(graph.downstream("a").len(), 1);
    assert!(!graph.is_join_point("b"));
  }
}
