//! Cycle detection by depth-first search with three-color marking.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
  /// Not visited yet.
  White,
  /// On the current DFS path.
  Gray,
  /// Fully explored; no cycle reachable through it.
  Black,
}

/// Find a dependency cycle.
///
/// `deps[i]` lists the indices node `i` depends on, in declared order. Roots are
/// visited in index order, so the reported cycle is deterministic. The returned
/// path starts and ends at the same node, e.g. `[a, b, a]`.
pub(super) fn find_cycle(deps: &[Vec<usize>]) -> Option<Vec<usize>> {
  let mut color = vec![Color::White; deps.len()];
  let mut path: Vec<usize> = Vec::new();

  for root in 0..deps.len() {
    if color[root] != Color::White {
      continue;
    }

    // Explicit stack of (node, index of the next dependency to visit).
    let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
    color[root] = Color::Gray;
    path.push(root);

    while let Some(frame) = stack.last_mut() {
      let (node, next) = *frame;

      let Some(&child) = deps[node].get(next) else {
        color[node] = Color::Black;
        path.pop();
        stack.pop();
        continue;
      };
      frame.1 += 1;

      match color[child] {
        Color::White => {
          color[child] = Color::Gray;
          path.push(child);
          stack.push((child, 0));
        }
        Color::Gray => {
          // Back edge: the cycle is the path suffix starting at `child`.
          let start = path.iter().position(|&n| n == child).unwrap_or(0);
          let mut cycle = path[start..].to_vec();
          cycle.push(child);
          return Some(cycle);
        }
        Color::Black => {}
      }
    }
  }

  None
}
