//! Exact minimum-cost bipartite assignment (Kuhn-Munkres, O(n³)).
//!
//! Generic over the two collections and a caller-supplied cost function.
//! Determinism: pairs come back in left-slice order, and for tied costs the
//! result depends only on the input iteration order, which the caller fixes
//! by handing in slices.

use pathfinding::kuhn_munkres::{kuhn_munkres, Weights};

use crate::error::AssignmentError;

/// Scale factor to convert f64 cost to i64 for the assignment algorithm.
const SCALE: f64 = 1_000_000.0;

/// Simple matrix type implementing pathfinding's Weights for i64.
struct I64Weights(Vec<Vec<i64>>);

impl Weights<i64> for I64Weights {
    fn rows(&self) -> usize {
        self.0.len()
    }

    fn columns(&self) -> usize {
        self.0.first().map_or(0, |r| r.len())
    }

    fn at(&self, row: usize, col: usize) -> i64 {
        self.0[row][col]
    }

    fn neg(&self) -> Self {
        I64Weights(
            self.0
                .iter()
                .map(|r| r.iter().map(|&x| x.saturating_neg()).collect())
                .collect(),
        )
    }
}

/// Convert a cost to a maximization weight (scale, negate, clamp).
fn cost_to_weight(cost: f64) -> i64 {
    let w = -cost * SCALE;
    if w >= i64::MAX as f64 {
        i64::MAX
    } else if w <= i64::MIN as f64 {
        i64::MIN
    } else {
        w as i64
    }
}

/// Exact assignment between `left` and `right` minimizing total cost.
///
/// Returns `min(left.len(), right.len())` index pairs `(left_idx, right_idx)`
/// sorted by `left_idx`; unmatched elements of the larger side are absent.
/// Empty inputs yield an empty mapping. Fails fast on a malformed cost
/// function (negative or non-finite values).
pub fn min_cost_assignment<A, B, F>(
    left: &[A],
    right: &[B],
    cost: F,
) -> Result<Vec<(usize, usize)>, AssignmentError>
where
    F: Fn(&A, &B) -> f64,
{
    if left.is_empty() || right.is_empty() {
        return Ok(Vec::new());
    }

    // Kuhn-Munkres requires rows <= columns; orient the matrix accordingly.
    let transposed = left.len() > right.len();
    let (rows, cols) = if transposed {
        (right.len(), left.len())
    } else {
        (left.len(), right.len())
    };

    let mut matrix = vec![vec![0i64; cols]; rows];
    for (i, row) in matrix.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            let (l, r) = if transposed { (j, i) } else { (i, j) };
            let c = cost(&left[l], &right[r]);
            if !c.is_finite() || c < 0.0 {
                return Err(AssignmentError::InvalidCost {
                    row: l,
                    col: r,
                    cost: c,
                });
            }
            *cell = cost_to_weight(c);
        }
    }

    let (_total, assignments) = kuhn_munkres(&I64Weights(matrix));

    let mut pairs: Vec<(usize, usize)> = assignments
        .iter()
        .enumerate()
        .map(|(row, &col)| if transposed { (col, row) } else { (row, col) })
        .collect();
    pairs.sort_unstable_by_key(|&(l, _)| l);
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total_cost(pairs: &[(usize, usize)], matrix: &[Vec<f64>]) -> f64 {
        pairs.iter().map(|&(i, j)| matrix[i][j]).sum()
    }

    #[test]
    fn covers_min_of_both_sizes() {
        let left = [0usize, 1, 2];
        let right = [0usize, 1, 2, 3, 4];
        let pairs = min_cost_assignment(&left, &right, |&l, &r| {
            (l as f64 - r as f64).abs()
        })
        .expect("assignment");
        assert_eq!(pairs.len(), 3);

        let pairs = min_cost_assignment(&right, &left, |&l, &r| {
            (l as f64 - r as f64).abs()
        })
        .expect("assignment");
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn empty_side_yields_empty_mapping() {
        let none: [usize; 0] = [];
        let some = [1usize, 2];
        let pairs = min_cost_assignment(&none, &some, |_, _| 1.0).expect("assignment");
        assert!(pairs.is_empty());
    }

    #[test]
    fn picks_the_cheaper_diagonal() {
        // cost matrix: identity pairing costs 2, crossed pairing costs 0.
        let matrix = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let left = [0usize, 1];
        let right = [0usize, 1];
        let pairs =
            min_cost_assignment(&left, &right, |&l, &r| matrix[l][r]).expect("assignment");
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn no_single_pairwise_swap_improves_the_result() {
        // Deterministic pseudo-random costs.
        let n = 6;
        let matrix: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| (((i * 31 + j * 17 + 7) * 97) % 101) as f64)
                    .collect()
            })
            .collect();
        let side: Vec<usize> = (0..n).collect();
        let pairs =
            min_cost_assignment(&side, &side, |&l, &r| matrix[l][r]).expect("assignment");

        let base = total_cost(&pairs, &matrix);
        for a in 0..pairs.len() {
            for b in (a + 1)..pairs.len() {
                let (la, ra) = pairs[a];
                let (lb, rb) = pairs[b];
                let swapped = base - matrix[la][ra] - matrix[lb][rb]
                    + matrix[la][rb]
                    + matrix[lb][ra];
                assert!(
                    swapped >= base - 1e-9,
                    "swap of pairs {a} and {b} must not improve total cost"
                );
            }
        }
    }

    #[test]
    fn negative_cost_fails_fast() {
        let side = [0usize, 1];
        let result = min_cost_assignment(&side, &side, |&l, &r| {
            if l == r {
                -1.0
            } else {
                1.0
            }
        });
        assert!(matches!(
            result,
            Err(AssignmentError::InvalidCost { .. })
        ));
    }

    #[test]
    fn tied_costs_are_deterministic() {
        let left = [0usize, 1, 2];
        let right = [0usize, 1, 2];
        let first = min_cost_assignment(&left, &right, |_, _| 1.0).expect("assignment");
        let second = min_cost_assignment(&left, &right, |_, _| 1.0).expect("assignment");
        assert_eq!(first, second);
    }
}
