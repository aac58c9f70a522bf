use nalgebra::{Matrix3x4, Vector3};

/// Pivots smaller than this (after row exchange) mark the system as singular.
pub const PIVOT_EPSILON: f64 = 1e-10;

/// Solves the 3×3 system held in the augmented matrix `[A | b]`.
///
/// Gaussian elimination with partial pivoting followed by back substitution.
/// Returns `None` for singular or near-singular systems (see `PIVOT_EPSILON`).
pub fn solve_3x3(augmented: &Matrix3x4<f64>) -> Option<Vector3<f64>> {
    let mut m = *augmented;

    for col in 0..3 {
        let mut pivot_row = col;
        for row in (col + 1)..3 {
            if m[(row, col)].abs() > m[(pivot_row, col)].abs() {
                pivot_row = row;
            }
        }
        m.swap_rows(col, pivot_row);

        let pivot = m[(col, col)];
        if pivot.abs() < PIVOT_EPSILON {
            return None;
        }

        for row in (col + 1)..3 {
            let factor = m[(row, col)] / pivot;
            for j in col..4 {
                m[(row, j)] -= factor * m[(col, j)];
            }
        }
    }

    let mut solution = Vector3::zeros();
    for i in (0..3).rev() {
        let mut value = m[(i, 3)];
        for j in (i + 1)..3 {
            value -= m[(i, j)] * solution[j];
        }
        solution[i] = value / m[(i, i)];
    }

    Some(solution)
}
