// ─────────────────────────────────────────────────────────────────────
// Chipfit — Dense 6×6 Linear Algebra
// ─────────────────────────────────────────────────────────────────────

use chipfit_types::N_PARAMS;

pub type Matrix6 = [[f64; N_PARAMS]; N_PARAMS];
pub type Vector6 = [f64; N_PARAMS];

/// Solve `A x = b` for a symmetric positive-definite `A` by Cholesky
/// decomposition. `None` if `A` is not positive definite.
pub fn solve_spd(a: &Matrix6, b: &Vector6) -> Option<Vector6> {
    let all: Vec<usize> = (0..N_PARAMS).collect();
    let x = solve_spd_subset(a, b, &all)?;
    let mut out = [0.0; N_PARAMS];
    out.copy_from_slice(&x);
    Some(out)
}

/// Cholesky solve restricted to the principal submatrix `A[idx, idx]`
/// and right-hand side `b[idx]`. Result is ordered like `idx`.
pub fn solve_spd_subset(a: &Matrix6, b: &Vector6, idx: &[usize]) -> Option<Vec<f64>> {
    let n = idx.len();
    // A = L Lᵀ
    let mut l = vec![vec![0.0_f64; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[i][k] * l[j][k];
            }
            if i == j {
                let diag = a[idx[i]][idx[i]] - sum;
                if !(diag > 0.0) || !diag.is_finite() {
                    return None;
                }
                l[i][j] = diag.sqrt();
            } else {
                l[i][j] = (a[idx[i]][idx[j]] - sum) / l[j][j];
            }
        }
    }

    // L y = b
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[i][j] * y[j];
        }
        y[i] = (b[idx[i]] - sum) / l[i][i];
    }

    // Lᵀ x = y
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[j][i] * x[j];
        }
        x[i] = (y[i] - sum) / l[i][i];
    }
    Some(x)
}

/// Regularized normal equations of `min ‖J δ − r‖²`:
/// `P = JᵀJ + λI`, `q = −Jᵀr`.
pub fn normal_equations(rows: &[Vector6], residual: &[f64], lambda: f64) -> (Matrix6, Vector6) {
    let mut p = [[0.0; N_PARAMS]; N_PARAMS];
    let mut q = [0.0; N_PARAMS];
    for (row, &r) in rows.iter().zip(residual.iter()) {
        for i in 0..N_PARAMS {
            for j in 0..N_PARAMS {
                p[i][j] += row[i] * row[j];
            }
            q[i] -= row[i] * r;
        }
    }
    for (i, p_row) in p.iter_mut().enumerate() {
        p_row[i] += lambda;
    }
    (p, q)
}

/// `P x + q`, the gradient of the quadratic model.
pub fn gradient(p: &Matrix6, q: &Vector6, x: &Vector6) -> Vector6 {
    std::array::from_fn(|i| {
        p[i].iter().zip(x.iter()).map(|(a, b)| a * b).sum::<f64>() + q[i]
    })
}

/// `½ xᵀPx + qᵀx`.
pub fn objective(p: &Matrix6, q: &Vector6, x: &Vector6) -> f64 {
    let mut val = 0.0;
    for i in 0..N_PARAMS {
        let px: f64 = p[i].iter().zip(x.iter()).map(|(a, b)| a * b).sum();
        val += 0.5 * x[i] * px + q[i] * x[i];
    }
    val
}

pub fn norm2(v: &Vector6) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Component-wise clip into `[lb, ub]`.
pub fn clip(x: &Vector6, lb: &Vector6, ub: &Vector6) -> Vector6 {
    std::array::from_fn(|i| x[i].max(lb[i]).min(ub[i]))
}

pub fn is_finite(v: &[f64]) -> bool {
    v.iter().all(|x| x.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Matrix6 {
        let mut a = [[0.0; N_PARAMS]; N_PARAMS];
        for (i, row) in a.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        a
    }

    #[test]
    fn test_cholesky_solve() {
        // [4, 2; 2, 3] x = [8, 7] embedded in identity → x = [1.25, 1.5]
        let mut a = identity();
        a[0][0] = 4.0;
        a[0][1] = 2.0;
        a[1][0] = 2.0;
        a[1][1] = 3.0;
        let mut b = [0.0; N_PARAMS];
        b[0] = 8.0;
        b[1] = 7.0;
        b[5] = -2.0;

        let x = solve_spd(&a, &b).unwrap();
        assert!((x[0] - 1.25).abs() < 1e-10, "x[0] = {}", x[0]);
        assert!((x[1] - 1.5).abs() < 1e-10, "x[1] = {}", x[1]);
        assert!((x[5] + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_not_positive_definite() {
        let mut a = identity();
        a[3][3] = -1.0;
        assert!(solve_spd(&a, &[1.0; N_PARAMS]).is_none());
    }

    #[test]
    fn test_subset_solve() {
        let mut a = identity();
        a[1][1] = 2.0;
        a[1][4] = 1.0;
        a[4][1] = 1.0;
        a[4][4] = 2.0;
        let b = [9.0, 3.0, 9.0, 9.0, 3.0, 9.0];
        // [2 1; 1 2] y = [3, 3] → y = [1, 1]
        let x = solve_spd_subset(&a, &b, &[1, 4]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 1.0).abs() < 1e-12);
        assert!(solve_spd_subset(&a, &b, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_normal_equations() {
        let rows = [[1.0, 2.0, 0.0, 0.0, 0.0, 0.0]];
        let (p, q) = normal_equations(&rows, &[3.0], 0.5);
        assert_eq!(p[0][0], 1.5);
        assert_eq!(p[0][1], 2.0);
        assert_eq!(p[1][1], 4.5);
        assert_eq!(p[2][2], 0.5);
        assert_eq!(q[0], -3.0);
        assert_eq!(q[1], -6.0);
    }

    #[test]
    fn test_objective_and_gradient() {
        let p = identity();
        let q = [-1.0; N_PARAMS];
        let x = [1.0; N_PARAMS];
        assert!((objective(&p, &q, &x) + 3.0).abs() < 1e-12);
        assert!(gradient(&p, &q, &x).iter().all(|g| g.abs() < 1e-12));
    }

    #[test]
    fn test_clip() {
        let x = [-2.0, 0.5, 2.0, 0.0, 0.0, 0.0];
        let c = clip(&x, &[-1.0; N_PARAMS], &[1.0; N_PARAMS]);
        assert_eq!(c[0], -1.0);
        assert_eq!(c[1], 0.5);
        assert_eq!(c[2], 1.0);
    }
}
