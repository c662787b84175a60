//! Two-component PCA over per-sample feature vectors
//!
//! Fit once over every sampled waveform, then project each point with the same
//! basis. Eigen-decomposition uses cyclic Jacobi rotations, which is exact
//! enough for the small symmetric covariance matrices involved and fully
//! deterministic (no random initialisation).

use serde::{Deserialize, Serialize};

const MAX_SWEEPS: usize = 64;
const OFF_DIAGONAL_EPS: f64 = 1e-24;

/// Fewer points than this produce an empty embedding
pub const MIN_POINTS: usize = 3;

/// One projected sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PcaPoint {
    /// Class of the sample
    pub class: i64,
    /// First component
    pub x: f64,
    /// Second component
    pub y: f64,
}

/// A fitted, global 2-D projection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PcaEmbedding {
    /// Projected samples, in class then sample order
    pub points: Vec<PcaPoint>,
    /// Fraction of total variance per component
    pub explained_variance: Vec<f64>,
    /// Component loadings over the standardised features
    pub components: Vec<Vec<f64>>,
}

/// Symmetric eigen-decomposition; eigenvalues descending, eigenvectors as rows
pub(crate) fn symmetric_eigen(matrix: &[Vec<f64>]) -> (Vec<f64>, Vec<Vec<f64>>) {
    let n = matrix.len();
    let mut a: Vec<Vec<f64>> = matrix.to_vec();
    let mut v: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for _ in 0..MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| a[i][j] * a[i][j])
            .sum();
        if off < OFF_DIAGONAL_EPS {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if a[p][q] == 0.0 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = theta.signum() / (theta.abs() + theta.mul_add(theta, 1.0).sqrt());
                let c = 1.0 / t.mul_add(t, 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let (akp, akq) = (a[k][p], a[k][q]);
                    a[k][p] = c * akp - s * akq;
                    a[k][q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let (apk, aqk) = (a[p][k], a[q][k]);
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
                for row in &mut v {
                    let (vkp, vkq) = (row[p], row[q]);
                    row[p] = c * vkp - s * vkq;
                    row[q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[j][j].total_cmp(&a[i][i]).then(i.cmp(&j)));
    let values = order.iter().map(|&i| a[i][i]).collect();
    let vectors = order
        .iter()
        .map(|&i| (0..n).map(|k| v[k][i]).collect())
        .collect();
    (values, vectors)
}

/// Flip `component` so its largest-magnitude loading is positive
fn normalise_sign(component: &mut [f64]) {
    let pivot = component
        .iter()
        .copied()
        .fold(0.0_f64, |best, x| if x.abs() > best.abs() { x } else { best });
    if pivot < 0.0 {
        component.iter_mut().for_each(|x| *x = -*x);
    }
}

/// Fit and project `(class, features)` points
#[allow(clippy::cast_precision_loss)]
pub(crate) fn embed<const D: usize>(points: &[(i64, [f64; D])]) -> PcaEmbedding {
    let n = points.len();
    if n < MIN_POINTS || D == 0 {
        return PcaEmbedding::default();
    }
    let nf = n as f64;

    let mut mean = [0.0; D];
    for (_, x) in points {
        for d in 0..D {
            mean[d] += x[d];
        }
    }
    mean.iter_mut().for_each(|m| *m /= nf);

    let mut scale = [0.0; D];
    for (_, x) in points {
        for d in 0..D {
            scale[d] += (x[d] - mean[d]).powi(2);
        }
    }
    for s in &mut scale {
        let std = (*s / nf).sqrt();
        *s = if std > 0.0 { std } else { 1.0 };
    }

    let z: Vec<[f64; D]> = points
        .iter()
        .map(|(_, x)| {
            let mut row = [0.0; D];
            for d in 0..D {
                row[d] = (x[d] - mean[d]) / scale[d];
            }
            row
        })
        .collect();

    let mut cov = vec![vec![0.0; D]; D];
    for row in &z {
        for i in 0..D {
            for j in 0..D {
                cov[i][j] += row[i] * row[j];
            }
        }
    }
    cov.iter_mut()
        .flatten()
        .for_each(|c| *c /= nf - 1.0);

    let (values, vectors) = symmetric_eigen(&cov);
    let total: f64 = values.iter().map(|v| v.max(0.0)).sum();
    let k = D.min(2);

    let mut components: Vec<Vec<f64>> = vectors.into_iter().take(k).collect();
    components.iter_mut().for_each(|c| normalise_sign(c));
    let explained_variance = values
        .iter()
        .take(k)
        .map(|v| if total > 0.0 { v.max(0.0) / total } else { 0.0 })
        .collect();

    let project = |row: &[f64; D], c: Option<&Vec<f64>>| {
        c.map_or(0.0, |c| row.iter().zip(c).map(|(a, b)| a * b).sum::<f64>())
    };
    let points = points
        .iter()
        .zip(&z)
        .map(|((class, _), row)| PcaPoint {
            class: *class,
            x: project(row, components.first()),
            y: project(row, components.get(1)),
        })
        .collect();

    PcaEmbedding {
        points,
        explained_variance,
        components,
    }
}
