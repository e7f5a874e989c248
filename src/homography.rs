// src/homography.rs
//
// Robust image-plane -> pitch-plane homography estimation: normalized
// DLT from >=4 correspondences, with a seeded RANSAC wrapper that
// rejects mismatched or noisy keypoint correspondences before the fit.

use nalgebra::{DMatrix, Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

/// One pixel -> pitch point pair, tagged with the keypoint id it came
/// from so RANSAC rejections can be logged meaningfully.
#[derive(Debug, Clone, Copy)]
pub struct Correspondence {
    pub keypoint_id: u32,
    pub pixel: [f64; 2],
    pub pitch: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("need at least {needed} correspondences, got {got}")]
    TooFewPoints { needed: usize, got: usize },
    #[error("degenerate configuration: {0}")]
    Degenerate(&'static str),
    #[error("only {found} of {needed} required inliers")]
    TooFewInliers { needed: usize, found: usize },
}

/// Apply H to a pixel point. None when the point maps to the plane at
/// infinity (w ~ 0).
pub fn apply(h: &Matrix3<f64>, pixel: [f64; 2]) -> Option<[f64; 2]> {
    let p = h * Vector3::new(pixel[0], pixel[1], 1.0);
    if p[2].abs() < 1e-12 {
        return None;
    }
    Some([p[0] / p[2], p[1] / p[2]])
}

/// Reprojection error of a correspondence under H, in pitch units.
pub fn residual(h: &Matrix3<f64>, c: &Correspondence) -> f64 {
    match apply(h, c.pixel) {
        Some(p) => {
            let dx = p[0] - c.pitch[0];
            let dy = p[1] - c.pitch[1];
            (dx * dx + dy * dy).sqrt()
        }
        None => f64::INFINITY,
    }
}

/// Hartley conditioning: centroid to origin, mean distance sqrt(2).
fn conditioning_transform(pts: impl Iterator<Item = [f64; 2]> + Clone) -> Matrix3<f64> {
    let n = pts.clone().count() as f64;
    let cx = pts.clone().map(|p| p[0]).sum::<f64>() / n;
    let cy = pts.clone().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist = pts
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

fn condition(t: &Matrix3<f64>, p: [f64; 2]) -> [f64; 2] {
    [
        t[(0, 0)] * p[0] + t[(0, 2)],
        t[(1, 1)] * p[1] + t[(1, 2)],
    ]
}

/// Direct Linear Transform over all given correspondences.
///
/// Returns H with h33 normalized to 1 such that
/// `pitch ~ apply(H, pixel)`.
pub fn fit(correspondences: &[Correspondence]) -> Result<Matrix3<f64>, FitError> {
    let n = correspondences.len();
    if n < 4 {
        return Err(FitError::TooFewPoints { needed: 4, got: n });
    }

    let t_px = conditioning_transform(correspondences.iter().map(|c| c.pixel));
    let t_pitch = conditioning_transform(correspondences.iter().map(|c| c.pitch));

    // Two rows per correspondence; h is the null vector of A, recovered
    // as the smallest eigenvector of the 9x9 A^T A.
    let mut a = DMatrix::zeros(2 * n, 9);
    for (i, c) in correspondences.iter().enumerate() {
        let [sx, sy] = condition(&t_px, c.pixel);
        let [dx, dy] = condition(&t_pitch, c.pitch);

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    let ata = a.transpose() * &a;
    let eig = nalgebra::SymmetricEigen::new(ata);

    let mut min_idx = 0;
    for i in 1..9 {
        if eig.eigenvalues[i].abs() < eig.eigenvalues[min_idx].abs() {
            min_idx = i;
        }
    }
    #[rustfmt::skip]
    let h_cond = Matrix3::new(
        eig.eigenvectors[(0, min_idx)], eig.eigenvectors[(1, min_idx)], eig.eigenvectors[(2, min_idx)],
        eig.eigenvectors[(3, min_idx)], eig.eigenvectors[(4, min_idx)], eig.eigenvectors[(5, min_idx)],
        eig.eigenvectors[(6, min_idx)], eig.eigenvectors[(7, min_idx)], eig.eigenvectors[(8, min_idx)],
    );

    let t_pitch_inv = t_pitch
        .try_inverse()
        .ok_or(FitError::Degenerate("conditioning transform not invertible"))?;
    let h = t_pitch_inv * h_cond * t_px;

    normalize(h).ok_or(FitError::Degenerate("h33 vanished"))
}

/// Scale so h33 = 1. None when h33 is (numerically) zero, which for a
/// camera looking at a pitch means the fit collapsed.
pub fn normalize(h: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let scale = h[(2, 2)];
    if scale.abs() < 1e-12 {
        return None;
    }
    Some(h / scale)
}

#[derive(Debug, Clone)]
pub struct RobustFit {
    pub h: Matrix3<f64>,
    pub inliers: usize,
    pub rejected_ids: Vec<u32>,
}

/// RANSAC around [`fit`]: sample minimal sets, score by residual, refit
/// on the inlier consensus. Seeded so a rerun over the same detections
/// produces the same transform.
pub fn fit_robust(
    correspondences: &[Correspondence],
    max_iterations: usize,
    inlier_threshold: f64,
    seed: u64,
) -> Result<RobustFit, FitError> {
    let n = correspondences.len();
    if n < 4 {
        return Err(FitError::TooFewPoints { needed: 4, got: n });
    }
    // With exactly the minimal set there is nothing to vote with.
    if n == 4 {
        let h = fit(correspondences)?;
        return Ok(RobustFit {
            h,
            inliers: 4,
            rejected_ids: Vec::new(),
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut best_count = 0usize;
    let mut best_mask = vec![false; n];

    for _ in 0..max_iterations {
        let picks = rand::seq::index::sample(&mut rng, n, 4);
        let sample: Vec<Correspondence> = picks.iter().map(|i| correspondences[i]).collect();

        let h = match fit(&sample) {
            Ok(h) => h,
            Err(_) => continue,
        };

        let mut mask = vec![false; n];
        let mut count = 0usize;
        for (i, c) in correspondences.iter().enumerate() {
            if residual(&h, c) < inlier_threshold {
                mask[i] = true;
                count += 1;
            }
        }

        if count > best_count {
            best_count = count;
            best_mask = mask;
            if count == n {
                break;
            }
        }
    }

    if best_count < 4 {
        return Err(FitError::TooFewInliers {
            needed: 4,
            found: best_count,
        });
    }

    let consensus: Vec<Correspondence> = correspondences
        .iter()
        .zip(&best_mask)
        .filter(|(_, &keep)| keep)
        .map(|(c, _)| *c)
        .collect();
    let h = fit(&consensus)?;

    let rejected_ids = correspondences
        .iter()
        .zip(&best_mask)
        .filter(|(_, &keep)| !keep)
        .map(|(c, _)| c.keypoint_id)
        .collect();

    Ok(RobustFit {
        h,
        inliers: best_count,
        rejected_ids,
    })
}
