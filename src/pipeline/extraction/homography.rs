//! Four-point plane-to-image homography.

use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};

use crate::error::HomographyError;

/// Solves for H such that `dst[i] ≈ project(H, src[i])` from exactly four
/// correspondences. Both point sets are Hartley-normalised first, so the
/// degeneracy check does not depend on pixel scale.
pub fn from_four_points(
    src: &[Point2<f64>; 4],
    dst: &[Point2<f64>; 4],
) -> Result<Matrix3<f64>, HomographyError> {
    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for (i, (s, d)) in src_n.iter().zip(dst_n.iter()).enumerate() {
        let r = 2 * i;
        // u = (h11 x + h12 y + h13) / (h31 x + h32 y + 1)
        a[(r, 0)] = s.x;
        a[(r, 1)] = s.y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -d.x * s.x;
        a[(r, 7)] = -d.x * s.y;
        b[r] = d.x;
        // v = (h21 x + h22 y + h23) / (h31 x + h32 y + 1)
        a[(r + 1, 3)] = s.x;
        a[(r + 1, 4)] = s.y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -d.y * s.x;
        a[(r + 1, 7)] = -d.y * s.y;
        b[r + 1] = d.y;
    }

    let h = a.lu().solve(&b).ok_or(HomographyError::Singular)?;
    if h.iter().any(|v| !v.is_finite()) {
        return Err(HomographyError::Singular);
    }

    #[rustfmt::skip]
    let h_norm = Matrix3::new(
        h[0], h[1], h[2],
        h[3], h[4], h[5],
        h[6], h[7], 1.0,
    );
    // A quad collapsed to a line or point still solves, but not invertibly.
    if h_norm.determinant().abs() < 1e-9 {
        return Err(HomographyError::Singular);
    }

    let t_dst_inv = t_dst.try_inverse().ok_or(HomographyError::Singular)?;
    let h = t_dst_inv * h_norm * t_src;
    let scale = h[(2, 2)];
    if scale.abs() < 1e-15 {
        return Err(HomographyError::Singular);
    }
    Ok(h / scale)
}

/// Translates the centroid to the origin and scales the mean distance from
/// it to sqrt(2).
fn normalize_points(pts: &[Point2<f64>; 4]) -> (Matrix3<f64>, [Point2<f64>; 4]) {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    #[rustfmt::skip]
    let t = Matrix3::new(
        s, 0.0, -s * cx,
        0.0, s, -s * cy,
        0.0, 0.0, 1.0,
    );
    (t, pts.map(|p| Point2::new(s * (p.x - cx), s * (p.y - cy))))
}

/// Project a 2D point through a 3×3 homography.
pub fn project(h: &Matrix3<f64>, p: &Point2<f64>) -> Result<Point2<f64>, HomographyError> {
    let q = h * Vector3::new(p.x, p.y, 1.0);
    if q.z.abs() < 1e-12 {
        return Err(HomographyError::PointAtInfinity);
    }
    Ok(Point2::new(q.x / q.z, q.y / q.z))
}
