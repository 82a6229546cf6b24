use serde::{Deserialize, Serialize};

/// A landmark position in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Transform families a landmark set can be fitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformClass {
    Translation,
    Affine,
}

impl TransformClass {
    /// Minimum number of correspondences needed to fit the model
    pub fn min_points(&self) -> usize {
        match self {
            TransformClass::Translation => 1,
            TransformClass::Affine => 3,
        }
    }
}

/// 2D affine map `p -> (m[0] x + m[1] y + m[2], m[3] x + m[4] y + m[5])`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineModel {
    pub m: [f64; 6],
}

impl Default for AffineModel {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineModel {
    pub fn identity() -> Self {
        Self {
            m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        }
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self {
            m: [1.0, 0.0, dx, 0.0, 1.0, dy],
        }
    }

    pub fn apply(&self, p: &Point2) -> Point2 {
        let m = &self.m;
        Point2::new(m[0] * p.x + m[1] * p.y + m[2], m[3] * p.x + m[4] * p.y + m[5])
    }

    pub fn determinant(&self) -> f64 {
        self.m[0] * self.m[4] - self.m[1] * self.m[3]
    }

    pub fn invert(&self) -> Option<Self> {
        let det = self.determinant();
        if det.abs() < 1e-12 {
            return None;
        }
        let [a, b, c, d, e, f] = self.m;
        let ia = e / det;
        let ib = -b / det;
        let id = -d / det;
        let ie = a / det;
        Some(Self {
            m: [ia, ib, -(ia * c + ib * f), id, ie, -(id * c + ie * f)],
        })
    }

    /// Least-squares fit of the model class mapping `from[i]` onto `to[i]`.
    pub fn fit(class: TransformClass, from: &[Point2], to: &[Point2]) -> Option<Self> {
        let weights = vec![1.0; from.len()];
        Self::fit_weighted(class, from, to, &weights)
    }

    /// Weighted least-squares fit. Returns `None` for degenerate input
    /// (too few points, collinear points, all-zero weights).
    pub fn fit_weighted(
        class: TransformClass,
        from: &[Point2],
        to: &[Point2],
        weights: &[f64],
    ) -> Option<Self> {
        if from.len() != to.len() || from.len() != weights.len() {
            return None;
        }
        if from.len() < class.min_points() {
            return None;
        }

        match class {
            TransformClass::Translation => {
                let w_sum: f64 = weights.iter().sum();
                if w_sum <= 0.0 {
                    return None;
                }
                let (mut dx, mut dy) = (0.0, 0.0);
                for ((p, q), w) in from.iter().zip(to).zip(weights) {
                    dx += w * (q.x - p.x);
                    dy += w * (q.y - p.y);
                }
                Some(Self::translation(dx / w_sum, dy / w_sum))
            }
            TransformClass::Affine => {
                // Normal equations share one 3x3 matrix for both output rows
                let mut ata = [[0.0f64; 3]; 3];
                let mut atx = [0.0f64; 3];
                let mut aty = [0.0f64; 3];
                for ((p, q), &w) in from.iter().zip(to).zip(weights) {
                    let row = [p.x, p.y, 1.0];
                    for i in 0..3 {
                        for j in 0..3 {
                            ata[i][j] += w * row[i] * row[j];
                        }
                        atx[i] += w * row[i] * q.x;
                        aty[i] += w * row[i] * q.y;
                    }
                }
                let rx = solve3(&ata, &atx)?;
                let ry = solve3(&ata, &aty)?;
                Some(Self {
                    m: [rx[0], rx[1], rx[2], ry[0], ry[1], ry[2]],
                })
            }
        }
    }

    /// Distance between `apply(from)` and `to`.
    pub fn residual(&self, from: &Point2, to: &Point2) -> f64 {
        self.apply(from).distance(to)
    }
}

/// Solve a 3x3 linear system with partial pivoting.
fn solve3(a: &[[f64; 3]; 3], b: &[f64; 3]) -> Option<[f64; 3]> {
    let mut m = [[0.0f64; 4]; 3];
    for i in 0..3 {
        m[i][..3].copy_from_slice(&a[i]);
        m[i][3] = b[i];
    }

    let scale = a
        .iter()
        .flat_map(|r| r.iter())
        .fold(0.0f64, |acc, v| acc.max(v.abs()))
        .max(1.0);

    for col in 0..3 {
        let pivot = (col..3)
            .max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))
            .unwrap_or(col);
        if m[pivot][col].abs() < 1e-10 * scale {
            return None;
        }
        m.swap(col, pivot);
        for row in 0..3 {
            if row != col {
                let factor = m[row][col] / m[col][col];
                for k in col..4 {
                    m[row][k] -= factor * m[col][k];
                }
            }
        }
    }

    Some([m[0][3] / m[0][0], m[1][3] / m[1][1], m[2][3] / m[2][2]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point2> {
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(100.0, 0.0),
            Point2::new(100.0, 100.0),
            Point2::new(0.0, 100.0),
        ]
    }

    #[test]
    fn test_affine_fit_recovers_model() {
        let truth = AffineModel {
            m: [0.98, -0.05, 12.0, 0.04, 1.02, -7.5],
        };
        let from = square();
        let to: Vec<Point2> = from.iter().map(|p| truth.apply(p)).collect();

        let fitted = AffineModel::fit(TransformClass::Affine, &from, &to).unwrap();
        for (a, b) in fitted.m.iter().zip(truth.m.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_collinear_points_are_degenerate() {
        let from = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(2.0, 2.0),
        ];
        assert!(AffineModel::fit(TransformClass::Affine, &from, &from).is_none());
    }

    #[test]
    fn test_translation_fit_averages() {
        let from = vec![Point2::new(0.0, 0.0), Point2::new(10.0, 10.0)];
        let to = vec![Point2::new(4.0, 2.0), Point2::new(16.0, 14.0)];
        let model = AffineModel::fit(TransformClass::Translation, &from, &to).unwrap();
        assert_eq!(model, AffineModel::translation(5.0, 3.0));
    }

    #[test]
    fn test_invert_round_trips_point() {
        let model = AffineModel {
            m: [1.1, 0.2, 3.0, -0.1, 0.9, 4.0],
        };
        let inverse = model.invert().unwrap();
        let p = Point2::new(17.0, -3.0);
        let back = inverse.apply(&model.apply(&p));
        assert!(back.distance(&p) < 1e-9);
    }
}
