//! Difference-of-Gaussian scale space shared by the feature strategies.

use crate::algorithms::FeatureParams;
use crate::utils::{gaussian_blur, Plane};
use ndarray::Array2;
use std::f32::consts::PI;

/// Blur already present in a camera image
const ASSUMED_INPUT_SIGMA: f32 = 0.5;
/// Principal curvature ratio above which a DoG extremum is an edge response
const EDGE_RATIO: f32 = 10.0;
const ORIENTATION_BINS: usize = 36;

/// Scale-space extremum with its dominant orientation
#[derive(Debug, Clone)]
pub struct Keypoint {
    /// Position in full-resolution pixels
    pub x: f32,
    pub y: f32,
    /// Position in octave pixels
    pub octave_x: f32,
    pub octave_y: f32,
    pub octave: usize,
    pub scale_index: usize,
    /// Blur of the Gaussian image the keypoint lives on, in octave pixels
    pub sigma: f32,
    pub orientation: f32,
    pub response: f32,
}

pub struct Octave {
    /// Multiplier from octave pixels to full-resolution pixels
    pub scale: f32,
    pub gaussians: Vec<Plane>,
    pub sigmas: Vec<f32>,
}

pub struct ScaleSpace {
    pub octaves: Vec<Octave>,
    steps: u32,
}

impl ScaleSpace {
    pub fn build(plane: &Plane, params: &FeatureParams) -> Self {
        let steps = params.steps_per_octave.max(1);
        let k = 2f32.powf(1.0 / steps as f32);

        let mut base = plane.clone();
        let mut scale = 1.0f32;
        let max_size = params.max_octave_size.max(1);
        while base.nrows().max(base.ncols()) > max_size && base.nrows().min(base.ncols()) > 1 {
            base = downsample(&gaussian_blur(&base, 1.0));
            scale *= 2.0;
        }

        let sigma0 = params.initial_sigma;
        let pre_blur = (sigma0 * sigma0 - ASSUMED_INPUT_SIGMA * ASSUMED_INPUT_SIGMA)
            .max(0.0)
            .sqrt();
        base = gaussian_blur(&base, pre_blur);

        let sigmas: Vec<f32> = (0..steps + 3).map(|i| sigma0 * k.powi(i as i32)).collect();
        let mut octaves = Vec::new();

        loop {
            let mut gaussians = Vec::with_capacity(sigmas.len());
            gaussians.push(base.clone());
            for i in 1..sigmas.len() {
                let increment = (sigmas[i] * sigmas[i] - sigmas[i - 1] * sigmas[i - 1]).sqrt();
                let next = gaussian_blur(&gaussians[i - 1], increment);
                gaussians.push(next);
            }

            // Blur of gaussians[steps] is exactly 2 * sigma0
            let next_base = downsample(&gaussians[steps as usize]);
            octaves.push(Octave {
                scale,
                gaussians,
                sigmas: sigmas.clone(),
            });

            if next_base.nrows().min(next_base.ncols()) < params.min_octave_size.max(8) {
                break;
            }
            base = next_base;
            scale *= 2.0;
        }

        Self { octaves, steps }
    }

    /// Detect DoG extrema and assign each its dominant orientation.
    ///
    /// At most `max_features` keypoints are kept, strongest response first.
    pub fn detect(&self, params: &FeatureParams) -> Vec<Keypoint> {
        let threshold = 0.5 * params.contrast_threshold / self.steps as f32;
        let mut keypoints = Vec::new();

        for (o, octave) in self.octaves.iter().enumerate() {
            let dogs: Vec<Plane> = octave
                .gaussians
                .windows(2)
                .map(|pair| &pair[1] - &pair[0])
                .collect();
            let (height, width) = octave.gaussians[0].dim();
            if width < 3 || height < 3 {
                continue;
            }

            for s in 1..=self.steps as usize {
                let (below, current, above) = (&dogs[s - 1], &dogs[s], &dogs[s + 1]);
                for y in 1..height - 1 {
                    for x in 1..width - 1 {
                        let v = current[[y, x]];
                        if v.abs() <= threshold {
                            continue;
                        }
                        if !is_extremum(v, x, y, below, current, above) {
                            continue;
                        }
                        if is_edge(current, x, y) {
                            continue;
                        }

                        let (dx, dy) = subpixel_offset(current, x, y);
                        let ox = x as f32 + dx;
                        let oy = y as f32 + dy;
                        let sigma = octave.sigmas[s];
                        let orientation =
                            dominant_orientation(&octave.gaussians[s], ox, oy, sigma);

                        keypoints.push(Keypoint {
                            x: ox * octave.scale,
                            y: oy * octave.scale,
                            octave_x: ox,
                            octave_y: oy,
                            octave: o,
                            scale_index: s,
                            sigma,
                            orientation,
                            response: v.abs(),
                        });
                    }
                }
            }
        }

        keypoints.sort_by(|a, b| b.response.total_cmp(&a.response));
        keypoints.truncate(params.max_features);
        keypoints
    }

    pub fn gaussian(&self, keypoint: &Keypoint) -> &Plane {
        &self.octaves[keypoint.octave].gaussians[keypoint.scale_index]
    }
}

fn downsample(plane: &Plane) -> Plane {
    let (height, width) = plane.dim();
    let new_height = (height / 2).max(1);
    let new_width = (width / 2).max(1);
    Array2::from_shape_fn((new_height, new_width), |(y, x)| {
        plane[[(2 * y).min(height - 1), (2 * x).min(width - 1)]]
    })
}

fn is_extremum(v: f32, x: usize, y: usize, below: &Plane, current: &Plane, above: &Plane) -> bool {
    let is_max = v > 0.0;
    for layer in [below, current, above] {
        for yy in y - 1..=y + 1 {
            for xx in x - 1..=x + 1 {
                if std::ptr::eq(layer, current) && xx == x && yy == y {
                    continue;
                }
                let n = layer[[yy, xx]];
                if (is_max && n >= v) || (!is_max && n <= v) {
                    return false;
                }
            }
        }
    }
    true
}

fn is_edge(dog: &Plane, x: usize, y: usize) -> bool {
    let v = dog[[y, x]];
    let dxx = dog[[y, x + 1]] + dog[[y, x - 1]] - 2.0 * v;
    let dyy = dog[[y + 1, x]] + dog[[y - 1, x]] - 2.0 * v;
    let dxy = (dog[[y + 1, x + 1]] - dog[[y + 1, x - 1]] - dog[[y - 1, x + 1]]
        + dog[[y - 1, x - 1]])
        / 4.0;
    let trace = dxx + dyy;
    let det = dxx * dyy - dxy * dxy;
    if det <= 0.0 {
        return true;
    }
    trace * trace / det >= (EDGE_RATIO + 1.0).powi(2) / EDGE_RATIO
}

/// Parabolic peak refinement along x and y, clamped to half a pixel
fn subpixel_offset(dog: &Plane, x: usize, y: usize) -> (f32, f32) {
    let v = dog[[y, x]];
    let refine = |prev: f32, next: f32| {
        let denom = prev - 2.0 * v + next;
        if denom.abs() < 1e-12 {
            0.0
        } else {
            (0.5 * (prev - next) / denom).clamp(-0.5, 0.5)
        }
    };
    (
        refine(dog[[y, x - 1]], dog[[y, x + 1]]),
        refine(dog[[y - 1, x]], dog[[y + 1, x]]),
    )
}

/// Central-difference gradient (magnitude, angle) at an integer position.
pub fn gradient(plane: &Plane, x: isize, y: isize) -> (f32, f32) {
    let (height, width) = plane.dim();
    let at = |xx: isize, yy: isize| {
        plane[[
            yy.clamp(0, height as isize - 1) as usize,
            xx.clamp(0, width as isize - 1) as usize,
        ]]
    };
    let gx = at(x + 1, y) - at(x - 1, y);
    let gy = at(x, y + 1) - at(x, y - 1);
    ((gx * gx + gy * gy).sqrt(), gy.atan2(gx))
}

fn dominant_orientation(gaussian: &Plane, x: f32, y: f32, sigma: f32) -> f32 {
    let weight_sigma = 1.5 * sigma;
    let radius = (3.0 * weight_sigma).round() as isize;
    let cx = x.round() as isize;
    let cy = y.round() as isize;

    let mut histogram = [0.0f32; ORIENTATION_BINS];
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let (magnitude, angle) = gradient(gaussian, cx + dx, cy + dy);
            let weight = (-((dx * dx + dy * dy) as f32) / (2.0 * weight_sigma * weight_sigma)).exp();
            let bin = ((angle + PI) / (2.0 * PI) * ORIENTATION_BINS as f32) as usize % ORIENTATION_BINS;
            histogram[bin] += weight * magnitude;
        }
    }

    // Two passes of circular box smoothing
    for _ in 0..2 {
        let previous = histogram;
        for i in 0..ORIENTATION_BINS {
            let left = previous[(i + ORIENTATION_BINS - 1) % ORIENTATION_BINS];
            let right = previous[(i + 1) % ORIENTATION_BINS];
            histogram[i] = (left + previous[i] + right) / 3.0;
        }
    }

    let (peak, _) = histogram
        .iter()
        .enumerate()
        .fold((0usize, f32::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best });
    let left = histogram[(peak + ORIENTATION_BINS - 1) % ORIENTATION_BINS];
    let right = histogram[(peak + 1) % ORIENTATION_BINS];
    let denom = left - 2.0 * histogram[peak] + right;
    let offset = if denom.abs() < 1e-12 {
        0.0
    } else {
        0.5 * (left - right) / denom
    };

    (peak as f32 + 0.5 + offset) / ORIENTATION_BINS as f32 * 2.0 * PI - PI
}
