use crate::algorithms::{BlockMatchingParams, CorrespondenceProvider, Correspondences};
use crate::utils::{rescale_plane, AffineModel, Plane, Point2, TransformClass};

/// Full-resolution refinement window around the coarse displacement
const REFINE_RADIUS: isize = 2;

/// Grid block matching by normalized cross-correlation.
///
/// Blocks centred on a regular reference grid are searched for in the target, first on a
/// reduced level and then refined at full resolution. Matches whose displacement
/// disagrees with an affine model fitted to their neighbourhood are removed.
#[derive(Debug, Default, Clone)]
pub struct BlockMatchingCorrespondences;

impl BlockMatchingCorrespondences {
    pub fn new() -> Self {
        Self
    }
}

impl CorrespondenceProvider<BlockMatchingParams> for BlockMatchingCorrespondences {
    fn name(&self) -> &str {
        "block-matching"
    }

    fn extract(
        &self,
        reference: &Plane,
        target: &Plane,
        params: &BlockMatchingParams,
    ) -> anyhow::Result<Correspondences> {
        if params.layer_scale <= 0.0 || params.layer_scale > 1.0 {
            anyhow::bail!("layer scale must be in (0, 1], got {}", params.layer_scale);
        }
        if params.grid_spacing == 0 || params.block_radius == 0 {
            anyhow::bail!("grid spacing and block radius must be positive");
        }

        let matches = match_grid(reference, target, params);
        tracing::debug!(raw_matches = matches.len(), "Block matching completed");

        let matches = if params.use_local_smoothness_filter {
            smoothness_filter(matches, params)
        } else {
            matches
        };

        if matches.len() < TransformClass::Affine.min_points() {
            return Ok(Correspondences::empty());
        }
        let (from, to) = matches.into_iter().unzip();
        Ok(Correspondences::new(from, to))
    }
}

fn match_grid(
    reference: &Plane,
    target: &Plane,
    params: &BlockMatchingParams,
) -> Vec<(Point2, Point2)> {
    let scale = params.layer_scale;
    let coarse_reference = rescale_plane(reference, scale);
    let coarse_target = rescale_plane(target, scale);
    let coarse_block = ((params.block_radius as f32 * scale).round() as isize).max(1);
    let coarse_search = (params.search_radius as f32 * scale).round() as isize;
    let block = params.block_radius as isize;

    let (height, width) = reference.dim();
    let mut matches = Vec::new();

    let spacing = params.grid_spacing;
    let mut gy = spacing / 2;
    while gy < height {
        let mut gx = spacing / 2;
        while gx < width {
            let p = (gx as isize, gy as isize);
            gx += spacing;

            if !block_inside(reference, p, block) {
                continue;
            }
            let pc = (
                (p.0 as f32 * scale).round() as isize,
                (p.1 as f32 * scale).round() as isize,
            );
            let Some(coarse_stats) = block_stats(&coarse_reference, pc, coarse_block) else {
                continue;
            };
            if coarse_stats.std_dev < params.min_block_std {
                continue;
            }

            let Some((coarse_offset, coarse_r)) = best_offset(
                &coarse_reference,
                &coarse_target,
                pc,
                coarse_block,
                (0, 0),
                coarse_search,
            ) else {
                continue;
            };
            if coarse_r < params.min_correlation {
                continue;
            }

            let guess = (
                (coarse_offset.0 as f32 / scale).round() as isize,
                (coarse_offset.1 as f32 / scale).round() as isize,
            );
            let refine = REFINE_RADIUS + (1.0 / scale).ceil() as isize;
            let Some((offset, r)) = best_offset(reference, target, p, block, guess, refine) else {
                continue;
            };
            if r < params.min_correlation {
                continue;
            }

            let (sx, sy) = subpixel_peak(reference, target, p, block, offset, r);
            matches.push((
                Point2::new(p.0 as f64, p.1 as f64),
                Point2::new(
                    (p.0 + offset.0) as f64 + sx,
                    (p.1 + offset.1) as f64 + sy,
                ),
            ));
        }
        gy += spacing;
    }

    matches
}

struct BlockStats {
    mean: f32,
    std_dev: f32,
}

fn block_inside(plane: &Plane, center: (isize, isize), radius: isize) -> bool {
    let (height, width) = plane.dim();
    center.0 - radius >= 0
        && center.1 - radius >= 0
        && center.0 + radius < width as isize
        && center.1 + radius < height as isize
}

fn block_stats(plane: &Plane, center: (isize, isize), radius: isize) -> Option<BlockStats> {
    if !block_inside(plane, center, radius) {
        return None;
    }
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in center.1 - radius..=center.1 + radius {
        for x in center.0 - radius..=center.0 + radius {
            let v = plane[[y as usize, x as usize]] as f64;
            sum += v;
            sum_sq += v * v;
        }
    }
    let n = ((2 * radius + 1) * (2 * radius + 1)) as f64;
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    Some(BlockStats {
        mean: mean as f32,
        std_dev: variance.sqrt() as f32,
    })
}

/// Normalized cross-correlation of the reference block at `p` with the target block at `p + d`
fn ncc(reference: &Plane, target: &Plane, p: (isize, isize), d: (isize, isize), radius: isize) -> Option<f32> {
    let q = (p.0 + d.0, p.1 + d.1);
    let a = block_stats(reference, p, radius)?;
    let b = block_stats(target, q, radius)?;
    if a.std_dev < 1e-6 || b.std_dev < 1e-6 {
        return None;
    }
    let mut cross = 0.0f64;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let va = reference[[(p.1 + dy) as usize, (p.0 + dx) as usize]] - a.mean;
            let vb = target[[(q.1 + dy) as usize, (q.0 + dx) as usize]] - b.mean;
            cross += (va * vb) as f64;
        }
    }
    let n = ((2 * radius + 1) * (2 * radius + 1)) as f64;
    Some((cross / (n * a.std_dev as f64 * b.std_dev as f64)) as f32)
}

fn best_offset(
    reference: &Plane,
    target: &Plane,
    p: (isize, isize),
    radius: isize,
    center: (isize, isize),
    search: isize,
) -> Option<((isize, isize), f32)> {
    let mut best: Option<((isize, isize), f32)> = None;
    for dy in center.1 - search..=center.1 + search {
        for dx in center.0 - search..=center.0 + search {
            if let Some(r) = ncc(reference, target, p, (dx, dy), radius) {
                if best.map_or(true, |(_, br)| r > br) {
                    best = Some(((dx, dy), r));
                }
            }
        }
    }
    best
}

fn subpixel_peak(
    reference: &Plane,
    target: &Plane,
    p: (isize, isize),
    radius: isize,
    d: (isize, isize),
    peak: f32,
) -> (f64, f64) {
    let refine = |prev: Option<f32>, next: Option<f32>| match (prev, next) {
        (Some(prev), Some(next)) => {
            let denom = prev - 2.0 * peak + next;
            if denom.abs() < 1e-9 {
                0.0
            } else {
                (0.5 * (prev - next) / denom).clamp(-0.5, 0.5) as f64
            }
        }
        _ => 0.0,
    };
    (
        refine(
            ncc(reference, target, p, (d.0 - 1, d.1), radius),
            ncc(reference, target, p, (d.0 + 1, d.1), radius),
        ),
        refine(
            ncc(reference, target, p, (d.0, d.1 - 1), radius),
            ncc(reference, target, p, (d.0, d.1 + 1), radius),
        ),
    )
}

/// Iteratively drop matches that disagree with an affine model of their neighbourhood.
fn smoothness_filter(
    mut matches: Vec<(Point2, Point2)>,
    params: &BlockMatchingParams,
) -> Vec<(Point2, Point2)> {
    let two_sigma_sq = 2.0 * params.local_region_sigma * params.local_region_sigma;

    loop {
        if matches.len() <= TransformClass::Affine.min_points() {
            return matches;
        }

        let residuals: Vec<f64> = (0..matches.len())
            .map(|i| {
                let (p, q) = matches[i];
                let mut from = Vec::with_capacity(matches.len() - 1);
                let mut to = Vec::with_capacity(matches.len() - 1);
                let mut weights = Vec::with_capacity(matches.len() - 1);
                for (j, (pj, qj)) in matches.iter().enumerate() {
                    if j == i {
                        continue;
                    }
                    from.push(*pj);
                    to.push(*qj);
                    weights.push((-(p.distance(pj).powi(2)) / two_sigma_sq).exp().max(1e-9));
                }
                match AffineModel::fit_weighted(TransformClass::Affine, &from, &to, &weights) {
                    Some(model) => model.residual(&p, &q),
                    None => {
                        // Collinear neighbourhood, compare against the mean displacement
                        AffineModel::fit_weighted(TransformClass::Translation, &from, &to, &weights)
                            .map_or(f64::MAX, |model| model.residual(&p, &q))
                    }
                }
            })
            .collect();

        let mean = residuals.iter().sum::<f64>() / residuals.len() as f64;
        let trust_limit = (params.max_local_trust * mean).max(1.0);
        let before = matches.len();
        let mut kept = Vec::with_capacity(before);
        for (m, &r) in matches.into_iter().zip(&residuals) {
            if r <= params.max_local_epsilon && r <= trust_limit {
                kept.push(m);
            }
        }
        matches = kept;

        if matches.len() == before {
            return matches;
        }
    }
}
