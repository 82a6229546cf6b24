use image::{ImageBuffer, Luma};
use ndarray::Array2;

/// 16-bit single-channel image, the pixel container used for all channels
pub type Gray16Image = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Floating point intensity plane indexed `[[y, x]]`, values in `[0, 1]`
pub type Plane = Array2<f32>;

/// Convert a 16-bit image to a plane, stretching its own min..max range to `[0, 1]`.
///
/// A constant image maps to an all-zero plane.
pub fn gray16_to_plane(image: &Gray16Image) -> Plane {
    let (width, height) = image.dimensions();
    let raw = image.as_raw();

    let (min, max) = raw
        .iter()
        .fold((u16::MAX, u16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max.saturating_sub(min) as f32;

    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        if range == 0.0 {
            0.0
        } else {
            (raw[y * width as usize + x] - min) as f32 / range
        }
    })
}

/// Bilinear sample with clamping to the plane border.
pub fn sample_bilinear(plane: &Plane, x: f32, y: f32) -> f32 {
    let (height, width) = plane.dim();
    if width == 0 || height == 0 {
        return 0.0;
    }
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    plane[[y0, x0]] * (1.0 - fx) * (1.0 - fy)
        + plane[[y0, x1]] * fx * (1.0 - fy)
        + plane[[y1, x0]] * (1.0 - fx) * fy
        + plane[[y1, x1]] * fx * fy
}

/// Separable Gaussian blur with clamped borders.
pub fn gaussian_blur(plane: &Plane, sigma: f32) -> Plane {
    if sigma <= 0.0 {
        return plane.clone();
    }
    let radius = (3.0 * sigma).ceil() as isize;
    let kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-(i * i) as f32 / (2.0 * sigma * sigma)).exp())
        .collect();
    let norm: f32 = kernel.iter().sum();
    let kernel: Vec<f32> = kernel.iter().map(|k| k / norm).collect();

    let (height, width) = plane.dim();
    let clamp = |v: isize, len: usize| v.clamp(0, len as isize - 1) as usize;

    let mut horizontal = Array2::<f32>::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = clamp(x as isize + k as isize - radius, width);
                acc += weight * plane[[y, sx]];
            }
            horizontal[[y, x]] = acc;
        }
    }

    let mut blurred = Array2::<f32>::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = clamp(y as isize + k as isize - radius, height);
                acc += weight * horizontal[[sy, x]];
            }
            blurred[[y, x]] = acc;
        }
    }
    blurred
}

/// Resample a plane by `scale` (0.5 halves each dimension), low-pass filtering first
/// when shrinking.
pub fn rescale_plane(plane: &Plane, scale: f32) -> Plane {
    if (scale - 1.0).abs() < f32::EPSILON {
        return plane.clone();
    }
    let (height, width) = plane.dim();
    let new_width = ((width as f32 * scale).round() as usize).max(1);
    let new_height = ((height as f32 * scale).round() as usize).max(1);

    let source = if scale < 1.0 {
        gaussian_blur(plane, 0.5 * (1.0 / (scale * scale) - 1.0).sqrt())
    } else {
        plane.clone()
    };

    Array2::from_shape_fn((new_height, new_width), |(y, x)| {
        let sx = (x as f32 + 0.5) / scale - 0.5;
        let sy = (y as f32 + 0.5) / scale - 0.5;
        sample_bilinear(&source, sx, sy)
    })
}

#[cfg(feature = "opencv")]
pub use self::opencv_bridge::plane_to_mat;

#[cfg(feature = "opencv")]
mod opencv_bridge {
    use super::Plane;
    use opencv::core::Mat;
    use opencv::prelude::*;

    /// Convert a plane to an 8-bit OpenCV Mat
    pub fn plane_to_mat(plane: &Plane) -> anyhow::Result<Mat> {
        let (height, width) = plane.dim();
        let mut mat = Mat::zeros(height as i32, width as i32, opencv::core::CV_8UC1)?.to_mat()?;

        for y in 0..height {
            for x in 0..width {
                let value = (plane[[y, x]].clamp(0.0, 1.0) * 255.0).round() as u8;
                *mat.at_2d_mut::<u8>(y as i32, x as i32)? = value;
            }
        }

        Ok(mat)
    }
}
