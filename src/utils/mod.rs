pub mod affine;
pub mod image_conversion;
pub mod ransac;

pub use affine::*;
pub use image_conversion::*;
pub use ransac::*;
