pub mod block_matching;
pub mod features;
pub mod mops;
#[cfg(feature = "opencv")]
pub mod opencv_sift;
pub mod scale_space;
pub mod sift;
pub mod traits;
pub mod types;

pub use block_matching::*;
pub use mops::*;
#[cfg(feature = "opencv")]
pub use opencv_sift::*;
pub use sift::*;
pub use traits::*;
pub use types::*;
