pub mod catalog;
pub mod loader;
pub mod transformer;

pub use catalog::*;
pub use loader::*;
pub use transformer::*;
