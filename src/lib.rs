pub mod algorithms;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod utils;

pub use algorithms::*;
pub use config::*;
pub use data::*;
pub use error::RegistrationError;
pub use pipeline::*;
