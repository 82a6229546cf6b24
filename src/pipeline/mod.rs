pub mod cancel;
pub mod landmarks;
pub mod matcher;
pub mod registration;
pub mod session;
pub mod stack;

pub use cancel::*;
pub use landmarks::*;
pub use matcher::*;
pub use registration::*;
pub use session::*;
pub use stack::*;
