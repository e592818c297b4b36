pub mod base;
pub mod logging;
pub mod source;

pub use base::*;
pub use logging::*;
pub use source::*;
