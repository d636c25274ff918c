//! Platform-specific native library resolution.

mod desc;
mod resolver;

pub use desc::{LibDesc, SystemType};
pub use resolver::NativeResolver;
