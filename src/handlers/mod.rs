pub mod config;
pub mod fallback;

pub use self::config::*;
pub use self::fallback::*;
