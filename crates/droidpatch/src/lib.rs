pub mod config;
pub mod error;
pub mod executor;
pub mod modules;
pub mod overrides;
pub mod requirements;
pub mod resources;
pub mod workspace;

pub use error::{Error, Result};
