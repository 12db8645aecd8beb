pub mod config;
pub(crate) mod dropout;
pub mod error;
pub(crate) mod kind;
pub mod resources;

pub use config::Config;
