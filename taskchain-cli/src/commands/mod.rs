pub mod blur;
pub mod cleanup;
pub mod config;
