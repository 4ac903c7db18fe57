//! Time-dependent parking lanes derived from OpenStreetMap data: tag parsing, condition
//! resolution, lane geometry, and the edit session that turns local changes into an upload.

pub mod collaborators;
pub mod conditions;
pub mod config;
pub mod controller;
pub mod data;
pub mod edits;
pub mod errors;
pub mod etl;
pub mod geometry;
pub mod lanes;
pub mod render_state;

pub use config::{AssemblyContext, UserConfig};
pub use controller::Controller;
pub use errors::{Error, Result};
