//! Configuration for relkeep.
//!
//! [`GlobalConfig`] is the parsed configuration file: engine tuning in
//! [`EngineConfig`] and one [`ApplicationSpec`] per tracked application.

mod application;
mod global;

pub use application::{
    ApplicationSpec, ChecksumAlgorithm, ChecksumPolicy, RotationPolicy, SourceKind,
};
pub use global::{EngineConfig, GlobalConfig};
