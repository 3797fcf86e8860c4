//! Version handling for upstream release tags.
//!
//! See [`comparison::VersionComparator`] for the ordering used to decide
//! whether a release is newer than what is installed.

pub mod comparison;

pub use comparison::VersionComparator;
