//! Core types: errors, configuration, targets, cancellation, collaborator seams.

pub mod collaborators;
pub mod config;
pub mod errors;
pub mod signals;
pub mod target;
