//! Error types for the spatial index and the simulator
//!
//! Every variant is a broken contract rather than a transient failure: the
//! caller passed inconsistent graph data or a misconfigured index and has to
//! fix the input before stepping again. Nothing here is retryable.

use glam::Vec3;
use thiserror::Error;

/// Errors raised by the octree and the layout simulator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    /// Removal or lookup of an element the index does not hold
    #[error("element not found in spatial index: {0}")]
    ElementNotFound(String),

    /// A structural rule of the octree was violated
    #[error("invalid octree topology: {0}")]
    InvalidTopology(String),

    /// Element position falls outside the root extent (or is not finite)
    #[error("position {position} lies outside the index bounds {min}..{max}")]
    OutOfBounds {
        /// Offending position
        position: Vec3,
        /// Minimum corner of the root box
        min: Vec3,
        /// Maximum corner of the root box
        max: Vec3,
    },

    /// Insertion of a key that is already indexed
    #[error("element already present in spatial index: {0}")]
    DuplicateElement(String),

    /// Element weight must be finite and strictly positive
    #[error("invalid weight {0}: weights must be finite and positive")]
    InvalidWeight(f32),

    /// A configuration knob is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for index and simulation operations
pub type LayoutResult<T> = Result<T, LayoutError>;
