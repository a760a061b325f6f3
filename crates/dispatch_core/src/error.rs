//! Error taxonomy for the dispatch core.
//!
//! Construction-time invariant violations are fatal and propagate to the
//! caller of setup; per-cycle transient conditions never surface here, they
//! are absorbed (and logged) inside the control loop.

use std::fmt;

use crate::ecs::RequestId;
use crate::menu::Course;

pub use crate::oracle::OracleError;

/// Itinerary (menu) invariant violated. Always a programming error upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum ItineraryError {
    /// The same course value appears twice in one menu.
    DuplicateCourse(Course),
    /// A dropoff course precedes the pickup course of the same request.
    DropoffBeforePickup(RequestId),
    /// The fast dropoff tour requires a pickup-only prefix followed by a
    /// dropoff-only suffix.
    PickupsNotFirst,
    /// Redirect courses are not allowed in this operation.
    UnexpectedRedirect,
    /// A pending course handed to the fast dropoff tour is not a dropoff.
    NotADropoff(Course),
    /// The fast dropoff tour has no placed course to measure distance from.
    MissingReference,
}

impl fmt::Display for ItineraryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItineraryError::DuplicateCourse(course) => {
                write!(f, "course {course:?} appears twice in the menu")
            }
            ItineraryError::DropoffBeforePickup(request) => {
                write!(f, "dropoff for request {request} precedes its pickup")
            }
            ItineraryError::PickupsNotFirst => {
                write!(f, "menu is not a pickup prefix followed by a dropoff suffix")
            }
            ItineraryError::UnexpectedRedirect => {
                write!(f, "redirect courses are not allowed here")
            }
            ItineraryError::NotADropoff(course) => {
                write!(f, "pending course {course:?} is not a dropoff")
            }
            ItineraryError::MissingReference => {
                write!(f, "no placed course to measure dropoff distance from")
            }
        }
    }
}

impl std::error::Error for ItineraryError {}

/// Service-area partition construction or lookup failure. Fatal at startup.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionError {
    /// A grid needs at least one row and one column.
    EmptyGrid { rows: usize, cols: usize },
    /// The bounding envelope is degenerate or outside valid coordinates.
    InvalidBounds(String),
    /// A location falls outside the partitioned footprint.
    OutOfArea { lat: f64, lng: f64 },
    /// A sampled block centroid did not resolve back to its own block.
    Inconsistent { block: usize },
}

impl fmt::Display for PartitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionError::EmptyGrid { rows, cols } => {
                write!(f, "partition grid {rows}x{cols} is empty")
            }
            PartitionError::InvalidBounds(reason) => {
                write!(f, "invalid service area bounds: {reason}")
            }
            PartitionError::OutOfArea { lat, lng } => {
                write!(f, "location ({lat}, {lng}) is outside the service area")
            }
            PartitionError::Inconsistent { block } => {
                write!(f, "block {block} centroid does not resolve to its own block")
            }
        }
    }
}

impl std::error::Error for PartitionError {}

/// Malformed cost matrix handed to the exact matcher. Fail fast.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentError {
    /// Costs must be finite and non-negative.
    InvalidCost { row: usize, col: usize, cost: f64 },
}

impl fmt::Display for AssignmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentError::InvalidCost { row, col, cost } => {
                write!(f, "cost matrix entry ({row}, {col}) = {cost} is not a finite non-negative number")
            }
        }
    }
}

impl std::error::Error for AssignmentError {}
