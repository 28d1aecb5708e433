use crate::frame::CoordinateFrame;
use std::fmt;
use thiserror::Error;

/// Which input record a geometry problem was found on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Unit(String),
    Facility(String),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Unit(id) => write!(f, "unit '{}'", id),
            Subject::Facility(id) => write!(f, "facility '{}'", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeometryIssue {
    pub subject: Subject,
    pub reason: String,
}

impl fmt::Display for GeometryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.reason)
    }
}

/// Errors raised by normalization and matching. None of them are transient;
/// the caller has to fix the input and rerun the join.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("invalid geometry on {} record(s), first: {}", .issues.len(), first_issue(.issues))]
    InvalidGeometry { issues: Vec<GeometryIssue> },

    #[error("coordinate frame {frame} has no registered projection")]
    UnknownFrame { frame: CoordinateFrame },

    #[error("target frame {frame} is geographic; distances need a projected frame")]
    GeographicTarget { frame: CoordinateFrame },

    #[error("frame mismatch: units are in {units}, facilities are in {facilities}")]
    FrameMismatch {
        units: CoordinateFrame,
        facilities: CoordinateFrame,
    },

    #[error("no facilities to match against; {unit_count} unit(s) left unmatched")]
    NoFacilities {
        unit_count: usize,
        unit_ids: Vec<String>,
    },

    #[error("facility id '{id}' appears more than once")]
    DuplicateFacilityId { id: String },

    #[error("invalid match options: {reason}")]
    InvalidOptions { reason: String },
}

fn first_issue(issues: &[GeometryIssue]) -> String {
    issues
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "none".to_string())
}

pub type Result<T> = std::result::Result<T, JoinError>;
