#![warn(missing_docs)]
//! Error structures of the ray tracing engine
use std::{error::Error, fmt::Display};

/// Result type of all fallible operations of this crate
pub type TraceResult<T> = std::result::Result<T, TraceError>;

/// Errors that can be returned by the engine.
///
/// Per-sample optical failures (an aperture clip, total internal reflection, an aimer that did not converge)
/// are normally reported as values on the traced ray or pupil sample. The variants [`TraceError::Vignetted`],
/// [`TraceError::UnreachableStop`] and [`TraceError::NumericalFailure`] are used when such a failure has to be
/// turned into an error, e.g. when the chief ray of a field cannot be found.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum TraceError {
    /// the optical system is inconsistent (missing surfaces, contradictory stop declarations, invalid sources).
    InvalidSystem(String),
    /// the pupil aimer could not reach the requested stop point, not even with its geometric fallback.
    UnreachableStop(String),
    /// a ray was clipped by a physical aperture or suffered total internal reflection.
    Vignetted(String),
    /// the geometry is degenerate for a complete query (e.g. all rays parallel to the image plane)
    DegenerateGeometry(String),
    /// `NaN` or infinite values occured during a computation
    NumericalFailure(String),
    /// errors not falling in one of the categories above
    Other(String),
}

impl TraceError {
    /// Returns the name of the error kind without its message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSystem(_) => "InvalidSystem",
            Self::UnreachableStop(_) => "UnreachableStop",
            Self::Vignetted(_) => "Vignetted",
            Self::DegenerateGeometry(_) => "DegenerateGeometry",
            Self::NumericalFailure(_) => "NumericalFailure",
            Self::Other(_) => "Other",
        }
    }
}

impl Display for TraceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSystem(m) => {
                write!(f, "InvalidSystem:{m}")
            }
            Self::UnreachableStop(m) => {
                write!(f, "UnreachableStop:{m}")
            }
            Self::Vignetted(m) => {
                write!(f, "Vignetted:{m}")
            }
            Self::DegenerateGeometry(m) => {
                write!(f, "DegenerateGeometry:{m}")
            }
            Self::NumericalFailure(m) => {
                write!(f, "NumericalFailure:{m}")
            }
            Self::Other(m) => write!(f, "SeqTrace Error:Other:{m}"),
        }
    }
}
impl Error for TraceError {}

impl std::convert::From<String> for TraceError {
    fn from(msg: String) -> Self {
        Self::Other(msg)
    }
}
impl std::convert::From<serde_yaml::Error> for TraceError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::InvalidSystem(format!("could not parse document: {err}"))
    }
}
