/// Error types for mesh storage and interchange.
use thiserror::Error;

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

/// Errors that can occur while building, transforming, reading or writing meshes.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Binary STL layout violation.
    #[error("STL format error: {0}")]
    Format(#[from] FormatError),

    /// ASCII STL grammar violation.
    #[error("STL parse error: {0}")]
    Parse(#[from] ParseError),

    /// An argument was absent or not a mesh.
    #[error("type mismatch: {0}")]
    TypeMismatch(#[from] TypeMismatch),

    /// Filesystem failure, propagated unchanged.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A conversion was asked to export an empty shape list.
    #[error("no shapes to export")]
    NoShapes,

    /// The tessellation service failed to produce a triangle soup.
    #[error("tessellation failed: {0}")]
    Tessellation(String),
}

impl MeshError {
    /// Whether the error is an ASCII parse failure that still allows a binary retry.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Parse(e) if e.recoverable)
    }
}

/// Binary STL layout errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The input has no bytes at all.
    #[error("empty STL stream")]
    Empty,

    /// Fewer than 84 bytes (header plus triangle count) were available.
    #[error("STL header too short: expected 84 bytes, got {got}")]
    HeaderTooShort {
        /// Bytes actually read.
        got: usize,
    },

    /// The declared triangle count exceeds the sanity bound.
    #[error("file too large, got {count} triangles which exceeds the maximum of {max}", max = crate::stl::MAX_TRIANGLES)]
    TooManyTriangles {
        /// Declared triangle count.
        count: u32,
    },

    /// The stream ended before all declared records were read.
    #[error("truncated STL: expected {expected} triangles, got {got}")]
    Truncated {
        /// Declared triangle count.
        expected: u32,
        /// Complete records read.
        got: u32,
    },
}

/// ASCII STL grammar violation.
///
/// `recoverable` is true while no triangle has been produced yet, in which
/// case the same bytes may still be read as binary STL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// Description of what was expected.
    pub message: String,
    /// 1-based line number where the violation was found. At end of input
    /// this is the last line read, or 0 for empty input.
    pub line: usize,
    /// Whether a binary reinterpretation is still allowed.
    pub recoverable: bool,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, line: usize, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            line,
            recoverable,
        }
    }
}

/// Argument kind mismatches for dynamically typed entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeMismatch {
    /// No value was supplied.
    #[error("another mesh instance is required")]
    MissingArgument,

    /// A value was supplied but it is not a mesh.
    #[error("expected a mesh, got {found}")]
    WrongType {
        /// Description of the value that was supplied.
        found: &'static str,
    },
}
