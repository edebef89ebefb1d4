use thiserror::Error;

/// Failure to decode a console line that carried a recognised marker.
///
/// Decode errors are always local to one line: the line is dropped and the
/// session accumulator is left exactly as it was.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The marker phrase was present but the rest of the line did not follow
    /// the expected `key=value` layout.
    #[error("malformed {field} line: {line}")]
    Malformed { field: &'static str, line: String },

    /// A numeric field held something other than an integer that fits.
    #[error("invalid number for {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    /// Epoch seconds that chrono cannot represent.
    #[error("timestamp out of range: {0}")]
    TimestampOutOfRange(u64),

    /// Converted coordinate outside [-90, 90] / [-180, 180].
    #[error("{field} out of range: {value}")]
    CoordinateOutOfRange { field: &'static str, value: f64 },
}

/// Errors raised by a line transport (serial port, replay file).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("read error on {port}: {source}")]
    Read {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no serial ports available")]
    NoPorts,

    /// Serial support was not compiled in.
    #[error("serial support not available in this build")]
    Unsupported,
}

/// Errors from the track/route file store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Requested track or route file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Node id cannot be used as a file name.
    #[error("invalid node id: {0}")]
    InvalidId(#[from] crate::validation::NodeIdError),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("json error in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn json(path: &std::path::Path, source: serde_json::Error) -> Self {
        StorageError::Json {
            path: path.display().to_string(),
            source,
        }
    }
}
