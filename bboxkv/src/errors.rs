use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

/// Error kinds for storage engine operations.
///
/// Each kind names a category of failure so callers can decide how to react:
/// an `IntegrityError` is fatal to one file only, an `IOError` aborts the
/// current operation, a `ParseError` rejects one file name.
///
/// # Examples
///
/// ```rust
/// use bboxkv::errors::{StorageError, ErrorKind, StorageResult};
///
/// fn open_table() -> StorageResult<()> {
///     Err(StorageError::new("missing magic bytes", ErrorKind::IntegrityError))
/// }
/// assert!(open_table().is_err());
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    /// A file does not start with the expected magic signature
    IntegrityError,
    /// A file name does not encode a valid sequence number
    ParseError,
    /// Generic IO error
    IOError,
    /// The file was not found
    FileNotFound,
    /// Error encoding or decoding a record
    EncodingError,
    /// Invalid argument or invalid data handed to the engine
    ValidationError,
    /// The operation is not valid in the current state
    InvalidOperation,
    /// The requested table or generation is unknown
    NotFound,
    /// Error raised by an extension module (e.g. the spatial index)
    Extension(String),
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::IntegrityError => write!(f, "Integrity error"),
            ErrorKind::ParseError => write!(f, "Parse error"),
            ErrorKind::IOError => write!(f, "IO error"),
            ErrorKind::FileNotFound => write!(f, "File not found"),
            ErrorKind::EncodingError => write!(f, "Encoding error"),
            ErrorKind::ValidationError => write!(f, "Validation error"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::Extension(name) => write!(f, "{} error", name),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Storage engine error type.
///
/// `StorageError` carries a message, a kind and an optional cause, so errors
/// raised deep inside the codec can be wrapped by the reader or compactor
/// without losing the original failure.
#[derive(Clone)]
pub struct StorageError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<StorageError>>,
    backtrace: Backtrace,
}

impl StorageError {
    /// Creates a new `StorageError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        StorageError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: Backtrace::new_unresolved(),
        }
    }

    /// Creates a new `StorageError` wrapping a cause error.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: StorageError) -> Self {
        StorageError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: Backtrace::new_unresolved(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&StorageError> {
        self.cause.as_deref()
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => {
                let mut backtrace = self.backtrace.clone();
                backtrace.resolve();
                write!(f, "{}\n{:?}", self.message, backtrace)
            }
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for storage engine operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        let error_kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            _ => ErrorKind::IOError,
        };
        StorageError::new(&format!("IO error: {}", err), error_kind)
    }
}

impl From<std::string::FromUtf8Error> for StorageError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        StorageError::new(&format!("Invalid UTF-8 data: {}", err), ErrorKind::EncodingError)
    }
}

impl From<std::num::ParseIntError> for StorageError {
    fn from(err: std::num::ParseIntError) -> Self {
        StorageError::new(&format!("Invalid number: {}", err), ErrorKind::ParseError)
    }
}

impl From<bincode::error::EncodeError> for StorageError {
    fn from(err: bincode::error::EncodeError) -> Self {
        StorageError::new(&format!("Encoding failed: {}", err), ErrorKind::EncodingError)
    }
}

impl From<bincode::error::DecodeError> for StorageError {
    fn from(err: bincode::error::DecodeError) -> Self {
        StorageError::new(&format!("Decoding failed: {}", err), ErrorKind::EncodingError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_new_error() {
        let err = StorageError::new("bad magic", ErrorKind::IntegrityError);
        assert_eq!(err.message(), "bad magic");
        assert_eq!(err.kind(), &ErrorKind::IntegrityError);
        assert!(err.cause().is_none());
    }

    #[test]
    fn test_error_with_cause() {
        let cause = StorageError::new("read failed", ErrorKind::IOError);
        let err = StorageError::new_with_cause("compaction failed", ErrorKind::IOError, cause);
        assert_eq!(err.cause().map(|c| c.message()), Some("read failed"));
        assert!(err.source().is_some());
        assert!(format!("{:?}", err).contains("Caused by: read failed"));
    }

    #[test]
    fn test_io_not_found_maps_to_file_not_found() {
        let err: StorageError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), &ErrorKind::FileNotFound);
    }

    #[test]
    fn test_io_eof_maps_to_io_error() {
        let err: StorageError = io::Error::new(io::ErrorKind::UnexpectedEof, "short").into();
        assert_eq!(err.kind(), &ErrorKind::IOError);
        assert!(err.to_string().contains("short"));
    }

    #[test]
    fn test_parse_int_maps_to_parse_error() {
        let err: StorageError = "abc".parse::<u64>().unwrap_err().into();
        assert_eq!(err.kind(), &ErrorKind::ParseError);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::IntegrityError.to_string(), "Integrity error");
        assert_eq!(ErrorKind::Extension("Spatial".into()).to_string(), "Spatial error");
    }
}
