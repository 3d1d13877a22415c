/// Error kinds that can occur in zarchive-lib
#[derive(Debug)]
pub enum ErrorKind {
    BadFileKey(String),
    ChannelClosed,
    CorruptIndex(String),
    DuplicateHello,
    General(String),
    InvalidQuery(String),
    Io(std::io::Error),
    MissingHello,
    ParseInt(std::num::ParseIntError),
    SerdeJson(serde_json::Error),
    SessionNotFound(String),
    ShuttingDown,
    Speedy(speedy::Error),
    Timeout(tokio::time::error::Elapsed),
    Utf8(std::str::Utf8Error),
    ZgramNotFound(u64),
}

/// Errors that can occur in zarchive-lib, optionally including a file and line
/// number where they were generated
#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub file: Option<&'static str>,
    pub line: Option<u32>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ErrorKind::*;
        if let Some(file) = self.file {
            write!(f, "{file}:")?;
        }
        if let Some(line) = self.line {
            write!(f, "{line}:")?;
        }
        match &self.kind {
            BadFileKey(s) => write!(f, "Bad file key: {s}"),
            ChannelClosed => write!(f, "Channel closed"),
            CorruptIndex(s) => write!(f, "Corrupt index: {s}"),
            DuplicateHello => write!(f, "Received duplicate Hello message"),
            General(s) => write!(f, "{s}"),
            InvalidQuery(s) => write!(f, "Invalid query: {s}"),
            Io(e) => write!(f, "I/O Error: {e}"),
            MissingHello => write!(f, "First frame on a channel must be Hello"),
            ParseInt(e) => write!(f, "Bad integer: {e}"),
            SerdeJson(e) => write!(f, "SerdeJson Error: {e}"),
            SessionNotFound(guid) => write!(f, "Session not found: {guid}"),
            ShuttingDown => write!(f, "Shutting down"),
            Speedy(e) => write!(f, "Speedy: {e}"),
            Timeout(e) => write!(f, "Timeout: {e}"),
            Utf8(e) => write!(f, "UTF-8 error: {e}"),
            ZgramNotFound(id) => write!(f, "Zgram not found: {id}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(e) => Some(e),
            ErrorKind::ParseInt(e) => Some(e),
            ErrorKind::SerdeJson(e) => Some(e),
            ErrorKind::Speedy(e) => Some(e),
            ErrorKind::Timeout(e) => Some(e),
            ErrorKind::Utf8(e) => Some(e),
            _ => None,
        }
    }
}

// Note: we impl Into because our typical pattern is `.map_err(|e| (e, file!(), line!()))?`
// which uses From<(E, &'static str, u32)>, and plain `?` which uses From<E>.

impl<E> From<(E, &'static str, u32)> for Error
where
    ErrorKind: From<E>,
{
    fn from(triplet: (E, &'static str, u32)) -> Error {
        Error {
            kind: triplet.0.into(),
            file: Some(triplet.1),
            line: Some(triplet.2),
        }
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(intoek: E) -> Error {
        Error {
            kind: intoek.into(),
            file: None,
            line: None,
        }
    }
}

impl From<&str> for ErrorKind {
    fn from(s: &str) -> ErrorKind {
        ErrorKind::General(s.to_string())
    }
}

impl From<String> for ErrorKind {
    fn from(s: String) -> ErrorKind {
        ErrorKind::General(s)
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(e: std::io::Error) -> ErrorKind {
        ErrorKind::Io(e)
    }
}

impl From<std::num::ParseIntError> for ErrorKind {
    fn from(e: std::num::ParseIntError) -> ErrorKind {
        ErrorKind::ParseInt(e)
    }
}

impl From<serde_json::Error> for ErrorKind {
    fn from(e: serde_json::Error) -> ErrorKind {
        ErrorKind::SerdeJson(e)
    }
}

impl From<speedy::Error> for ErrorKind {
    fn from(e: speedy::Error) -> ErrorKind {
        ErrorKind::Speedy(e)
    }
}

impl From<tokio::time::error::Elapsed> for ErrorKind {
    fn from(e: tokio::time::error::Elapsed) -> ErrorKind {
        ErrorKind::Timeout(e)
    }
}

impl From<std::str::Utf8Error> for ErrorKind {
    fn from(e: std::str::Utf8Error) -> ErrorKind {
        ErrorKind::Utf8(e)
    }
}
