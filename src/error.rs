use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::panic::Location;

/// Semantic error kinds a codec can report, per the crate's error taxonomy.
///
/// These are values, not C-style sentinel return codes: every fallible
/// operation in this crate returns a `Res<T>` carrying one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Null/empty input, zero output capacity, or another argument that is
    /// nonsensical independent of the compressed bytes themselves.
    InvalidArgument,
    /// Unknown signature, unknown block marker, a randomized BZip block, or
    /// a reserved DEFLATE block type.
    UnsupportedFormat,
    /// Attempt to read past the end of the compressed input or a sub-buffer.
    Truncated,
    /// A header field violates its domain (Kraft sum, LEN/NLEN mismatch,
    /// out-of-range symbol or tree index, ...).
    MalformedBlock,
    /// An LZ back-reference points before the start of the output produced
    /// so far.
    DistanceOutOfRange,
    /// Uncompressed output would exceed the caller-supplied capacity.
    CapacityExceeded,
    /// A stored checksum did not match the one computed over the output.
    ChecksumMismatch,
    /// A fixed safety bound (BZip block size, selector count, tree count)
    /// was exceeded.
    InternalLimit,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::UnsupportedFormat => "unsupported format",
            ErrorKind::Truncated => "truncated input",
            ErrorKind::MalformedBlock => "malformed block",
            ErrorKind::DistanceOutOfRange => "distance out of range",
            ErrorKind::CapacityExceeded => "capacity exceeded",
            ErrorKind::ChecksumMismatch => "checksum mismatch",
            ErrorKind::InternalLimit => "internal limit exceeded",
        };
        f.write_str(s)
    }
}

/// A decode failure, carrying the kind of failure, an optional
/// human-readable message, the call site that raised it, and (for wrapped
/// I/O-ish failures) an underlying cause.
pub struct Error {
    pub kind: ErrorKind,
    pub message: Option<String>,
    pub context: Option<String>,
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub location: &'static Location<'static>,
}

pub type Res<T> = Result<T, Error>;

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("context", &self.context)
            .field("location", &self.location)
            .finish()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.location)?;
        if let Some(context) = &self.context {
            write!(f, " ({context})")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(source) = &self.source {
            write!(f, "\ncaused by {source}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn StdError + 'static))
    }
}

impl Error {
    #[track_caller]
    pub fn new(kind: ErrorKind) -> Self {
        Error {
            kind,
            message: None,
            context: None,
            source: None,
            location: Location::caller(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Components that can describe themselves for error context, the way the
/// teacher's codec state types describe their cursor position.
pub trait ErrorContext {
    fn describe(&self) -> Option<String> {
        None
    }

    #[track_caller]
    fn raise<T>(&self, kind: ErrorKind, msg: impl Into<String>) -> Res<T> {
        Err(Error::new(kind).with_message(msg).with_context_opt(self.describe()))
    }

    #[track_caller]
    fn assert(&self, v: bool, kind: ErrorKind, msg: &str) -> Res<()> {
        if v {
            Ok(())
        } else {
            self.raise(kind, msg.to_string())
        }
    }

    #[track_caller]
    fn assert_le<T: PartialOrd + Display>(&self, l: T, r: T, kind: ErrorKind) -> Res<()> {
        if l <= r {
            Ok(())
        } else {
            self.raise(kind, format!("expected {l} <= {r}"))
        }
    }

    #[track_caller]
    fn assert_eq<T: PartialEq + Display>(&self, l: T, r: T, kind: ErrorKind) -> Res<()> {
        if l == r {
            Ok(())
        } else {
            self.raise(kind, format!("expected {l} == {r}"))
        }
    }
}

impl Error {
    fn with_context_opt(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }
}

/// Extension trait letting call sites attach a source error and context in
/// one step, mirroring the teacher's `WithContext::at`.
pub trait WithContext<T> {
    #[track_caller]
    fn ctx<C: ErrorContext + ?Sized>(self, kind: ErrorKind, context: &C) -> Res<T>;
}

impl<T, E: StdError + 'static + Send + Sync> WithContext<T> for Result<T, E> {
    #[track_caller]
    fn ctx<C: ErrorContext + ?Sized>(self, kind: ErrorKind, context: &C) -> Res<T> {
        self.map_err(|e| {
            Error::new(kind)
                .with_context_opt(context.describe())
                .with_source(e)
        })
    }
}

impl Error {
    fn with_source(mut self, source: impl StdError + 'static + Send + Sync) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

/// Bounds-checked slice access that reports `Truncated` instead of
/// panicking, the way the teacher's `SliceErrors` trait wraps `[T]`.
pub trait CheckedSlice<T> {
    fn byte_at(&self, index: usize) -> Res<T>;
    fn range(&self, start: usize, len: usize) -> Res<&[T]>;
}

impl<T: Copy> CheckedSlice<T> for [T] {
    #[track_caller]
    fn byte_at(&self, index: usize) -> Res<T> {
        self.get(index).copied().ok_or_else(|| {
            Error::new(ErrorKind::Truncated)
                .with_message(format!("index {index} out of bounds (len {})", self.len()))
        })
    }

    #[track_caller]
    fn range(&self, start: usize, len: usize) -> Res<&[T]> {
        self.get(start..start + len).ok_or_else(|| {
            Error::new(ErrorKind::Truncated).with_message(format!(
                "range {start}..{} out of bounds (len {})",
                start + len,
                self.len()
            ))
        })
    }
}
