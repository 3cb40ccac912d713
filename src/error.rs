//! Wire-format and schema processing errors.

use std::borrow::Cow;
use std::error;
use std::fmt;

/// Machine-readable classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    /// A fallible buffer reservation failed.
    OutOfMemory,
    /// A varint ran past its 10-byte maximum, or past end of input.
    UnterminatedVarint,
    /// A field's wire type does not match its declared type.
    BadWireType,
    /// The submessage/group stack exceeded the configured depth limit.
    NestingOverflow,
    /// A length-delimited region extends beyond its enclosing message.
    SubmessageExceedsParent,
    /// An END_GROUP tag did not match the group being terminated.
    GroupMismatch,
    /// Input ended in the middle of a value or an open submessage.
    PrematureEof,
    /// A field references a type name absent from the symbol table.
    BadReference,
    /// Two descriptors share a fully-qualified name.
    DuplicateSymbol,
    /// A descriptor set failed structural validation.
    MalformedDescriptor,
}

impl ErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            ErrorCode::OutOfMemory => "out of memory",
            ErrorCode::UnterminatedVarint => "unterminated varint",
            ErrorCode::BadWireType => "bad wire type",
            ErrorCode::NestingOverflow => "nesting overflow",
            ErrorCode::SubmessageExceedsParent => "submessage exceeds parent",
            ErrorCode::GroupMismatch => "group mismatch",
            ErrorCode::PrematureEof => "premature end of input",
            ErrorCode::BadReference => "bad type reference",
            ErrorCode::DuplicateSymbol => "duplicate symbol",
            ErrorCode::MalformedDescriptor => "malformed descriptor",
        }
    }
}

/// An error raised while decoding or encoding wire data, or while loading
/// a descriptor set.
///
/// The description should be considered 'best effort': in general it is not
/// possible to exactly pinpoint why data is malformed.
#[derive(Clone, PartialEq, Eq)]
pub struct Error {
    inner: Box<Inner>,
}

#[derive(Clone, PartialEq, Eq)]
struct Inner {
    code: ErrorCode,
    description: Cow<'static, str>,
}

impl Error {
    #[cold]
    pub(crate) fn new(code: ErrorCode, description: impl Into<Cow<'static, str>>) -> Error {
        Error {
            inner: Box::new(Inner {
                code,
                description: description.into(),
            }),
        }
    }

    /// The machine-readable error classification.
    pub fn code(&self) -> ErrorCode {
        self.inner.code
    }

    /// A human-readable description of the failure.
    pub fn description(&self) -> &str {
        &self.inner.description
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("code", &self.inner.code)
            .field("description", &self.inner.description)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.inner.code.as_str(), self.inner.description)
    }
}

impl error::Error for Error {}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
