#![feature(error_generic_member_access)]
#![deny(missing_docs)]

//! This crate defines error & result types for Tessera.
//! It also contains a variety of useful macros for error handling.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::{env, fmt, io};

/// A string that can be used as an error message.
#[derive(Debug)]
pub struct ErrString(Cow<'static, str>);

#[allow(clippy::fallible_impl_from)]
impl<T> From<T> for ErrString
where
    T: Into<Cow<'static, str>>,
{
    #[allow(clippy::panic)]
    fn from(msg: T) -> Self {
        if env::var("TESSERA_PANIC_ON_ERR").as_deref().unwrap_or("") == "1" {
            panic!("{}\nBacktrace:\n{}", msg.into(), Backtrace::capture());
        } else {
            Self(msg.into())
        }
    }
}

impl AsRef<str> for ErrString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ErrString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The top-level error type for Tessera.
///
/// The lifecycle variants (`AlreadyExists`, `NotFound`, `Mode`, `ClosedHandle`) and the
/// query variants (`MalformedQuery`, `Cancelled`) are surfaced to callers as-is, so they can
/// be matched on to decide whether an operation is worth retrying.
#[derive(thiserror::Error)]
#[non_exhaustive]
pub enum TesseraError {
    /// A malformed domain, dimension or attribute, or a name collision inside a schema.
    #[error("schema error: {0}\nBacktrace:\n{1}")]
    Schema(ErrString, Backtrace),
    /// An object already exists at the given location.
    #[error("already exists: {0}\nBacktrace:\n{1}")]
    AlreadyExists(ErrString, Backtrace),
    /// An array, field or other named object could not be found.
    #[error("not found: {0}\nBacktrace:\n{1}")]
    NotFound(ErrString, Backtrace),
    /// A handle or query was used in a mode it was not opened for.
    #[error("mode error: {0}\nBacktrace:\n{1}")]
    Mode(ErrString, Backtrace),
    /// An operation was attempted on a closed array handle.
    #[error("closed handle: {0}\nBacktrace:\n{1}")]
    ClosedHandle(ErrString, Backtrace),
    /// A query was submitted with a bad subarray, missing buffers or inconsistent cell counts.
    #[error("malformed query: {0}\nBacktrace:\n{1}")]
    MalformedQuery(ErrString, Backtrace),
    /// An invalid argument was provided.
    #[error("{0}\nBacktrace:\n{1}")]
    InvalidArgument(ErrString, Backtrace),
    /// An index is out of bounds.
    #[error("index {0} out of bounds from {1} to {2}\nBacktrace:\n{3}")]
    OutOfBounds(usize, usize, usize, Backtrace),
    /// Two types were expected to be equal but were not.
    #[error("expected type: {0} but instead got {1}\nBacktrace:\n{2}")]
    MismatchedTypes(ErrString, ErrString, Backtrace),
    /// The operation was cancelled through its context.
    #[error("cancelled: {0}\nBacktrace:\n{1}")]
    Cancelled(ErrString, Backtrace),
    /// Persisted bytes could not be decoded.
    #[error("corrupted: {0}\nBacktrace:\n{1}")]
    Corrupted(ErrString, Backtrace),
    /// An unexpected internal invariant violation.
    #[error("{0}\nBacktrace:\n{1}")]
    InvalidState(ErrString, Backtrace),
    /// A wrapper for other errors, carrying additional context.
    #[error("{0}: {1}")]
    Context(ErrString, Box<TesseraError>),
    /// A wrapper for IO errors.
    #[error(transparent)]
    IOError(#[from] io::Error),
    /// A wrapper for serde_json errors.
    #[cfg(feature = "serde")]
    #[error(transparent)]
    JSONError(#[from] serde_json::Error),
    /// A wrapper for errors from integer conversions.
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),
}

impl TesseraError {
    /// Adds additional context to an error.
    pub fn with_context<T: Into<ErrString>>(self, msg: T) -> Self {
        TesseraError::Context(msg.into(), Box::new(self))
    }

    /// Strips any [`TesseraError::Context`] wrappers, returning the underlying error.
    pub fn root(&self) -> &TesseraError {
        match self {
            TesseraError::Context(_, inner) => inner.root(),
            other => other,
        }
    }
}

impl Debug for TesseraError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// A type alias for Results that return TesseraErrors as their error type.
pub type TesseraResult<T> = Result<T, TesseraError>;

/// A trait for expect-ing a TesseraResult or an Option.
pub trait TesseraExpect {
    /// The type of the value being expected.
    type Output;

    /// Returns the value of the result if it is Ok, otherwise panics with the error.
    /// Should be called only in contexts where the error condition represents a bug
    /// (programmer error).
    fn tessera_expect(self, msg: &str) -> Self::Output;
}

impl<T, E> TesseraExpect for Result<T, E>
where
    E: Into<TesseraError>,
{
    type Output = T;

    #[inline(always)]
    fn tessera_expect(self, msg: &str) -> Self::Output {
        self.map_err(|err| err.into())
            .unwrap_or_else(|e| tessera_panic!(e.with_context(msg.to_string())))
    }
}

impl<T> TesseraExpect for Option<T> {
    type Output = T;

    #[inline(always)]
    fn tessera_expect(self, msg: &str) -> Self::Output {
        self.unwrap_or_else(|| {
            let err = TesseraError::InvalidState(msg.to_string().into(), Backtrace::capture());
            tessera_panic!(err)
        })
    }
}

/// A convenient macro for creating a TesseraError.
#[macro_export]
macro_rules! tessera_err {
    (OutOfBounds: $idx:expr, $start:expr, $stop:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::TesseraError::OutOfBounds($idx, $start, $stop, Backtrace::capture())
        )
    }};
    (MismatchedTypes: $expected:literal, $actual:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::TesseraError::MismatchedTypes(
                $expected.into(),
                $actual.to_string().into(),
                Backtrace::capture(),
            )
        )
    }};
    (MismatchedTypes: $expected:expr, $actual:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::TesseraError::MismatchedTypes(
                $expected.to_string().into(),
                $actual.to_string().into(),
                Backtrace::capture(),
            )
        )
    }};
    (Context: $msg:literal, $err:expr) => {{
        $crate::__private::must_use(
            $crate::TesseraError::Context($msg.into(), Box::new($err))
        )
    }};
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::TesseraError::$variant(format!($fmt, $($arg),*).into(), Backtrace::capture())
        )
    }};
    ($variant:ident: $err:expr $(,)?) => {
        $crate::__private::must_use(
            $crate::TesseraError::$variant($err)
        )
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::tessera_err!(InvalidArgument: $fmt, $($arg),*)
    };
}

/// A convenient macro for returning a TesseraError.
#[macro_export]
macro_rules! tessera_bail {
    ($($tt:tt)+) => {
        return Err($crate::tessera_err!($($tt)+))
    };
}

/// A convenient macro for panicking with a TesseraError in the presence of a programmer error
/// (e.g., an invariant has been violated).
#[macro_export]
macro_rules! tessera_panic {
    (OutOfBounds: $idx:expr, $start:expr, $stop:expr) => {{
        $crate::tessera_panic!($crate::tessera_err!(OutOfBounds: $idx, $start, $stop))
    }};
    (Context: $msg:literal, $err:expr) => {{
        $crate::tessera_panic!($crate::tessera_err!(Context: $msg, $err))
    }};
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::tessera_panic!($crate::tessera_err!($variant: $fmt, $($arg),*))
    };
    ($err:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        let err: $crate::TesseraError = $err;
        panic!("{}", err.with_context(format!($fmt, $($arg),*)))
    }};
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::tessera_panic!($crate::tessera_err!($fmt, $($arg),*))
    };
    ($err:expr) => {{
        let err: $crate::TesseraError = $err;
        panic!("{}", err)
    }};
}

#[doc(hidden)]
pub mod __private {
    #[doc(hidden)]
    #[inline]
    #[cold]
    #[must_use]
    pub const fn must_use(error: crate::TesseraError) -> crate::TesseraError {
        error
    }
}
