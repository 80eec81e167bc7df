use std::borrow::Cow;
use std::fmt::{self, Display, Formatter};
use std::ops::Deref;

#[cfg(feature = "backtrace")]
use std::backtrace::Backtrace;

pub type BppResult<T> = Result<T, BppError>;

/// Coarse classification of an error, independent of its message.
///
/// Mirrors the error taxonomy in the design notes: syntax errors (Newick,
/// constraint file, PHYLIP) are fatal with provenance; semantic validation
/// errors likewise; numerical errors come from the eigensolver; resource
/// errors come from fixed-capacity containers (the hash index, the 256-state
/// tip alphabet).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    Syntax,
    Semantic,
    Numerical,
    Resource,
    Multiple,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrString(Cow<'static, str>);

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
        write!(f, "{}", self.0)
    }
}

impl<T: Into<Cow<'static, str>>> From<T> for ErrString {
    fn from(v: T) -> Self {
        Self(v.into())
    }
}

/// Provenance for a syntax or semantic error: which file and which 1-based
/// line the offending record came from. `line` is `None` for errors that are
/// not line-addressable (e.g. a Newick string passed in directly).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub file: Option<ErrString>,
    pub line: Option<u64>,
}

impl Provenance {
    pub fn none() -> Self {
        Provenance {
            file: None,
            line: None,
        }
    }

    pub fn at_line(file: impl Into<ErrString>, line: u64) -> Self {
        Provenance {
            file: Some(file.into()),
            line: Some(line),
        }
    }
}

impl Display for Provenance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line}"),
            (Some(file), None) => write!(f, "{file}"),
            (None, Some(line)) => write!(f, "line {line}"),
            (None, None) => Ok(()),
        }
    }
}

#[derive(Debug)]
pub enum BppError {
    /// Input-syntax errors: malformed Newick, malformed constraint records,
    /// malformed mapping lines. No recovery; always carries provenance.
    Syntax {
        message: ErrString,
        at: Provenance,
    },
    /// Semantic validation errors: undefined alias, duplicate taxon, invalid
    /// outgroup split, conflicting constraints, label absent from the
    /// species tree, outgroup at least as large as the tip set.
    Semantic {
        message: ErrString,
        at: Provenance,
    },
    /// Numerical errors from the substitution kernel: QL non-convergence
    /// after the iteration cap, a non-finite eigenvalue.
    Numerical {
        message: ErrString,
    },
    /// Resource errors: fixed-capacity container overflow (hash index,
    /// 256-entry tip alphabet), allocation failure.
    Resource {
        message: ErrString,
    },

    Multiple(MultiDisplay),

    Context {
        context: ErrorContext,
        source: Box<BppError>,
        #[cfg(feature = "backtrace")]
        backtrace: Backtrace,
    },
}

impl BppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Syntax { .. } => ErrorCode::Syntax,
            Self::Semantic { .. } => ErrorCode::Semantic,
            Self::Numerical { .. } => ErrorCode::Numerical,
            Self::Resource { .. } => ErrorCode::Resource,
            Self::Multiple(_) => ErrorCode::Multiple,
            Self::Context { .. } => ErrorCode::Context,
        }
    }

    pub fn syntax(at: Provenance, message: impl Into<ErrString>) -> Self {
        BppError::Syntax {
            message: message.into(),
            at,
        }
    }

    pub fn semantic(at: Provenance, message: impl Into<ErrString>) -> Self {
        BppError::Semantic {
            message: message.into(),
            at,
        }
    }

    pub fn numerical(message: impl Into<ErrString>) -> Self {
        BppError::Numerical {
            message: message.into(),
        }
    }

    pub fn resource(message: impl Into<ErrString>) -> Self {
        BppError::Resource {
            message: message.into(),
        }
    }

    pub fn with_context(self, msg: impl Into<String>) -> Self {
        BppError::Context {
            context: ErrorContext::new(msg),
            source: Box::new(self),
            #[cfg(feature = "backtrace")]
            backtrace: Backtrace::capture(),
        }
    }
}

impl Display for BppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax { message, at } if at.file.is_some() || at.line.is_some() => {
                write!(f, "syntax error at {at}: {message}")
            }
            Self::Syntax { message, .. } => write!(f, "syntax error: {message}"),
            Self::Semantic { message, at } if at.file.is_some() || at.line.is_some() => {
                write!(f, "invalid input at {at}: {message}")
            }
            Self::Semantic { message, .. } => write!(f, "invalid input: {message}"),
            Self::Numerical { message } => write!(f, "numerical error: {message}"),
            Self::Resource { message } => write!(f, "resource error: {message}"),
            Self::Multiple(m) => write!(f, "multiple errors:\n{m}"),
            Self::Context {
                context, source, ..
            } => write!(f, "{context}\nCaused by: {source}"),
        }
    }
}

impl std::error::Error for BppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Context { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ErrorContext {
    message: String,
}

impl ErrorContext {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl Display for ErrorContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ErrorContext {}

#[derive(Debug)]
pub struct MultiDisplay(Vec<BppError>);

impl Display for MultiDisplay {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "[{i}] {e} (code: {:?})", e.code())?;
        }
        Ok(())
    }
}

impl From<Vec<BppError>> for MultiDisplay {
    fn from(v: Vec<BppError>) -> Self {
        Self(v)
    }
}

pub trait ResultExt<T> {
    fn context(self, msg: impl Into<String>) -> BppResult<T>;
    fn with_context<F: FnOnce() -> String>(self, f: F) -> BppResult<T>;
}

impl<T, E: Into<BppError>> ResultExt<T> for Result<T, E> {
    fn context(self, msg: impl Into<String>) -> BppResult<T> {
        self.map_err(|e| e.into().with_context(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> BppResult<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

#[doc(hidden)]
pub mod __private {
    #[inline]
    #[cold]
    #[must_use]
    pub fn must_use<E>(e: E) -> E {
        e
    }
}

/// Build a [`BppError`] of a given variant, `format!`-style.
///
/// ```
/// use bpp_error::{bpp_err, BppError};
/// let e: BppError = bpp_err!(Numerical: "QL did not converge after {} sweeps", 30);
/// assert!(matches!(e, BppError::Numerical { .. }));
/// ```
#[macro_export]
macro_rules! bpp_err {
    (Numerical: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::__private::must_use($crate::BppError::numerical(format!($fmt, $($arg),*)))
    };
    (Resource: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::__private::must_use($crate::BppError::resource(format!($fmt, $($arg),*)))
    };
    (Semantic at $at:expr; $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::__private::must_use($crate::BppError::semantic($at, format!($fmt, $($arg),*)))
    };
    (Syntax at $at:expr; $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::__private::must_use($crate::BppError::syntax($at, format!($fmt, $($arg),*)))
    };
}

#[macro_export]
macro_rules! bpp_bail {
    ($($tt:tt)+) => { return Err($crate::bpp_err!($($tt)+)) };
}

#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($tt:tt)+) => {
        if !$cond { $crate::bpp_bail!($($tt)+); }
    };
}
