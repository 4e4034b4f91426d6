//! Nominal failure typing
//!
//! Rust errors carry no runtime class hierarchy, so retry and recovery
//! matching works on explicit [`TypeTag`]s. A failure declares its own tag
//! and the tags of every kind it "is-a" through [`FailureType::lineage`].

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::io;

/// A nominal type identifier used to classify failures and results
///
/// Tags are compared by exact string equality. Subtype relations are
/// declared by the failure itself ([`FailureType::lineage`]) or by a
/// [`TypeHierarchy`](crate::retry::TypeHierarchy).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeTag(Cow<'static, str>);

impl TypeTag {
    /// Create a tag from a static string without allocating
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Create a tag from any string
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// The tag's name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for TypeTag {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

impl From<String> for TypeTag {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Classification of a failure for retry and recovery matching
///
/// # Example
///
/// ```rust
/// use rebound_core::types::{FailureType, TypeTag};
///
/// #[derive(Debug)]
/// enum FetchError {
///     Network,
///     Validation,
/// }
///
/// impl FailureType for FetchError {
///     fn type_tag(&self) -> TypeTag {
///         match self {
///             FetchError::Network => TypeTag::from_static("NetworkError"),
///             FetchError::Validation => TypeTag::from_static("ValidationError"),
///         }
///     }
///
///     fn lineage(&self) -> Vec<TypeTag> {
///         vec![self.type_tag(), TypeTag::from_static("FetchError")]
///     }
/// }
///
/// assert!(FetchError::Network.is_a(&TypeTag::from_static("FetchError")));
/// assert!(!FetchError::Validation.is_a(&TypeTag::from_static("NetworkError")));
/// ```
pub trait FailureType {
    /// The most specific tag of this failure
    fn type_tag(&self) -> TypeTag;

    /// The tag followed by every declared supertype, most specific first
    fn lineage(&self) -> Vec<TypeTag> {
        vec![self.type_tag()]
    }

    /// Whether this failure is of the given kind or one of its subtypes
    fn is_a(&self, tag: &TypeTag) -> bool {
        self.lineage().iter().any(|t| t == tag)
    }
}

impl<T: FailureType + ?Sized> FailureType for Box<T> {
    fn type_tag(&self) -> TypeTag {
        (**self).type_tag()
    }

    fn lineage(&self) -> Vec<TypeTag> {
        (**self).lineage()
    }
}

/// Supertype tag shared by every `std::io::Error`
pub const IO_ERROR: TypeTag = TypeTag::from_static("io");

/// IO errors are tagged `io::<ErrorKind>` (e.g. `io::TimedOut`) under [`IO_ERROR`]
impl FailureType for io::Error {
    fn type_tag(&self) -> TypeTag {
        TypeTag::new(format!("io::{:?}", self.kind()))
    }

    fn lineage(&self) -> Vec<TypeTag> {
        vec![self.type_tag(), IO_ERROR]
    }
}
