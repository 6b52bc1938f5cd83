//! Dynamic constructor arguments for block creation.
//!
//! `create_block` carries an open-ended argument list to the plugin's
//! builder service. Services declare the signatures they accept and the
//! registry matches arity first, then element-wise assignability.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamically-typed constructor argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CtorArg {
    /// A string argument.
    Str(String),
    /// A signed integer argument.
    Int(i64),
    /// A floating-point argument.
    Float(f64),
    /// A boolean argument.
    Bool(bool),
}

impl CtorArg {
    /// Create a string argument.
    pub fn str(v: impl Into<String>) -> Self {
        Self::Str(v.into())
    }

    /// The parameter kind this argument naturally is.
    #[must_use]
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::Str(_) => ParamKind::Str,
            Self::Int(_) => ParamKind::Int,
            Self::Float(_) => ParamKind::Float,
            Self::Bool(_) => ParamKind::Bool,
        }
    }

    /// View as a string, if the argument is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// View as an integer, if the argument is one.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// View as a float, accepting an integer argument (numeric coercion).
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// View as a boolean, if the argument is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for CtorArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for CtorArg {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for CtorArg {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for CtorArg {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for CtorArg {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for CtorArg {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// The declared kind of a constructor parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// Accepts a string argument.
    Str,
    /// Accepts an integer argument.
    Int,
    /// Accepts a float argument; an integer argument coerces.
    Float,
    /// Accepts a boolean argument.
    Bool,
}

impl ParamKind {
    /// Whether an argument satisfies this parameter.
    ///
    /// Exact kind matches always do; an `Int` argument additionally
    /// satisfies a `Float` parameter.
    #[must_use]
    pub fn accepts(&self, arg: &CtorArg) -> bool {
        matches!(
            (self, arg),
            (Self::Str, CtorArg::Str(_))
                | (Self::Int, CtorArg::Int(_))
                | (Self::Float, CtorArg::Float(_))
                | (Self::Float, CtorArg::Int(_))
                | (Self::Bool, CtorArg::Bool(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_mapping() {
        assert_eq!(CtorArg::str("x").kind(), ParamKind::Str);
        assert_eq!(CtorArg::Int(1).kind(), ParamKind::Int);
        assert_eq!(CtorArg::Float(1.5).kind(), ParamKind::Float);
        assert_eq!(CtorArg::Bool(true).kind(), ParamKind::Bool);
    }

    #[test]
    fn numeric_coercion() {
        assert!(ParamKind::Float.accepts(&CtorArg::Int(3)));
        assert!(!ParamKind::Int.accepts(&CtorArg::Float(3.0)));
        assert_eq!(CtorArg::Int(3).as_float(), Some(3.0));
    }

    #[test]
    fn typed_accessors() {
        assert_eq!(CtorArg::str("hello").as_str(), Some("hello"));
        assert_eq!(CtorArg::Int(7).as_int(), Some(7));
        assert_eq!(CtorArg::Bool(false).as_bool(), Some(false));
        assert!(CtorArg::str("hello").as_int().is_none());
    }
}
