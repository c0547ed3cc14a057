//! Range delimiter grammar for byte-lexical bounds.
//!
//! A lexical bound is written as `[` (inclusive) or `(` (exclusive) followed
//! by the bound's bytes, or one of the singletons `-` (negative infinity) and
//! `+` (positive infinity).

use bytes::Bytes;

use crate::error::{Error, Result};

/// A parsed byte-lexical range bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexBound {
    NegInf,
    PosInf,
    Inclusive(Bytes),
    Exclusive(Bytes),
}

impl LexBound {
    /// Parses a delimiter string.
    pub fn parse(s: &str) -> Result<Self> {
        match s.as_bytes() {
            b"-" => Ok(LexBound::NegInf),
            b"+" => Ok(LexBound::PosInf),
            [b'[', rest @ ..] => Ok(LexBound::Inclusive(Bytes::copy_from_slice(rest))),
            [b'(', rest @ ..] => Ok(LexBound::Exclusive(Bytes::copy_from_slice(rest))),
            _ => Err(Error::InvalidArgument(format!(
                "range delimiter {:?} must begin with '[' or '(' or be '-' or '+'",
                s
            ))),
        }
    }

    /// The bound's bytes, when finite.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            LexBound::Inclusive(b) | LexBound::Exclusive(b) => Some(b),
            _ => None,
        }
    }

    /// True for an exclusive finite bound.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, LexBound::Exclusive(_))
    }

    /// True when `member` falls on an exclusive bound and must be filtered
    /// from range results.
    pub fn excludes(&self, member: &[u8]) -> bool {
        match self {
            LexBound::Exclusive(b) => b.as_ref() == member,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_all_delimiter_forms() {
        assert_eq!(LexBound::parse("-").unwrap(), LexBound::NegInf);
        assert_eq!(LexBound::parse("+").unwrap(), LexBound::PosInf);
        assert_eq!(
            LexBound::parse("[abc").unwrap(),
            LexBound::Inclusive(Bytes::from_static(b"abc"))
        );
        assert_eq!(
            LexBound::parse("(abc").unwrap(),
            LexBound::Exclusive(Bytes::from_static(b"abc"))
        );
    }

    #[test]
    fn should_parse_empty_bound_bytes() {
        assert_eq!(LexBound::parse("[").unwrap(), LexBound::Inclusive(Bytes::new()));
    }

    #[test]
    fn should_reject_malformed_delimiters() {
        assert!(matches!(LexBound::parse(""), Err(Error::InvalidArgument(_))));
        assert!(matches!(LexBound::parse("abc"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn should_exclude_only_the_boundary_member() {
        let bound = LexBound::parse("(abc").unwrap();
        assert!(bound.excludes(b"abc"));
        assert!(!bound.excludes(b"abcd"));
        assert!(!LexBound::parse("[abc").unwrap().excludes(b"abc"));
    }
}
