//! Value model shared by all backends.

use bytes::Bytes;

/// A store value.
///
/// A value is observably a byte string: whatever was written reads back as
/// bytes, with integers rendered in their base-10 form. The `Int` variant is
/// kept distinct so the wide-column backend can persist integers as native
/// numeric attributes, which is what makes its atomic `ADD` update possible.
///
/// Equality and hashing are over the canonical byte form, so
/// `Value::from(2) == Value::from("2")`.
#[derive(Clone, Debug)]
pub enum Value {
    Bytes(Bytes),
    Int(i64),
}

impl Value {
    /// Returns the canonical byte form of the value.
    pub fn as_bytes(&self) -> Bytes {
        match self {
            Value::Bytes(b) => b.clone(),
            Value::Int(n) => Bytes::from(n.to_string()),
        }
    }

    /// Interprets the value as a base-10 signed 64-bit integer.
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bytes(b) => std::str::from_utf8(b).ok()?.parse().ok(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(b))
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(b))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Bytes(Bytes::from(s))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

/// A sorted-set member together with its score.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredMember {
    pub score: f64,
    pub value: Value,
}

/// Projects scored members down to their values, preserving order.
pub fn scored_values(members: Vec<ScoredMember>) -> Vec<Value> {
    members.into_iter().map(|m| m.value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_compare_ints_and_bytes_canonically() {
        assert_eq!(Value::from(2), Value::from("2"));
        assert_eq!(Value::from(-17), Value::from("-17"));
        assert_ne!(Value::from(2), Value::from("02"));
    }

    #[test]
    fn should_parse_integers_from_byte_values() {
        assert_eq!(Value::from("42").to_i64(), Some(42));
        assert_eq!(Value::from(42).to_i64(), Some(42));
        assert_eq!(Value::from("forty-two").to_i64(), None);
    }

    #[test]
    fn should_project_scored_members() {
        // given
        let members = vec![
            ScoredMember { score: 3.0, value: "foo".into() },
            ScoredMember { score: 5.0, value: "bar".into() },
        ];

        // when
        let values = scored_values(members);

        // then
        assert_eq!(values, vec![Value::from("foo"), Value::from("bar")]);
    }
}
