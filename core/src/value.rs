//! Tagged custom-field values carried by entity deltas, player data and
//! settings. Each variant serialises with an explicit `kind` tag, so a
//! value never needs a runtime cast to be read back.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CustomValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Vector([f32; 3]),
    Color([f32; 4]),
}

impl CustomValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Ints widen to floats; nothing else converts.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Int(_)    => "int",
            Self::Float(_)  => "float",
            Self::Bool(_)   => "bool",
            Self::Text(_)   => "text",
            Self::Vector(_) => "vector",
            Self::Color(_)  => "color",
        }
    }
}

impl From<i64> for CustomValue {
    fn from(v: i64) -> Self { Self::Int(v) }
}

impl From<f64> for CustomValue {
    fn from(v: f64) -> Self { Self::Float(v) }
}

impl From<bool> for CustomValue {
    fn from(v: bool) -> Self { Self::Bool(v) }
}

impl From<&str> for CustomValue {
    fn from(v: &str) -> Self { Self::Text(v.to_string()) }
}

impl From<String> for CustomValue {
    fn from(v: String) -> Self { Self::Text(v) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_explicit_in_json() {
        let json = serde_json::to_string(&CustomValue::Vector([1.0, 2.5, -3.0])).unwrap();
        assert_eq!(json, r#"{"kind":"vector","value":[1.0,2.5,-3.0]}"#);

        let back: CustomValue = serde_json::from_str(r#"{"kind":"int","value":7}"#).unwrap();
        assert_eq!(back, CustomValue::Int(7));
    }

    #[test]
    fn mismatched_accessors_return_none() {
        let v = CustomValue::from("hello");
        assert_eq!(v.as_str(), Some("hello"));
        assert_eq!(v.as_i64(), None);
        assert_eq!(CustomValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(CustomValue::Bool(true).kind(), "bool");
    }
}
