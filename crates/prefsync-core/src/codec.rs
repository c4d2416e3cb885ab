//! Setting value codecs.
//!
//! A [`Codec`] describes the shape of one setting: a scalar kind, whether it
//! is an array, and whether it may be left unset. Codecs translate values to
//! and from the two string tiers:
//!
//! - URL tier: one query parameter per scalar, repeated for arrays
//! - Storage tier: a JSON document (`"loss"`, `25`, `[1,2]`)
//!
//! Decoding is permissive. Absent, empty or malformed input never produces an
//! error, the caller gets `None` (or the field default via [`Codec::decode`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Scalar type carried by a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    String,
    Integer,
    Float,
    Boolean,
}

impl ScalarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Integer => "integer",
            ScalarKind::Float => "float",
            ScalarKind::Boolean => "boolean",
        }
    }

    /// Parse one URL-tier string into a scalar of this kind.
    fn parse(&self, raw: &str) -> Option<Scalar> {
        match self {
            ScalarKind::String => Some(Scalar::String(raw.to_string())),
            ScalarKind::Integer => raw.parse::<i64>().ok().map(Scalar::Integer),
            ScalarKind::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Scalar::Float),
            ScalarKind::Boolean => match raw {
                "true" => Some(Scalar::Boolean(true)),
                "false" => Some(Scalar::Boolean(false)),
                _ => None,
            },
        }
    }

    /// Read one JSON scalar as this kind.
    fn from_json(&self, value: &Value) -> Option<Scalar> {
        match (self, value) {
            (ScalarKind::String, Value::String(s)) => Some(Scalar::String(s.clone())),
            (ScalarKind::Integer, Value::Number(n)) => n.as_i64().map(Scalar::Integer),
            (ScalarKind::Float, Value::Number(n)) => {
                n.as_f64().filter(|f| f.is_finite()).map(Scalar::Float)
            }
            (ScalarKind::Boolean, Value::Bool(b)) => Some(Scalar::Boolean(*b)),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single scalar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Boolean(_) => ScalarKind::Boolean,
            Scalar::Integer(_) => ScalarKind::Integer,
            Scalar::Float(_) => ScalarKind::Float,
            Scalar::String(_) => ScalarKind::String,
        }
    }

    /// Canonical, locale-independent string form.
    ///
    /// Floats use Rust's shortest round-trip representation, so
    /// `"0.1".parse::<f64>()` of the output yields the same bits back.
    pub fn to_param(&self) -> String {
        match self {
            Scalar::Boolean(b) => b.to_string(),
            Scalar::Integer(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::String(s) => s.clone(),
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_param())
    }
}

/// The decoded value of one setting.
///
/// `Unset` only appears for optional codecs; it serializes as JSON `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    #[default]
    Unset,
    Scalar(Scalar),
    List(Vec<Scalar>),
}

impl SettingValue {
    pub fn is_unset(&self) -> bool {
        matches!(self, SettingValue::Unset)
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            SettingValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Scalar]> {
        match self {
            SettingValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SettingValue::Scalar(Scalar::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Scalar(Scalar::Float(f)) => Some(*f),
            SettingValue::Scalar(Scalar::Integer(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Scalar(Scalar::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    /// Convert to a JSON value for storage or display.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<Scalar> for SettingValue {
    fn from(s: Scalar) -> Self {
        SettingValue::Scalar(s)
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        SettingValue::Scalar(Scalar::String(s.to_string()))
    }
}

impl From<String> for SettingValue {
    fn from(s: String) -> Self {
        SettingValue::Scalar(Scalar::String(s))
    }
}

impl From<i64> for SettingValue {
    fn from(i: i64) -> Self {
        SettingValue::Scalar(Scalar::Integer(i))
    }
}

impl From<i32> for SettingValue {
    fn from(i: i32) -> Self {
        SettingValue::Scalar(Scalar::Integer(i64::from(i)))
    }
}

impl From<u32> for SettingValue {
    fn from(i: u32) -> Self {
        SettingValue::Scalar(Scalar::Integer(i64::from(i)))
    }
}

impl From<f64> for SettingValue {
    fn from(f: f64) -> Self {
        SettingValue::Scalar(Scalar::Float(f))
    }
}

impl From<bool> for SettingValue {
    fn from(b: bool) -> Self {
        SettingValue::Scalar(Scalar::Boolean(b))
    }
}

impl<T: Into<SettingValue>> From<Option<T>> for SettingValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SettingValue::Unset)
    }
}

impl<T: Into<Scalar>> From<Vec<T>> for SettingValue {
    fn from(items: Vec<T>) -> Self {
        SettingValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::String(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::String(s)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Integer(i)
    }
}

impl From<f64> for Scalar {
    fn from(f: f64) -> Self {
        Scalar::Float(f)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Boolean(b)
    }
}

/// Typed extraction from a [`SettingValue`].
pub trait FromSettingValue: Sized {
    fn from_setting_value(value: &SettingValue) -> Option<Self>;
}

/// Typed extraction from a single [`Scalar`].
pub trait FromScalar: Sized {
    fn from_scalar(scalar: &Scalar) -> Option<Self>;
}

impl FromScalar for String {
    fn from_scalar(scalar: &Scalar) -> Option<Self> {
        match scalar {
            Scalar::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromScalar for i64 {
    fn from_scalar(scalar: &Scalar) -> Option<Self> {
        match scalar {
            Scalar::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl FromScalar for f64 {
    fn from_scalar(scalar: &Scalar) -> Option<Self> {
        match scalar {
            Scalar::Float(f) => Some(*f),
            Scalar::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FromScalar for bool {
    fn from_scalar(scalar: &Scalar) -> Option<Self> {
        match scalar {
            Scalar::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

macro_rules! scalar_setting_value {
    ($($ty:ty),*) => {
        $(
            impl FromSettingValue for $ty {
                fn from_setting_value(value: &SettingValue) -> Option<Self> {
                    value.as_scalar().and_then(<$ty>::from_scalar)
                }
            }
        )*
    };
}

scalar_setting_value!(String, i64, f64, bool);

impl<T: FromScalar> FromSettingValue for Vec<T> {
    fn from_setting_value(value: &SettingValue) -> Option<Self> {
        value
            .as_list()?
            .iter()
            .map(T::from_scalar)
            .collect::<Option<Vec<_>>>()
    }
}

impl<T: FromScalar> FromSettingValue for Option<T> {
    fn from_setting_value(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Unset => Some(None),
            other => other.as_scalar().and_then(T::from_scalar).map(Some),
        }
    }
}

/// Errors raised when a value does not fit a codec.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("expected {expected}, found {found}")]
    KindMismatch {
        expected: ScalarKind,
        found: ScalarKind,
    },

    #[error("expected an array of {0}, found a scalar")]
    ExpectedArray(ScalarKind),

    #[error("expected a single {0}, found an array")]
    ExpectedScalar(ScalarKind),

    #[error("value is unset but the codec is not optional")]
    NotOptional,

    #[error("float value is not finite")]
    NonFinite,

    #[error("unsupported JSON value: {0}")]
    UnsupportedJson(String),
}

/// Declarative type descriptor for one setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Codec {
    pub kind: ScalarKind,
    #[serde(default)]
    pub is_array: bool,
    #[serde(default)]
    pub optional: bool,
}

impl Codec {
    pub const fn new(kind: ScalarKind) -> Self {
        Self {
            kind,
            is_array: false,
            optional: false,
        }
    }

    pub const fn string() -> Self {
        Self::new(ScalarKind::String)
    }

    pub const fn integer() -> Self {
        Self::new(ScalarKind::Integer)
    }

    pub const fn float() -> Self {
        Self::new(ScalarKind::Float)
    }

    pub const fn boolean() -> Self {
        Self::new(ScalarKind::Boolean)
    }

    /// Turn this codec into its array variant.
    pub const fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    /// Allow the value to be [`SettingValue::Unset`].
    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    fn check_scalar(&self, scalar: &Scalar) -> Result<(), CodecError> {
        if scalar.kind() != self.kind {
            return Err(CodecError::KindMismatch {
                expected: self.kind,
                found: scalar.kind(),
            });
        }
        if let Scalar::Float(f) = scalar {
            if !f.is_finite() {
                return Err(CodecError::NonFinite);
            }
        }
        Ok(())
    }

    /// Verify that a value has exactly this codec's shape.
    pub fn check(&self, value: &SettingValue) -> Result<(), CodecError> {
        match value {
            SettingValue::Unset if self.optional => Ok(()),
            SettingValue::Unset => Err(CodecError::NotOptional),
            SettingValue::Scalar(_) if self.is_array => Err(CodecError::ExpectedArray(self.kind)),
            SettingValue::Scalar(s) => self.check_scalar(s),
            SettingValue::List(_) if !self.is_array => Err(CodecError::ExpectedScalar(self.kind)),
            SettingValue::List(items) => items.iter().try_for_each(|s| self.check_scalar(s)),
        }
    }

    /// Check a value, widening integers to floats for float codecs.
    pub fn coerce(&self, value: SettingValue) -> Result<SettingValue, CodecError> {
        let widen = |s: Scalar| match (self.kind, s) {
            (ScalarKind::Float, Scalar::Integer(i)) => Scalar::Float(i as f64),
            (_, other) => other,
        };
        let value = match value {
            SettingValue::Scalar(s) => SettingValue::Scalar(widen(s)),
            SettingValue::List(items) => SettingValue::List(items.into_iter().map(widen).collect()),
            SettingValue::Unset => SettingValue::Unset,
        };
        self.check(&value)?;
        Ok(value)
    }

    /// Encode a value as URL query parameter values.
    ///
    /// Scalars yield one entry, arrays one entry per element in order, and
    /// `Unset` yields none.
    pub fn encode(&self, value: &SettingValue) -> Vec<String> {
        match value {
            SettingValue::Unset => Vec::new(),
            SettingValue::Scalar(s) => vec![s.to_param()],
            SettingValue::List(items) => items.iter().map(Scalar::to_param).collect(),
        }
    }

    /// Decode URL query parameter values.
    ///
    /// Returns `None` when the input is absent, empty, or does not parse as
    /// this codec. Scalar codecs read the first parameter. Array codecs
    /// ignore empty elements and reject the whole value if any remaining
    /// element is malformed.
    pub fn decode_params(&self, raw: &[String]) -> Option<SettingValue> {
        if self.is_array {
            let items = raw
                .iter()
                .filter(|s| !s.is_empty())
                .map(|s| self.kind.parse(s))
                .collect::<Option<Vec<_>>>()?;
            if items.is_empty() {
                None
            } else {
                Some(SettingValue::List(items))
            }
        } else {
            let first = raw.first().filter(|s| !s.is_empty())?;
            self.kind.parse(first).map(SettingValue::Scalar)
        }
    }

    /// Decode URL query parameter values, falling back to `default`.
    pub fn decode(&self, raw: Option<&[String]>, default: &SettingValue) -> SettingValue {
        raw.and_then(|r| self.decode_params(r))
            .unwrap_or_else(|| default.clone())
    }

    /// Read a JSON value with this codec's shape.
    ///
    /// Strict: used for schema defaults, where `null` means unset and empty
    /// arrays are legal.
    pub fn value_from_json(&self, value: &Value) -> Result<SettingValue, CodecError> {
        let found = |v: &Value| -> CodecError {
            match v {
                Value::Bool(_) => CodecError::KindMismatch {
                    expected: self.kind,
                    found: ScalarKind::Boolean,
                },
                Value::Number(n) if n.is_i64() || n.is_u64() => CodecError::KindMismatch {
                    expected: self.kind,
                    found: ScalarKind::Integer,
                },
                Value::Number(_) => CodecError::KindMismatch {
                    expected: self.kind,
                    found: ScalarKind::Float,
                },
                Value::String(_) => CodecError::KindMismatch {
                    expected: self.kind,
                    found: ScalarKind::String,
                },
                other => CodecError::UnsupportedJson(other.to_string()),
            }
        };
        let value = match value {
            Value::Null => SettingValue::Unset,
            Value::Array(items) => SettingValue::List(
                items
                    .iter()
                    .map(|v| self.kind.from_json(v).ok_or_else(|| found(v)))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            v => SettingValue::Scalar(self.kind.from_json(v).ok_or_else(|| found(v))?),
        };
        self.check(&value)?;
        Ok(value)
    }

    /// Decode a value read back from durable storage.
    ///
    /// Returns `None` for `null`, empty arrays and anything that does not
    /// match this codec, so the caller falls through to the next tier.
    pub fn decode_stored(&self, value: &Value) -> Option<SettingValue> {
        match self.value_from_json(value).ok()? {
            SettingValue::Unset => None,
            SettingValue::List(items) if items.is_empty() => None,
            v => Some(v),
        }
    }
}
