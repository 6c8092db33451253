//! Record fields and trace correlation.
//!
//! A log call carries an ordered list of [`Field`]s. When the call goes through
//! a [`crate::SpanLogger`], [`derive_fields`] turns that list into the emitted set:
//!
//! 1. caller fields keep their order, duplicates included;
//! 2. fields whose value is [`FieldValue::Absent`] are dropped;
//! 3. `traceId`, `spanId` and `service` are appended, in that order.
//!
//! Correlation fields are appended rather than merged by key, so callers may
//! use any key they like. A collision is written twice.

use std::borrow::Cow;
use std::fmt::Display;

use opentelemetry::trace::SpanContext;
use serde::{Serialize, Serializer};

/// Key of the trace id correlation field.
pub const TRACE_ID_KEY: &str = "traceId";
/// Key of the span id correlation field.
pub const SPAN_ID_KEY: &str = "spanId";
/// Key of the operation name correlation field.
pub const SERVICE_KEY: &str = "service";
/// Key used by [`Field::error`].
pub const ERROR_KEY: &str = "err";

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// Value of a single field.
///
/// `Absent` is distinct from every real value: `Int(0)` and `Str("")` are
/// emitted, `Absent` never is.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Absent,
    Str(String),
    Int(i64),
    Any(serde_json::Value),
}

impl FieldValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Absent => serializer.serialize_none(),
            Self::Str(s) => serializer.serialize_str(s),
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::Any(v) => v.serialize(serializer),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&String> for FieldValue {
    fn from(v: &String) -> Self {
        Self::Str(v.clone())
    }
}

macro_rules! int_field_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for FieldValue {
                fn from(v: $t) -> Self {
                    Self::Int(i64::from(v))
                }
            }
        )*
    };
}

int_field_value!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(n) => Self::Int(n),
            Err(_) => Self::Any(serde_json::Value::from(v)),
        }
    }
}

impl From<usize> for FieldValue {
    fn from(v: usize) -> Self {
        Self::from(v as u64)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Any(serde_json::Value::Bool(v))
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Any(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Absent, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// A key/value pair attached to one log call.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    key: Cow<'static, str>,
    value: FieldValue,
}

impl Field {
    pub fn new(key: impl Into<Cow<'static, str>>, value: impl Into<FieldValue>) -> Self {
        Self { key: key.into(), value: value.into() }
    }

    /// Structured field from any serializable value.
    ///
    /// A value that fails to serialize is recorded as a string describing the
    /// failure instead of being dropped.
    pub fn any<T: Serialize + ?Sized>(key: impl Into<Cow<'static, str>>, value: &T) -> Self {
        let value = match serde_json::to_value(value) {
            Ok(v) => FieldValue::Any(v),
            Err(e) => FieldValue::Str(format!("<unserializable: {e}>")),
        };
        Self { key: key.into(), value }
    }

    /// String field from anything displayable, including `format_args!`.
    pub fn display(key: impl Into<Cow<'static, str>>, value: impl Display) -> Self {
        Self { key: key.into(), value: FieldValue::Str(value.to_string()) }
    }

    /// `err` field from a possibly missing error. `None` yields an absent
    /// field, which is dropped on emission.
    pub fn error<E: std::error::Error + ?Sized>(err: Option<&E>) -> Self {
        Self {
            key: Cow::Borrowed(ERROR_KEY),
            value: err.map_or(FieldValue::Absent, |e| FieldValue::Str(e.to_string())),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }
}

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

/// Correlation values derived from a span context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Correlation {
    /// 32 lowercase hex characters, or empty when the context has no valid span.
    pub trace_id: String,
    /// 16 lowercase hex characters, or empty when the context has no valid span.
    pub span_id: String,
    pub service: String,
}

impl Correlation {
    pub fn from_span_context(span_context: &SpanContext, service: &str) -> Self {
        if span_context.is_valid() {
            Self {
                trace_id: span_context.trace_id().to_string(),
                span_id: span_context.span_id().to_string(),
                service: service.to_owned(),
            }
        } else {
            Self { trace_id: String::new(), span_id: String::new(), service: service.to_owned() }
        }
    }
}

/// Build the emitted field set for one log call.
pub fn derive_fields(fields: &[Field], correlation: &Correlation) -> Vec<Field> {
    let mut out = Vec::with_capacity(fields.len() + 3);
    out.extend(fields.iter().filter(|f| !f.value.is_absent()).cloned());
    out.push(Field::new(TRACE_ID_KEY, correlation.trace_id.clone()));
    out.push(Field::new(SPAN_ID_KEY, correlation.span_id.clone()));
    out.push(Field::new(SERVICE_KEY, correlation.service.clone()));
    out
}

#[cfg(test)]
mod tests {
    use opentelemetry::trace::{SpanId, TraceFlags, TraceId, TraceState};

    use super::*;

    fn valid_context() -> SpanContext {
        SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            false,
            TraceState::default(),
        )
    }

    fn keys(fields: &[Field]) -> Vec<&str> {
        fields.iter().map(Field::key).collect()
    }

    #[test]
    fn correlation_appended_after_caller_fields() {
        let corr = Correlation::from_span_context(&valid_context(), "op1");
        let out = derive_fields(&[Field::new("key", "value")], &corr);
        assert_eq!(keys(&out), ["key", TRACE_ID_KEY, SPAN_ID_KEY, SERVICE_KEY]);
        assert_eq!(out[1].value(), &FieldValue::Str("4bf92f3577b34da6a3ce929d0e0e4736".into()));
        assert_eq!(out[2].value(), &FieldValue::Str("00f067aa0ba902b7".into()));
        assert_eq!(out[3].value(), &FieldValue::Str("op1".into()));
    }

    #[test]
    fn absent_dropped_zero_kept() {
        let corr = Correlation::default();
        let none: Option<&str> = None;
        let fields = [
            Field::new("count", 0),
            Field::new("maybe", none),
            Field::error(None::<&std::io::Error>),
            Field::new("s", ""),
        ];
        let out = derive_fields(&fields, &corr);
        assert_eq!(keys(&out), ["count", "s", TRACE_ID_KEY, SPAN_ID_KEY, SERVICE_KEY]);
        assert_eq!(out[0].value(), &FieldValue::Int(0));
    }

    #[test]
    fn duplicates_are_kept_in_order() {
        let corr = Correlation::default();
        let fields = [Field::new("k", 1), Field::new("other", "x"), Field::new("k", 2)];
        let out = derive_fields(&fields, &corr);
        assert_eq!(keys(&out)[..3], ["k", "other", "k"]);
        assert_eq!(out[2].value(), &FieldValue::Int(2));
    }

    #[test]
    fn caller_may_reuse_correlation_keys() {
        let corr = Correlation::from_span_context(&valid_context(), "op");
        let out = derive_fields(&[Field::new(SERVICE_KEY, "mine")], &corr);
        assert_eq!(keys(&out), [SERVICE_KEY, TRACE_ID_KEY, SPAN_ID_KEY, SERVICE_KEY]);
    }

    #[test]
    fn invalid_context_yields_empty_ids() {
        let corr = Correlation::from_span_context(&SpanContext::empty_context(), "op");
        assert!(corr.trace_id.is_empty());
        assert!(corr.span_id.is_empty());
        assert_eq!(corr.service, "op");
    }

    #[test]
    fn error_field() {
        let err = std::io::Error::other("disk full");
        let f = Field::error(Some(&err));
        assert_eq!(f.key(), ERROR_KEY);
        assert_eq!(f.value(), &FieldValue::Str("disk full".into()));
    }

    #[test]
    fn value_conversions() {
        assert_eq!(FieldValue::from(u64::MAX), FieldValue::Any(serde_json::Value::from(u64::MAX)));
        assert_eq!(FieldValue::from(7u32), FieldValue::Int(7));
        assert_eq!(FieldValue::from(Some("x")), FieldValue::Str("x".into()));
        let sum = Field::display("sum", format_args!("{} + {} = {}", 1, 2, 3));
        assert_eq!(sum.value(), &FieldValue::Str("1 + 2 = 3".into()));
        assert_eq!(Field::any("v", &[1, 2]).value(), &FieldValue::Any(serde_json::json!([1, 2])));
    }
}
