//! Sensor sample records bound to a wire schema.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;

use crate::schema::{Field, FieldKind, Schema};

/// A single typed field value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    F32(f32),
    F64(f64),
    U32(u32),
    I32(i32),
}

impl Value {
    pub fn kind(&self) -> FieldKind {
        match self {
            Value::F32(_) => FieldKind::F32,
            Value::F64(_) => FieldKind::F64,
            Value::U32(_) => FieldKind::U32,
            Value::I32(_) => FieldKind::I32,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::F32(v) => v as f64,
            Value::F64(v) => v,
            Value::U32(v) => v as f64,
            Value::I32(v) => v as f64,
        }
    }

    /// Converts a measurement to the given wire kind.
    ///
    /// Integers are rounded and saturate at the type bounds; NaN becomes 0.
    pub fn coerce(kind: FieldKind, value: f64) -> Self {
        match kind {
            FieldKind::F32 => Value::F32(value as f32),
            FieldKind::F64 => Value::F64(value),
            FieldKind::U32 => Value::U32(value.round() as u32),
            FieldKind::I32 => Value::I32(value.round() as i32),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Value::F32(v) => serializer.serialize_f32(v),
            Value::F64(v) => serializer.serialize_f64(v),
            Value::U32(v) => serializer.serialize_u32(v),
            Value::I32(v) => serializer.serialize_i32(v),
        }
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

/// Errors building a record that does not fit its schema.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("schema '{schema}' has {expected} fields, got {actual} values")]
    FieldCount {
        schema: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("field '{field}' expects {expected:?}, got {actual:?}")]
    FieldKind {
        field: &'static str,
        expected: FieldKind,
        actual: FieldKind,
    },
}

/// One sample: values in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: &'static Schema,
    values: Vec<Value>,
}

impl Record {
    /// Builds a record, checking value count and kinds against the schema.
    pub fn new(schema: &'static Schema, values: Vec<Value>) -> Result<Self, RecordError> {
        if values.len() != schema.len() {
            return Err(RecordError::FieldCount {
                schema: schema.name,
                expected: schema.len(),
                actual: values.len(),
            });
        }
        for (field, value) in schema.fields.iter().zip(&values) {
            if field.kind != value.kind() {
                return Err(RecordError::FieldKind {
                    field: field.name,
                    expected: field.kind,
                    actual: value.kind(),
                });
            }
        }
        Ok(Self { schema, values })
    }

    /// Builds a record by asking `lookup` for each field's measurement and
    /// coercing it to the field's wire kind.
    pub fn from_fn<F>(schema: &'static Schema, mut lookup: F) -> Self
    where
        F: FnMut(&Field) -> f64,
    {
        let values = schema
            .fields
            .iter()
            .map(|field| Value::coerce(field.kind, lookup(field)))
            .collect();
        Self { schema, values }
    }

    /// For decoders that build `values` directly from `schema.fields`.
    pub(crate) fn from_values_unchecked(schema: &'static Schema, values: Vec<Value>) -> Self {
        debug_assert_eq!(values.len(), schema.len());
        Self { schema, values }
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.schema.position(name).map(|i| self.values[i])
    }

    /// Fields paired with their values, in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static Field, Value)> + '_ {
        self.schema.fields.iter().zip(self.values.iter().copied())
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (field, value) in self.iter() {
            map.serialize_entry(field.name, &value)?;
        }
        map.end()
    }
}
