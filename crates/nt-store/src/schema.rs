//! Field types, schemas and dynamically typed values.

use std::collections::HashMap;

use nt_core::{Error, Result};

/// Storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Boolean flag (selection decisions).
    Bool,
    /// 64-bit signed integer (all integer widths are widened on load).
    Int,
    /// 64-bit float (32-bit floats are widened on load).
    Float,
    /// Variable-length list of floats (jet kinematics and similar).
    FloatList,
}

impl FieldType {
    /// `true` for types readable as a single number.
    pub fn is_scalar(self) -> bool {
        !matches!(self, FieldType::FloatList)
    }
}

/// A named, typed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Storage type.
    pub ty: FieldType,
}

impl Field {
    /// Create a field.
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// Ordered list of uniquely named fields.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
    by_name: HashMap<String, usize>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Schema {
    /// Build a schema; duplicate field names are rejected.
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        let mut schema = Schema::default();
        for f in fields {
            schema.push(f)?;
        }
        Ok(schema)
    }

    /// Append a field.
    pub fn push(&mut self, field: Field) -> Result<()> {
        if self.by_name.contains_key(&field.name) {
            return Err(Error::SchemaMismatch(format!("duplicate field '{}'", field.name)));
        }
        self.by_name.insert(field.name.clone(), self.fields.len());
        self.fields.push(field);
        Ok(())
    }

    /// Column position of `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// `true` if a field called `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Field at `index`.
    pub fn field(&self, index: usize) -> &Field {
        &self.fields[index]
    }

    /// All fields in column order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// `true` if the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names in column order.
    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// One cell value, used for copy-through of rows into sinks.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// List of floats
    FloatList(Vec<f64>),
}

impl Value {
    /// Storage type of this value.
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Bool(_) => FieldType::Bool,
            Value::Int(_) => FieldType::Int,
            Value::Float(_) => FieldType::Float,
            Value::FloatList(_) => FieldType::FloatList,
        }
    }

    /// Numeric view; lists have no scalar value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(x) => Some(*x),
            Value::FloatList(_) => None,
        }
    }

    /// Replace a numeric payload with `pad`, keeping the storage type.
    pub fn padded(&self, pad: f64) -> Value {
        match self {
            Value::Bool(_) => Value::Bool(pad != 0.0),
            Value::Int(_) => Value::Int(pad as i64),
            Value::Float(_) => Value::Float(pad),
            Value::FloatList(v) => Value::FloatList(vec![pad; v.len()]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_lookup() {
        let s = Schema::new(vec![
            Field::new("runNumber", FieldType::Int),
            Field::new("eventNumber", FieldType::Int),
            Field::new("jet_pt", FieldType::FloatList),
        ])
        .unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.index_of("eventNumber"), Some(1));
        assert!(s.index_of("weight_mc").is_none());
        assert!(!s.field(2).ty.is_scalar());
        assert_eq!(s.names(), vec!["runNumber", "eventNumber", "jet_pt"]);
    }

    #[test]
    fn schema_rejects_duplicate_names() {
        let err = Schema::new(vec![
            Field::new("x", FieldType::Float),
            Field::new("x", FieldType::Int),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate field 'x'"));
    }

    #[test]
    fn value_padding_keeps_type() {
        assert_eq!(Value::Int(7).padded(-999.0), Value::Int(-999));
        assert_eq!(Value::Float(1.5).padded(-999.0), Value::Float(-999.0));
        assert_eq!(Value::FloatList(vec![1.0, 2.0]).padded(0.0), Value::FloatList(vec![0.0, 0.0]));
        assert_eq!(Value::Bool(true).as_f64(), Some(1.0));
        assert_eq!(Value::FloatList(vec![]).as_f64(), None);
    }
}
