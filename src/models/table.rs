//! In-memory tabular data: typed values, fields, row index.

use geo::Point;
use std::fmt;

/// Column data type, fixed when a table is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Int,
    Float,
    Text,
    Point,
}

/// A single cell
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Point(Point<f64>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, used for coordinates and ranking columns
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) if !f.is_nan() => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Identifier view of the value.
    ///
    /// Integral floats are rendered without a fractional part so that codes
    /// read as numbers still match their text form.
    pub fn as_key(&self) -> Option<String> {
        match self {
            Value::Text(s) if !s.is_empty() => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(format!("{:.0}", f)),
            Value::Float(f) if f.is_finite() => Some(f.to_string()),
            _ => None,
        }
    }

    pub fn as_point(&self) -> Option<Point<f64>> {
        match self {
            Value::Point(p) => Some(*p),
            _ => None,
        }
    }

    /// Float coercion applied to boolean flag columns in enrichment output
    pub fn to_float(&self) -> Value {
        match self {
            Value::Bool(b) => Value::Float(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Value::Float(*i as f64),
            Value::Text(_) => self.as_f64().map_or(Value::Null, Value::Float),
            Value::Float(_) | Value::Null => self.clone(),
            Value::Point(_) => Value::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Point(p) => write!(f, "POINT ({} {})", p.x(), p.y()),
        }
    }
}

/// Named, typed column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub dtype: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

/// Row label
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexLabel {
    Int(i64),
    Text(String),
}

impl fmt::Display for IndexLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexLabel::Int(i) => write!(f, "{}", i),
            IndexLabel::Text(s) => f.write_str(s),
        }
    }
}

/// Row identity of a table: an optional name plus one label per row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: Option<String>,
    pub labels: Vec<IndexLabel>,
}

impl Index {
    /// Synthesized `0..len` index
    pub fn range(len: usize) -> Self {
        Self {
            name: None,
            labels: (0..len as i64).map(IndexLabel::Int).collect(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Row-major table with a typed schema and a row index
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    index: Index,
    fields: Vec<Field>,
    rows: Vec<Vec<Value>>,
    geometry: Option<usize>,
}

impl Table {
    /// Build a table, checking every row against the schema width.
    ///
    /// Panics if a row does not have one value per field or the index length
    /// differs from the row count.
    pub fn new(fields: Vec<Field>, rows: Vec<Vec<Value>>, index: Index) -> Self {
        assert_eq!(index.labels.len(), rows.len(), "index length must match rows");
        for row in &rows {
            assert_eq!(row.len(), fields.len(), "row width must match fields");
        }
        Self {
            index,
            fields,
            rows,
            geometry: None,
        }
    }

    /// Table with a synthesized range index
    pub fn from_rows(fields: Vec<Field>, rows: Vec<Vec<Value>>) -> Self {
        let index = Index::range(rows.len());
        Self::new(fields, rows, index)
    }

    /// Designate an existing `Point` column as the table's geometry.
    /// Ignored if the column does not exist.
    pub fn with_geometry(mut self, column: &str) -> Self {
        self.geometry = self.column_index(column);
        self
    }

    pub fn with_index(mut self, index: Index) -> Self {
        assert_eq!(index.labels.len(), self.rows.len(), "index length must match rows");
        self.index = index;
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Index of the geometry column, if the table carries one
    pub fn geometry_column(&self) -> Option<usize> {
        self.geometry
    }

    /// Cell lookup by row position and column name
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// All values of one column, in row order
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value>> {
        let col = self.column_index(name)?;
        Some(self.rows.iter().map(move |r| &r[col]))
    }

    /// Append a column. Panics if `values` does not have one value per row.
    pub fn push_column(&mut self, field: Field, values: Vec<Value>) {
        assert_eq!(values.len(), self.rows.len(), "column length must match rows");
        self.fields.push(field);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
    }

    /// Remove a column by name. Returns whether it existed.
    pub fn drop_column(&mut self, name: &str) -> bool {
        let Some(col) = self.column_index(name) else {
            return false;
        };
        self.fields.remove(col);
        for row in &mut self.rows {
            row.remove(col);
        }
        self.geometry = match self.geometry {
            Some(g) if g == col => None,
            Some(g) if g > col => Some(g - 1),
            other => other,
        };
        true
    }

    /// Move a column into the row index. Returns whether it existed.
    ///
    /// Integer cells become integer labels; anything else is labelled by its
    /// text form.
    pub fn set_index(&mut self, name: &str) -> bool {
        let Some(col) = self.column_index(name) else {
            return false;
        };
        let labels = self
            .rows
            .iter()
            .map(|row| match &row[col] {
                Value::Int(i) => IndexLabel::Int(*i),
                other => IndexLabel::Text(other.to_string()),
            })
            .collect();
        self.drop_column(name);
        self.index = Index {
            name: Some(name.to_string()),
            labels,
        };
        true
    }

    /// Convert a column to `Float` in place
    pub fn cast_to_float(&mut self, col: usize) {
        self.fields[col].dtype = DataType::Float;
        for row in &mut self.rows {
            row[col] = row[col].to_float();
        }
    }
}
