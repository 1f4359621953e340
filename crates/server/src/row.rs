//! The storage seam: rows are opaque to the graph core and only ever
//! created through a frame's row factory.

use core::fmt::Debug;

use depcoord_core::command::Value;

/// Column layout of a table, opaque to the coordination layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub name: String,
    pub columns: Vec<String>,
}

impl Schema {
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.columns.len()
    }
}

/// A materialized row handle.
pub trait Row: Send + Sync + Debug {
    fn get(&self, column: usize) -> Option<&Value>;
    fn arity(&self) -> usize;
}

/// Row kept with its superseded values, so reads behind the commit
/// frontier stay answerable while a component executes.
#[derive(Debug)]
pub struct VersionedRow {
    versions: Vec<Vec<Value>>,
}

impl VersionedRow {
    /// # Panics
    ///
    /// Panics when `row_data` does not match the schema arity.
    #[must_use]
    pub fn create(schema: &Schema, row_data: Vec<Value>) -> Self {
        assert_eq!(
            row_data.len(),
            schema.arity(),
            "row width does not match schema {}",
            schema.name
        );
        Self {
            versions: vec![row_data],
        }
    }

    pub fn update(&mut self, row_data: Vec<Value>) {
        self.versions.push(row_data);
    }

    #[must_use]
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }
}

impl Row for VersionedRow {
    fn get(&self, column: usize) -> Option<&Value> {
        self.versions.last().and_then(|row| row.get(column))
    }

    fn arity(&self) -> usize {
        self.versions.last().map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_version_wins() {
        let schema = Schema::new("account", vec!["id".into(), "balance".into()]);
        let mut row = VersionedRow::create(&schema, vec![Value::I64(1), Value::I64(100)]);
        row.update(vec![Value::I64(1), Value::I64(250)]);

        assert_eq!(row.get(1), Some(&Value::I64(250)));
        assert_eq!(row.version_count(), 2);
    }

    #[test]
    #[should_panic(expected = "row width")]
    fn arity_mismatch_panics() {
        let schema = Schema::new("account", vec!["id".into()]);
        let _ = VersionedRow::create(&schema, vec![Value::I64(1), Value::I64(2)]);
    }
}
