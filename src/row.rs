//! Result rows and result sets.

use std::sync::Arc;

use crate::conversion::{FromRow, FromWireValue};
use crate::error::{Error, Result};
use crate::protocol::backend::{CommandComplete, DataRow, FieldDescription};
use crate::types::TypeRegistry;
use crate::value::Value;

/// Column metadata from a RowDescription.
pub type Column = FieldDescription;

/// A single result row.
///
/// Values stay in their wire (text) form until read, and are decoded either
/// into a Rust type with [`Row::get`] or through the type registry with
/// [`Row::value`].
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Option<Vec<u8>>>,
    registry: Arc<TypeRegistry>,
}

impl Row {
    /// Pair a DataRow with its RowDescription.
    pub(crate) fn new(
        columns: Arc<[Column]>,
        data: DataRow,
        registry: Arc<TypeRegistry>,
    ) -> Result<Self> {
        if data.len() != columns.len() {
            return Err(Error::Protocol(format!(
                "DataRow has {} columns, RowDescription has {}",
                data.len(),
                columns.len()
            )));
        }
        Ok(Self {
            columns,
            values: data.values,
            registry,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw text bytes of a column; `None` for NULL.
    pub fn raw<I: RowIndex>(&self, index: I) -> Result<Option<&[u8]>> {
        let idx = index.index(&self.columns)?;
        Ok(self.values[idx].as_deref())
    }

    /// Decode a column into a Rust type.
    pub fn get<'a, T: FromWireValue<'a>>(&'a self, index: impl RowIndex) -> Result<T> {
        let idx = index.index(&self.columns)?;
        match &self.values[idx] {
            None => T::from_null(),
            Some(bytes) => T::from_text(self.columns[idx].type_oid(), bytes),
        }
    }

    /// Decode a column through the type registry.
    pub fn value(&self, index: impl RowIndex) -> Result<Value> {
        let idx = index.index(&self.columns)?;
        self.registry
            .decode(self.columns[idx].type_oid(), self.values[idx].as_deref())
    }

    /// Decode every column through the type registry.
    pub fn values(&self) -> Result<Vec<Value>> {
        (0..self.len()).map(|idx| self.value(idx)).collect()
    }

    /// Decode the whole row, e.g. into a tuple.
    pub fn decode<'a, T: FromRow<'a>>(&'a self) -> Result<T> {
        T::from_row(self)
    }
}

/// A column position or name.
pub trait RowIndex {
    fn index(&self, columns: &[Column]) -> Result<usize>;
}

impl RowIndex for usize {
    fn index(&self, columns: &[Column]) -> Result<usize> {
        if *self < columns.len() {
            Ok(*self)
        } else {
            Err(Error::InvalidUsage(format!(
                "column index {} out of range ({} columns)",
                self,
                columns.len()
            )))
        }
    }
}

impl RowIndex for &str {
    fn index(&self, columns: &[Column]) -> Result<usize> {
        columns
            .iter()
            .position(|column| column.name() == *self)
            .ok_or_else(|| Error::InvalidUsage(format!("no column named {:?}", self)))
    }
}

/// A fully materialized result set.
#[derive(Debug, Clone)]
pub struct QueryResult {
    columns: Arc<[Column]>,
    rows: Vec<Row>,
    command: Option<CommandComplete>,
}

impl QueryResult {
    pub(crate) fn new(columns: Arc<[Column]>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            command: None,
        }
    }

    pub(crate) fn push(&mut self, data: DataRow, registry: &Arc<TypeRegistry>) -> Result<()> {
        let row = Row::new(self.columns.clone(), data, registry.clone())?;
        self.rows.push(row);
        Ok(())
    }

    pub(crate) fn finish(&mut self, command: CommandComplete) {
        self.command = Some(command);
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Command tag of the statement, e.g. `SELECT 2`.
    pub fn command_tag(&self) -> Option<&str> {
        self.command.as_ref().map(|c| c.tag.as_str())
    }

    /// Decode every row, e.g. into tuples.
    pub fn decode<'a, T: FromRow<'a>>(&'a self) -> Result<Vec<T>> {
        self.rows.iter().map(|row| row.decode()).collect()
    }
}

impl IntoIterator for QueryResult {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    fn sample() -> Row {
        let columns: Arc<[Column]> = vec![
            Column::new("id", oid::INT4),
            Column::new("name", oid::TEXT),
            Column::new("extra", 600),
        ]
        .into();
        let data = DataRow {
            values: vec![Some(b"7".to_vec()), None, Some(b"(1,2)".to_vec())],
        };
        Row::new(columns, data, Arc::new(TypeRegistry::new())).unwrap()
    }

    #[test]
    fn typed_access_by_index_and_name() {
        let row = sample();
        assert_eq!(row.get::<i32>(0).unwrap(), 7);
        assert_eq!(row.get::<i64>("id").unwrap(), 7);
        assert_eq!(row.get::<Option<String>>("name").unwrap(), None);
        assert!(row.get::<String>("name").is_err());
        assert!(row.get::<i32>(5).is_err());
        assert!(row.get::<i32>("missing").is_err());
    }

    #[test]
    fn dynamic_access_falls_back_to_raw() {
        let row = sample();
        assert_eq!(
            row.values().unwrap(),
            vec![
                Value::Int4(7),
                Value::Null,
                Value::Raw {
                    oid: 600,
                    bytes: b"(1,2)".to_vec()
                }
            ]
        );
    }

    #[test]
    fn tuple_decode() {
        let row = sample();
        let (id, name): (i32, Option<&str>) = row.decode().unwrap();
        assert_eq!((id, name), (7, None));
    }

    #[test]
    fn column_count_mismatch_is_protocol_error() {
        let columns: Arc<[Column]> = vec![Column::new("id", oid::INT4)].into();
        let err = Row::new(columns, DataRow::default(), Arc::new(TypeRegistry::new())).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
