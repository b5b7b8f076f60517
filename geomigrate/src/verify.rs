//! Catalog and data checks used before and after applying a migration.
//!
//! [SchemaVerifier] works over any [`postgres::GenericClient`], so the same queries serve a
//! plain [`postgres::Client`] in tests and the CLI, and an open [`postgres::Transaction`] inside
//! a migration precondition.

use crate::error::Error;
use postgres::GenericClient;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A 2D coordinate as stored in a `POINT` or `GEOMETRY(POINT, _)` column.
///
/// Equality is exact: coordinates compare by bit pattern, so `-0.0` differs from `0.0`, while
/// any NaN equals any other NaN.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

fn same_coordinate(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        same_coordinate(self.x, other.x) && same_coordinate(self.y, other.y)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// The storage type of a position column, from `pg_type.typname`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// PostgreSQL's native `point`.
    Point,
    /// PostGIS `geometry`.
    Geometry,
    Other(String),
}

impl ColumnType {
    pub fn from_type_name(type_name: &str) -> Self {
        match type_name {
            "point" => ColumnType::Point,
            "geometry" => ColumnType::Geometry,
            other => ColumnType::Other(other.to_string()),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            ColumnType::Point => "point",
            ColumnType::Geometry => "geometry",
            ColumnType::Other(name) => name,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// PostGIS type modifiers of a geometry column, from `geometry_columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryColumn {
    /// e.g. `POINT`
    pub geometry_type: String,
    pub srid: i32,
}

/// Represents a captured database schema for comparison and snapshotting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Map of table name to table definitions
    pub tables: HashMap<String, TableSchema>,
}

/// Represents a table's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// List of columns
    pub columns: Vec<ColumnInfo>,
    /// List of indexes
    pub indexes: Vec<IndexInfo>,
}

/// Information about a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// `information_schema.columns.data_type`; `USER-DEFINED` for extension types.
    pub type_name: String,
    /// Underlying type name, e.g. `point` or `geometry`.
    pub udt_name: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

/// Information about an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub unique: bool,
    /// Access method, e.g. `btree` or `gist`.
    pub method: String,
    pub columns: Vec<String>,
}

impl SchemaSnapshot {
    /// Human-readable differences between `self` (expected) and `actual`. Empty when equal.
    pub fn diff(&self, actual: &SchemaSnapshot) -> Vec<String> {
        let mut differences = Vec::new();

        // Sort table names for deterministic ordering
        let mut expected_table_names: Vec<_> = self.tables.keys().collect();
        expected_table_names.sort();
        let mut actual_table_names: Vec<_> = actual.tables.keys().collect();
        actual_table_names.sort();

        for table_name in &expected_table_names {
            if !actual.tables.contains_key(*table_name) {
                differences.push(format!("  - Table '{}' is missing", table_name));
            }
        }

        for table_name in &actual_table_names {
            if !self.tables.contains_key(*table_name) {
                differences.push(format!("  - Unexpected table '{}' found", table_name));
            }
        }

        for table_name in &expected_table_names {
            let expected_table = &self.tables[*table_name];
            let Some(actual_table) = actual.tables.get(*table_name) else {
                continue;
            };

            if expected_table.columns != actual_table.columns {
                let expected_cols: Vec<_> =
                    expected_table.columns.iter().map(|c| &c.name).collect();
                let actual_cols: Vec<_> = actual_table.columns.iter().map(|c| &c.name).collect();

                if expected_cols != actual_cols {
                    differences.push(format!(
                        "  - Table '{}' column mismatch:\n    Expected columns: {:?}\n    Actual columns:   {:?}",
                        table_name, expected_cols, actual_cols
                    ));
                } else {
                    // Same column names but different properties
                    for (expected_col, actual_col) in
                        expected_table.columns.iter().zip(&actual_table.columns)
                    {
                        if expected_col != actual_col {
                            differences.push(format!(
                                "  - Table '{}' column '{}' properties differ:\n    Expected: {:?}\n    Actual:   {:?}",
                                table_name, expected_col.name, expected_col, actual_col
                            ));
                        }
                    }
                }
            }

            if expected_table.indexes != actual_table.indexes {
                differences.push(format!(
                    "  - Table '{}' index mismatch:\n    Expected indexes: {:?}\n    Actual indexes:   {:?}",
                    table_name, expected_table.indexes, actual_table.indexes
                ));
            }
        }

        differences
    }
}

/// Quote an SQL identifier for interpolation into a statement.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// x and y start at `first`; a NULL position is a verification failure, not a panic.
fn row_position(
    row: &postgres::Row,
    first: usize,
    table: &str,
    column: &str,
    id: i64,
) -> Result<Position, Error> {
    let x: Option<f64> = row.try_get(first)?;
    let y: Option<f64> = row.try_get(first + 1)?;
    match (x, y) {
        (Some(x), Some(y)) => Ok(Position::new(x, y)),
        _ => Err(Error::Verification(format!(
            "Row {}: '{}.{}' is NULL",
            id, table, column
        ))),
    }
}

/// Read-only schema and data checks against the `public` schema.
pub struct SchemaVerifier<'c, C: GenericClient> {
    client: &'c mut C,
}

impl<'c, C: GenericClient> SchemaVerifier<'c, C> {
    pub fn new(client: &'c mut C) -> Self {
        Self { client }
    }

    pub fn table_exists(&mut self, table: &str) -> Result<bool, Error> {
        Ok(self
            .client
            .query_one(
                "SELECT EXISTS (SELECT FROM information_schema.tables WHERE table_schema = 'public' AND table_name = $1)",
                &[&table],
            )?
            .get(0))
    }

    /// `information_schema.columns.data_type` for the column, `None` if it does not exist.
    pub fn column_data_type(&mut self, table: &str, column: &str) -> Result<Option<String>, Error> {
        let row = self.client.query_opt(
            "SELECT data_type::text
             FROM information_schema.columns
             WHERE table_schema = 'public' AND table_name = $1 AND column_name = $2",
            &[&table, &column],
        )?;
        Ok(row.map(|row| row.get(0)))
    }

    /// `pg_type.typname` of the column, `None` if it does not exist.
    pub fn column_type_name(&mut self, table: &str, column: &str) -> Result<Option<String>, Error> {
        let row = self.client.query_opt(
            "SELECT t.typname::text
             FROM pg_type t
             JOIN pg_attribute a ON a.atttypid = t.oid
             JOIN pg_class c ON c.oid = a.attrelid
             WHERE c.relname = $1
               AND a.attname = $2
               AND c.relnamespace = 'public'::regnamespace
               AND a.attnum > 0
               AND NOT a.attisdropped",
            &[&table, &column],
        )?;
        Ok(row.map(|row| row.get(0)))
    }

    pub fn column_type(&mut self, table: &str, column: &str) -> Result<Option<ColumnType>, Error> {
        Ok(self
            .column_type_name(table, column)?
            .map(|name| ColumnType::from_type_name(&name)))
    }

    /// Geometry type and SRID registered for a PostGIS column, `None` for non-geometry columns.
    pub fn geometry_column(
        &mut self,
        table: &str,
        column: &str,
    ) -> Result<Option<GeometryColumn>, Error> {
        let row = self.client.query_opt(
            "SELECT type::text, srid
             FROM geometry_columns
             WHERE f_table_schema = 'public' AND f_table_name = $1 AND f_geometry_column = $2",
            &[&table, &column],
        )?;
        Ok(row.map(|row| GeometryColumn {
            geometry_type: row.get(0),
            srid: row.get(1),
        }))
    }

    pub fn index_exists(&mut self, table: &str, index: &str) -> Result<bool, Error> {
        Ok(self
            .client
            .query_one(
                "SELECT EXISTS (
                    SELECT 1 FROM pg_indexes
                    WHERE schemaname = 'public' AND tablename = $1 AND indexname = $2
                )",
                &[&table, &index],
            )?
            .get(0))
    }

    /// Access method of an index (`btree`, `gist`, ...), `None` if the index does not exist.
    pub fn index_method(&mut self, index: &str) -> Result<Option<String>, Error> {
        let row = self.client.query_opt(
            "SELECT am.amname::text
             FROM pg_class c
             JOIN pg_am am ON am.oid = c.relam
             WHERE c.relname = $1 AND c.relkind = 'i' AND c.relnamespace = 'public'::regnamespace",
            &[&index],
        )?;
        Ok(row.map(|row| row.get(0)))
    }

    pub fn extension_exists(&mut self, extension: &str) -> Result<bool, Error> {
        Ok(self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = $1)",
                &[&extension],
            )?
            .get(0))
    }

    pub fn row_count(&mut self, table: &str) -> Result<i64, Error> {
        Ok(self
            .client
            .query_one(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)), &[])?
            .get(0))
    }

    /// The SELECT list that reads x and y from `column`, depending on how it is stored.
    fn coordinate_exprs(&mut self, table: &str, column: &str) -> Result<(String, String), Error> {
        let column_type = self.column_type(table, column)?.ok_or_else(|| {
            Error::Verification(format!(
                "Column '{}' does not exist in table '{}'",
                column, table
            ))
        })?;
        let quoted = quote_ident(column);
        match column_type {
            ColumnType::Point => Ok((
                format!("{}[0]::float8", quoted),
                format!("{}[1]::float8", quoted),
            )),
            ColumnType::Geometry => Ok((
                format!("ST_X({})::float8", quoted),
                format!("ST_Y({})::float8", quoted),
            )),
            ColumnType::Other(name) => Err(Error::Verification(format!(
                "Column '{}.{}' has type '{}', expected point or geometry",
                table, column, name
            ))),
        }
    }

    /// Every `(id, position)` in the table, ordered by `id`.
    pub fn read_positions(
        &mut self,
        table: &str,
        column: &str,
    ) -> Result<Vec<(i64, Position)>, Error> {
        let (x, y) = self.coordinate_exprs(table, column)?;
        let rows = self.client.query(
            &format!(
                "SELECT id::int8, {}, {} FROM {} ORDER BY id",
                x,
                y,
                quote_ident(table)
            ),
            &[],
        )?;
        let mut positions = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get(0)?;
            positions.push((id, row_position(row, 1, table, column, id)?));
        }
        Ok(positions)
    }

    pub fn position_by_id(
        &mut self,
        table: &str,
        column: &str,
        id: i64,
    ) -> Result<Option<Position>, Error> {
        let (x, y) = self.coordinate_exprs(table, column)?;
        let row = self.client.query_opt(
            &format!(
                "SELECT {}, {} FROM {} WHERE id = $1::int8",
                x,
                y,
                quote_ident(table)
            ),
            &[&id],
        )?;
        row.map(|row| row_position(&row, 0, table, column, id))
            .transpose()
    }

    pub fn assert_table_exists(&mut self, table: &str) -> Result<(), Error> {
        if !self.table_exists(table)? {
            return Err(Error::Verification(format!(
                "Table '{}' does not exist",
                table
            )));
        }
        Ok(())
    }

    pub fn assert_column_type(
        &mut self,
        table: &str,
        column: &str,
        expected: &ColumnType,
    ) -> Result<(), Error> {
        match self.column_type(table, column)? {
            Some(actual) if actual == *expected => Ok(()),
            Some(actual) => Err(Error::Verification(format!(
                "Expected column '{}.{}' to have type '{}', got '{}'",
                table, column, expected, actual
            ))),
            None => Err(Error::Verification(format!(
                "Column '{}' does not exist in table '{}'",
                column, table
            ))),
        }
    }

    pub fn assert_geometry_column(
        &mut self,
        table: &str,
        column: &str,
        geometry_type: &str,
        srid: i32,
    ) -> Result<(), Error> {
        let expected = GeometryColumn {
            geometry_type: geometry_type.to_string(),
            srid,
        };
        match self.geometry_column(table, column)? {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(Error::Verification(format!(
                "Expected '{}.{}' to be GEOMETRY({}, {}), got GEOMETRY({}, {})",
                table, column, expected.geometry_type, expected.srid, actual.geometry_type, actual.srid
            ))),
            None => Err(Error::Verification(format!(
                "Column '{}.{}' is not a registered geometry column",
                table, column
            ))),
        }
    }

    /// Assert that `index` exists on `table`, and uses `method` when one is given.
    pub fn assert_index(
        &mut self,
        table: &str,
        index: &str,
        method: Option<&str>,
    ) -> Result<(), Error> {
        if !self.index_exists(table, index)? {
            return Err(Error::Verification(format!(
                "Index '{}' does not exist on table '{}'",
                index, table
            )));
        }
        if let Some(expected) = method {
            let actual = self.index_method(index)?;
            if actual.as_deref() != Some(expected) {
                return Err(Error::Verification(format!(
                    "Expected index '{}' to use {}, got {}",
                    index,
                    expected,
                    actual.as_deref().unwrap_or("nothing")
                )));
            }
        }
        Ok(())
    }

    pub fn assert_extension(&mut self, extension: &str) -> Result<(), Error> {
        if !self.extension_exists(extension)? {
            return Err(Error::Verification(format!(
                "Extension '{}' is not installed",
                extension
            )));
        }
        Ok(())
    }

    /// Assert the table holds exactly `expected`, compared in `id` order with exact equality.
    pub fn assert_positions(
        &mut self,
        table: &str,
        column: &str,
        expected: &[Position],
    ) -> Result<(), Error> {
        let actual = self.read_positions(table, column)?;
        if actual.len() != expected.len() {
            return Err(Error::Verification(format!(
                "Expected {} rows in '{}', got {}",
                expected.len(),
                table,
                actual.len()
            )));
        }

        let mismatches: Vec<String> = actual
            .iter()
            .zip(expected)
            .filter(|((_, got), want)| got != *want)
            .map(|((id, got), want)| {
                format!("Row {}: expected position {}, got {}", id, want, got)
            })
            .collect();
        if !mismatches.is_empty() {
            return Err(Error::Verification(mismatches.join("\n")));
        }
        Ok(())
    }

    /// Capture every user table in `public` (tables owned by extensions, such as PostGIS's
    /// `spatial_ref_sys`, are left out).
    pub fn capture_schema(&mut self) -> Result<SchemaSnapshot, Error> {
        let table_rows = self.client.query(
            "SELECT c.relname::text
             FROM pg_class c
             WHERE c.relnamespace = 'public'::regnamespace
               AND c.relkind IN ('r', 'p')
               AND NOT EXISTS (
                   SELECT 1 FROM pg_depend d
                   WHERE d.classid = 'pg_class'::regclass AND d.objid = c.oid AND d.deptype = 'e'
               )
             ORDER BY c.relname",
            &[],
        )?;

        let mut tables = HashMap::new();
        for row in table_rows {
            let table_name: String = row.get(0);
            let table = self.capture_table(&table_name)?;
            tables.insert(table_name, table);
        }

        Ok(SchemaSnapshot { tables })
    }

    pub fn capture_table(&mut self, table: &str) -> Result<TableSchema, Error> {
        Ok(TableSchema {
            columns: self.get_columns(table)?,
            indexes: self.get_indexes(table)?,
        })
    }

    /// Differences between `expected` and the live schema.
    pub fn diff_schema(&mut self, expected: &SchemaSnapshot) -> Result<Vec<String>, Error> {
        let actual = self.capture_schema()?;
        Ok(expected.diff(&actual))
    }

    /// Assert that the current schema matches a previously captured snapshot.
    pub fn assert_schema_matches(&mut self, expected: &SchemaSnapshot) -> Result<(), Error> {
        let differences = self.diff_schema(expected)?;
        if !differences.is_empty() {
            return Err(Error::Verification(format!(
                "Schema mismatch detected:\n{}",
                differences.join("\n")
            )));
        }
        Ok(())
    }

    fn get_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>, Error> {
        let pk_rows = self.client.query(
            "SELECT a.attname::text
             FROM pg_index i
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
             JOIN pg_class c ON c.oid = i.indrelid
             WHERE c.relname = $1 AND c.relnamespace = 'public'::regnamespace AND i.indisprimary",
            &[&table],
        )?;
        let pk_columns: Vec<String> = pk_rows.iter().map(|row| row.get(0)).collect();

        let rows = self.client.query(
            "SELECT
                column_name::text,
                data_type::text,
                udt_name::text,
                is_nullable::text,
                column_default::text
             FROM information_schema.columns
             WHERE table_schema = 'public' AND table_name = $1
             ORDER BY ordinal_position",
            &[&table],
        )?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let name: String = row.get(0);
                let is_nullable: String = row.get(3);
                let primary_key = pk_columns.contains(&name);
                ColumnInfo {
                    name,
                    type_name: row.get(1),
                    udt_name: row.get(2),
                    not_null: is_nullable == "NO",
                    default_value: row.get(4),
                    primary_key,
                }
            })
            .collect())
    }

    fn get_indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>, Error> {
        // Primary key indexes are covered by ColumnInfo::primary_key
        let rows = self.client.query(
            "SELECT
                i.relname::text AS index_name,
                ix.indisunique AS is_unique,
                am.amname::text AS method,
                array_agg(a.attname::text ORDER BY array_position(ix.indkey, a.attnum)) AS columns
             FROM pg_class t
             JOIN pg_index ix ON t.oid = ix.indrelid
             JOIN pg_class i ON i.oid = ix.indexrelid
             JOIN pg_am am ON am.oid = i.relam
             JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
             WHERE t.relkind = 'r'
               AND t.relname = $1
               AND t.relnamespace = 'public'::regnamespace
               AND NOT ix.indisprimary
             GROUP BY i.relname, ix.indisunique, am.amname
             ORDER BY i.relname",
            &[&table],
        )?;

        Ok(rows
            .into_iter()
            .map(|row| IndexInfo {
                name: row.get(0),
                unique: row.get(1),
                method: row.get(2),
                columns: row.get(3),
            })
            .collect())
    }
}
