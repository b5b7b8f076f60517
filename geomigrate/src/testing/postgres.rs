//! Testing utilities for PostgreSQL migration development.
//!
//! This module provides a test harness for PostgreSQL migration testing: [PostgresTestHarness]

use crate::core::AppliedMigration;
use crate::postgres::PostgresApplicator;
use crate::verify::{ColumnType, Position, SchemaSnapshot, SchemaVerifier};
use crate::{Error, Migration};
use postgres::types::FromSql;
use postgres::Client;
use std::path::Path;

/// A test harness for PostgreSQL migration testing that provides state control and assertion helpers.
///
/// # Example
///
/// ```ignore
/// use geomigrate::structures::{ConvertStructuresPositionToGeometry, POSITION_COLUMN, TABLE};
/// use geomigrate::testing::{fixtures, postgres::PostgresTestHarness};
/// use geomigrate::verify::{ColumnType, Position};
///
/// #[test]
/// fn converts() -> Result<(), geomigrate::Error> {
///     let mut client = get_test_client(); // however you want to connect to a postgres database in your tests
///     fixtures::create_point_structures_table(&mut client)?;
///     fixtures::insert_point_structure(&mut client, "building_0", Position::new(1000.0, 50.0))?;
///
///     let mut harness = PostgresTestHarness::new(client);
///     harness.migrate_up(&ConvertStructuresPositionToGeometry)?;
///
///     harness.assert_column_type(TABLE, POSITION_COLUMN, &ColumnType::Geometry)?;
///     harness.assert_positions(TABLE, POSITION_COLUMN, &[Position::new(1000.0, 50.0)])?;
///     Ok(())
/// }
/// ```
pub struct PostgresTestHarness {
    client: Client,
    applicator: PostgresApplicator,
}

impl PostgresTestHarness {
    /// Create a new test harness around a PostgreSQL client, which can be obtained any way you like.
    pub fn new(client: Client) -> Self {
        Self::with_applicator(client, PostgresApplicator::new())
    }

    /// Use a preconfigured applicator, e.g. one with hooks installed.
    pub fn with_applicator(client: Client, applicator: PostgresApplicator) -> Self {
        Self { client, applicator }
    }

    /// Apply the migration's forward change; a failed migration is returned as `Err`.
    pub fn migrate_up(&mut self, migration: &dyn Migration) -> Result<AppliedMigration, Error> {
        self.applicator
            .upgrade(&mut self.client, migration)?
            .into_result()
    }

    /// Roll the migration back; a failed migration is returned as `Err`.
    pub fn migrate_down(&mut self, migration: &dyn Migration) -> Result<AppliedMigration, Error> {
        self.applicator
            .downgrade(&mut self.client, migration)?
            .into_result()
    }

    /// Apply a script file in the direction named by its file name.
    pub fn apply_file(&mut self, path: impl AsRef<Path>) -> Result<AppliedMigration, Error> {
        self.applicator.apply_file(&mut self.client, path)
    }

    /// Execute SQL (for setting up test data). Several statements may be given at once.
    pub fn execute(&mut self, sql: &str) -> Result<(), Error> {
        self.client.batch_execute(sql)?;
        Ok(())
    }

    /// Query a single value from the database.
    ///
    /// Note: The type `T` must be an owned type (e.g., `String` not `&str`).
    pub fn query_one<T>(&mut self, sql: &str) -> Result<T, Error>
    where
        T: for<'a> FromSql<'a>,
    {
        let row = self.client.query_one(sql, &[])?;
        Ok(row.try_get(0)?)
    }

    /// Query all values from a single-column result.
    ///
    /// Note: The type `T` must be an owned type (e.g., `String` not `&str`).
    pub fn query_all<T>(&mut self, sql: &str) -> Result<Vec<T>, Error>
    where
        T: for<'a> FromSql<'a>,
    {
        let rows = self.client.query(sql, &[])?;
        rows.iter()
            .map(|row| row.try_get(0).map_err(Error::from))
            .collect()
    }

    /// Query with a custom row mapper.
    pub fn query_map<T, F>(&mut self, sql: &str, mut f: F) -> Result<Vec<T>, Error>
    where
        F: FnMut(postgres::Row) -> Result<T, Error>,
    {
        let rows = self.client.query(sql, &[])?;
        rows.into_iter().map(|row| f(row)).collect()
    }

    /// Assert that a table exists in the database.
    pub fn assert_table_exists(&mut self, table_name: &str) -> Result<(), Error> {
        self.verifier().assert_table_exists(table_name)
    }

    /// Assert that a table does not exist in the database.
    pub fn assert_table_not_exists(&mut self, table_name: &str) -> Result<(), Error> {
        if self.verifier().table_exists(table_name)? {
            return Err(Error::Verification(format!(
                "Table '{}' exists but should not",
                table_name
            )));
        }
        Ok(())
    }

    /// Assert that a column exists in a table.
    pub fn assert_column_exists(
        &mut self,
        table_name: &str,
        column_name: &str,
    ) -> Result<(), Error> {
        if self
            .verifier()
            .column_type_name(table_name, column_name)?
            .is_none()
        {
            return Err(Error::Verification(format!(
                "Column '{}' does not exist in table '{}'",
                column_name, table_name
            )));
        }
        Ok(())
    }

    pub fn assert_column_type(
        &mut self,
        table_name: &str,
        column_name: &str,
        expected: &ColumnType,
    ) -> Result<(), Error> {
        self.verifier()
            .assert_column_type(table_name, column_name, expected)
    }

    /// Assert that an index exists on a table.
    pub fn assert_index_exists(&mut self, table_name: &str, index_name: &str) -> Result<(), Error> {
        self.verifier().assert_index(table_name, index_name, None)
    }

    pub fn assert_positions(
        &mut self,
        table_name: &str,
        column_name: &str,
        expected: &[Position],
    ) -> Result<(), Error> {
        self.verifier()
            .assert_positions(table_name, column_name, expected)
    }

    /// Capture the current PostgreSQL database schema as a snapshot.
    pub fn capture_schema(&mut self) -> Result<SchemaSnapshot, Error> {
        self.verifier().capture_schema()
    }

    /// Assert that the current schema matches a previously captured snapshot.
    pub fn assert_schema_matches(&mut self, expected: &SchemaSnapshot) -> Result<(), Error> {
        self.verifier().assert_schema_matches(expected)
    }

    /// A verifier borrowing the harness's connection.
    pub fn verifier(&mut self) -> SchemaVerifier<'_, Client> {
        SchemaVerifier::new(&mut self.client)
    }

    /// Get a mutable reference to the underlying client for advanced usage.
    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }
}

#[cfg(test)]
mod tests {
    use crate::structures::{ConvertStructuresPositionToGeometry, POSITION_COLUMN, TABLE};
    use crate::test_postgres::get_test_client;
    use crate::testing::fixtures;
    use crate::Direction;

    use super::*;

    struct TestMigration1;
    impl Migration for TestMigration1 {
        fn version(&self) -> u32 {
            1
        }
        fn postgres_up(&self, tx: &mut postgres::Transaction) -> Result<(), Error> {
            tx.execute(
                "CREATE TABLE zones (id SERIAL PRIMARY KEY, name VARCHAR(255))",
                &[],
            )?;
            Ok(())
        }
        fn postgres_down(&self, tx: &mut postgres::Transaction) -> Result<(), Error> {
            tx.execute("DROP TABLE zones", &[])?;
            Ok(())
        }
        fn name(&self) -> String {
            "create_zones_table".to_string()
        }
    }

    #[test]
    fn test_migrate_up_and_down() {
        let client = get_test_client();
        let mut harness = PostgresTestHarness::new(client);

        harness.assert_table_not_exists("zones").unwrap();

        let applied = harness.migrate_up(&TestMigration1).unwrap();
        assert_eq!(applied.version, 1);
        assert_eq!(applied.direction, Direction::Up);
        harness.assert_table_exists("zones").unwrap();
        harness.assert_column_exists("zones", "name").unwrap();

        harness.migrate_down(&TestMigration1).unwrap();
        harness.assert_table_not_exists("zones").unwrap();
    }

    #[test]
    fn test_migrate_up_surfaces_failure() {
        let client = get_test_client();
        let mut harness = PostgresTestHarness::new(client);

        harness.migrate_up(&TestMigration1).unwrap();
        // The table already exists, so a second run fails
        let err = harness.migrate_up(&TestMigration1).unwrap_err();
        assert!(matches!(err, Error::Postgres(_)));
    }

    #[test]
    fn test_query_helpers() {
        let client = get_test_client();
        let mut harness = PostgresTestHarness::new(client);
        harness.migrate_up(&TestMigration1).unwrap();

        harness
            .execute("INSERT INTO zones (name) VALUES ('alpha'); INSERT INTO zones (name) VALUES ('beta')")
            .unwrap();

        let count: i64 = harness.query_one("SELECT COUNT(*) FROM zones").unwrap();
        assert_eq!(count, 2);

        let names: Vec<String> = harness
            .query_all("SELECT name FROM zones ORDER BY id")
            .unwrap();
        assert_eq!(names, vec!["alpha", "beta"]);

        let pairs = harness
            .query_map("SELECT id, name FROM zones ORDER BY id", |row| {
                let id: i32 = row.get(0);
                let name: String = row.get(1);
                Ok((id, name))
            })
            .unwrap();
        assert_eq!(pairs, vec![(1, "alpha".to_string()), (2, "beta".to_string())]);
    }

    #[test]
    fn test_query_one_type_mismatch_is_an_error() {
        let client = get_test_client();
        let mut harness = PostgresTestHarness::new(client);
        let result = harness.query_one::<String>("SELECT 1::int4");
        assert!(matches!(result, Err(Error::Postgres(_))));
    }

    #[test]
    fn test_assert_column_exists_failure() {
        let client = get_test_client();
        let mut harness = PostgresTestHarness::new(client);
        harness.migrate_up(&TestMigration1).unwrap();

        let err = harness
            .assert_column_exists("zones", "nonexistent")
            .unwrap_err();
        assert_eq!(
            err,
            Error::Verification("Column 'nonexistent' does not exist in table 'zones'".to_string())
        );
    }

    #[test]
    fn test_assert_index_exists_failure() {
        let mut client = get_test_client();
        fixtures::create_point_structures_table(&mut client).unwrap();
        let mut harness = PostgresTestHarness::new(client);

        harness
            .assert_index_exists(TABLE, "idx_structures_position")
            .unwrap();
        let err = harness
            .assert_index_exists(TABLE, "idx_structures_zone")
            .unwrap_err();
        assert_eq!(
            err,
            Error::Verification(
                "Index 'idx_structures_zone' does not exist on table 'structures'".to_string()
            )
        );
    }

    #[test]
    fn test_schema_snapshot_detects_changes() {
        let client = get_test_client();
        let mut harness = PostgresTestHarness::new(client);
        harness.migrate_up(&TestMigration1).unwrap();

        let snapshot = harness.capture_schema().unwrap();
        harness.assert_schema_matches(&snapshot).unwrap();

        harness
            .execute("ALTER TABLE zones ADD COLUMN owner_id INTEGER")
            .unwrap();
        let err = harness.assert_schema_matches(&snapshot).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Schema mismatch detected:"));
        assert!(message.contains("Table 'zones' column mismatch"));

        harness.execute("CREATE TABLE extra (id INT)").unwrap();
        let message = harness
            .assert_schema_matches(&snapshot)
            .unwrap_err()
            .to_string();
        assert!(message.contains("Unexpected table 'extra' found"));
    }

    #[test]
    fn test_apply_file_then_migrate_down() {
        let mut client = get_test_client();
        fixtures::create_point_structures_table(&mut client).unwrap();
        fixtures::insert_point_structure(&mut client, "building_0", Position::new(1.5, -2.5))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("000023_convert_structures_position_to_geometry.up.sql");
        std::fs::write(&path, crate::structures::UP_SQL).unwrap();

        let mut harness = PostgresTestHarness::new(client);
        let applied = harness.apply_file(&path).unwrap();
        assert_eq!(applied.version, 23);
        harness
            .assert_column_type(TABLE, POSITION_COLUMN, &ColumnType::Geometry)
            .unwrap();

        // The embedded migration sees the column already converted on the way up
        let report_up = harness.migrate_up(&ConvertStructuresPositionToGeometry);
        assert!(report_up.is_ok());

        harness
            .migrate_down(&ConvertStructuresPositionToGeometry)
            .unwrap();
        harness
            .assert_positions(TABLE, POSITION_COLUMN, &[Position::new(1.5, -2.5)])
            .unwrap();
    }
}
