//! Convenience macros for defining migrations.

/// Define an SQL-only migration.
///
/// Each entry is executed with [`batch_execute`](postgres::Transaction::batch_execute), so an
/// entry may hold several statements, such as a whole script pulled in with `include_str!`.
///
/// # Basic Usage
///
/// ```
/// use geomigrate::sql_migration;
///
/// sql_migration!(CreateZonesTable, 1, "create_zones",
///     up: "CREATE TABLE zones (id SERIAL PRIMARY KEY, name TEXT NOT NULL)",
///     down: "DROP TABLE zones"
/// );
/// ```
///
/// This expands to a unit struct `CreateZonesTable` that implements the
/// [`Migration`](crate::Migration) trait. Its [checksum](crate::Migration::checksum) is the
/// SHA-256 of the entries for that direction, joined by newlines.
///
/// # Multiple Statements
///
/// ```
/// use geomigrate::sql_migration;
///
/// sql_migration!(InitialSchema, 1, "initial_schema",
///     up: [
///         "CREATE TABLE zones (id SERIAL PRIMARY KEY, name TEXT)",
///         "CREATE TABLE structures (id SERIAL PRIMARY KEY, zone_id INTEGER)",
///         "CREATE INDEX idx_structures_zone ON structures(zone_id)"
///     ],
///     down: [
///         "DROP INDEX idx_structures_zone",
///         "DROP TABLE structures",
///         "DROP TABLE zones"
///     ]
/// );
/// ```
///
/// # Up-Only Migrations
///
/// Omit `down` and the migration reports [`Error::Irreversible`](crate::Error::Irreversible)
/// when downgraded.
///
/// ```
/// use geomigrate::sql_migration;
///
/// sql_migration!(EnablePostgis, 1, "enable_postgis",
///     up: "CREATE EXTENSION IF NOT EXISTS postgis"
/// );
/// ```
///
/// # Preconditions
///
/// A trailing `precondition:` takes anything callable as
/// `Fn(&mut Transaction, Direction) -> Result<Precondition, Error>`:
///
/// ```
/// use geomigrate::postgres::PostgresTransaction;
/// use geomigrate::verify::SchemaVerifier;
/// use geomigrate::{sql_migration, Direction, Error, Precondition};
///
/// fn zones_table(tx: &mut PostgresTransaction, direction: Direction) -> Result<Precondition, Error> {
///     let exists = SchemaVerifier::new(tx).table_exists("zones")?;
///     Ok(match (direction, exists) {
///         (Direction::Up, true) | (Direction::Down, false) => Precondition::AlreadySatisfied,
///         _ => Precondition::NeedsApply,
///     })
/// }
///
/// sql_migration!(CreateZonesTable, 1, "create_zones",
///     up: "CREATE TABLE zones (id SERIAL PRIMARY KEY)",
///     down: "DROP TABLE zones",
///     precondition: zones_table
/// );
/// ```
///
/// For migrations that need to query data and transform it in Rust, implement the
/// [`Migration`](crate::Migration) trait directly instead.
#[macro_export]
macro_rules! sql_migration {
    // Array of entries with down
    ($(#[$meta:meta])* $name:ident, $version:expr, $migration_name:expr,
        up: [$($up_sql:expr),* $(,)?],
        down: [$($down_sql:expr),* $(,)?]
        $(, precondition: $precondition:expr)? $(,)?
    ) => {
        $crate::__sql_migration_impl!($(#[$meta])* $name, $version, $migration_name,
            up: [$($up_sql),*],
            down: [$($down_sql),*]
            $(, precondition: $precondition)?
        );
    };

    // Single entry with down
    ($(#[$meta:meta])* $name:ident, $version:expr, $migration_name:expr,
        up: $up_sql:expr,
        down: $down_sql:expr
        $(, precondition: $precondition:expr)? $(,)?
    ) => {
        $crate::__sql_migration_impl!($(#[$meta])* $name, $version, $migration_name,
            up: [$up_sql],
            down: [$down_sql]
            $(, precondition: $precondition)?
        );
    };

    // Array of entries, no down
    ($(#[$meta:meta])* $name:ident, $version:expr, $migration_name:expr,
        up: [$($up_sql:expr),* $(,)?]
        $(, precondition: $precondition:expr)? $(,)?
    ) => {
        $crate::__sql_migration_impl_no_down!($(#[$meta])* $name, $version, $migration_name,
            up: [$($up_sql),*]
            $(, precondition: $precondition)?
        );
    };

    // Single entry, no down
    ($(#[$meta:meta])* $name:ident, $version:expr, $migration_name:expr,
        up: $up_sql:expr
        $(, precondition: $precondition:expr)? $(,)?
    ) => {
        $crate::__sql_migration_impl_no_down!($(#[$meta])* $name, $version, $migration_name,
            up: [$up_sql]
            $(, precondition: $precondition)?
        );
    };
}

/// Internal implementation macro with down methods.
#[macro_export]
#[doc(hidden)]
macro_rules! __sql_migration_impl {
    ($(#[$meta:meta])* $name:ident, $version:expr, $migration_name:expr,
        up: [$($up_sql:expr),*],
        down: [$($down_sql:expr),*]
        $(, precondition: $precondition:expr)?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl $crate::Migration for $name {
            fn version(&self) -> u32 {
                $version
            }

            fn name(&self) -> String {
                $migration_name.to_string()
            }

            fn postgres_up(
                &self,
                tx: &mut $crate::postgres::PostgresTransaction,
            ) -> Result<(), $crate::Error> {
                $(tx.batch_execute($up_sql)?;)*
                Ok(())
            }

            fn postgres_down(
                &self,
                tx: &mut $crate::postgres::PostgresTransaction,
            ) -> Result<(), $crate::Error> {
                $(tx.batch_execute($down_sql)?;)*
                Ok(())
            }

            $(
            fn postgres_precondition(
                &self,
                tx: &mut $crate::postgres::PostgresTransaction,
                direction: $crate::Direction,
            ) -> Result<$crate::Precondition, $crate::Error> {
                ($precondition)(tx, direction)
            }
            )?

            fn checksum(&self, direction: $crate::Direction) -> String {
                let entries: &[&str] = match direction {
                    $crate::Direction::Up => &[$($up_sql),*],
                    $crate::Direction::Down => &[$($down_sql),*],
                };
                $crate::script::sql_checksum(&entries.join("\n"))
            }
        }
    };
}

/// Internal implementation macro without down methods.
#[macro_export]
#[doc(hidden)]
macro_rules! __sql_migration_impl_no_down {
    ($(#[$meta:meta])* $name:ident, $version:expr, $migration_name:expr,
        up: [$($up_sql:expr),*]
        $(, precondition: $precondition:expr)?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl $crate::Migration for $name {
            fn version(&self) -> u32 {
                $version
            }

            fn name(&self) -> String {
                $migration_name.to_string()
            }

            fn postgres_up(
                &self,
                tx: &mut $crate::postgres::PostgresTransaction,
            ) -> Result<(), $crate::Error> {
                $(tx.batch_execute($up_sql)?;)*
                Ok(())
            }

            $(
            fn postgres_precondition(
                &self,
                tx: &mut $crate::postgres::PostgresTransaction,
                direction: $crate::Direction,
            ) -> Result<$crate::Precondition, $crate::Error> {
                ($precondition)(tx, direction)
            }
            )?

            fn checksum(&self, direction: $crate::Direction) -> String {
                match direction {
                    $crate::Direction::Up => {
                        let entries: &[&str] = &[$($up_sql),*];
                        $crate::script::sql_checksum(&entries.join("\n"))
                    }
                    $crate::Direction::Down => $crate::script::sql_checksum(""),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::postgres::{PostgresApplicator, PostgresTransaction};
    use crate::script::sql_checksum;
    use crate::test_postgres::get_test_client;
    use crate::verify::SchemaVerifier;
    use crate::{Direction, Error, Migration, Precondition};

    #[test]
    fn test_macro_compiles_shared_sql() {
        sql_migration!(TestMigration1, 1, "test_migration",
            up: "CREATE TABLE test (id INTEGER PRIMARY KEY)",
            down: "DROP TABLE test"
        );

        let m = TestMigration1;
        assert_eq!(m.version(), 1);
        assert_eq!(m.name(), "test_migration");
        assert_eq!(
            m.checksum(Direction::Up),
            sql_checksum("CREATE TABLE test (id INTEGER PRIMARY KEY)")
        );
        assert_eq!(m.checksum(Direction::Down), sql_checksum("DROP TABLE test"));
    }

    #[test]
    fn test_macro_compiles_up_only() {
        sql_migration!(
            /// Documented migration.
            TestMigration2, 2, "test_migration_2",
            up: "CREATE TABLE test2 (id INTEGER PRIMARY KEY)"
        );

        let m = TestMigration2;
        assert_eq!(m.version(), 2);
        assert_eq!(m.name(), "test_migration_2");
    }

    #[test]
    fn test_macro_multi_statement_checksum_joins_entries() {
        sql_migration!(TestMigration3, 3, "multi_statement",
            up: [
                "CREATE TABLE a (id INTEGER PRIMARY KEY)",
                "CREATE TABLE b (id INTEGER PRIMARY KEY)",
            ],
            down: [
                "DROP TABLE b",
                "DROP TABLE a"
            ]
        );

        let m = TestMigration3;
        assert_eq!(m.version(), 3);
        assert_eq!(
            m.checksum(Direction::Down),
            sql_checksum("DROP TABLE b\nDROP TABLE a")
        );
    }

    #[test]
    fn test_macro_postgres_runtime() {
        sql_migration!(CreateZones, 1, "create_zones",
            up: [
                "CREATE TABLE zones (id SERIAL PRIMARY KEY, name TEXT)",
                "CREATE INDEX idx_zones_name ON zones(name); INSERT INTO zones (name) VALUES ('spawn')"
            ],
            down: [
                "DROP INDEX idx_zones_name",
                "DROP TABLE zones"
            ]
        );

        let mut client = get_test_client();
        let applicator = PostgresApplicator::new();

        applicator
            .upgrade(&mut client, &CreateZones)
            .unwrap()
            .into_result()
            .unwrap();
        let mut verifier = SchemaVerifier::new(&mut client);
        assert!(verifier.index_exists("zones", "idx_zones_name").unwrap());
        assert_eq!(verifier.row_count("zones").unwrap(), 1);

        applicator
            .downgrade(&mut client, &CreateZones)
            .unwrap()
            .into_result()
            .unwrap();
        assert!(!SchemaVerifier::new(&mut client)
            .table_exists("zones")
            .unwrap());
    }

    #[test]
    fn test_macro_up_only_is_irreversible() {
        sql_migration!(CreateScratch, 7, "create_scratch",
            up: "CREATE TABLE scratch (id INTEGER)"
        );

        let mut client = get_test_client();
        let applicator = PostgresApplicator::new();
        applicator
            .upgrade(&mut client, &CreateScratch)
            .unwrap()
            .into_result()
            .unwrap();
        let err = applicator
            .downgrade(&mut client, &CreateScratch)
            .unwrap()
            .into_result()
            .unwrap_err();
        assert_eq!(
            err,
            Error::Irreversible {
                version: 7,
                name: "create_scratch".to_string()
            }
        );
    }

    #[test]
    fn test_macro_precondition_skips() {
        fn scratch_exists(
            tx: &mut PostgresTransaction,
            _direction: Direction,
        ) -> Result<Precondition, Error> {
            if SchemaVerifier::new(tx).table_exists("scratch")? {
                Ok(Precondition::AlreadySatisfied)
            } else {
                Ok(Precondition::NeedsApply)
            }
        }

        sql_migration!(CreateScratch, 8, "create_scratch",
            up: "CREATE TABLE scratch (id INTEGER)",
            precondition: scratch_exists
        );

        let mut client = get_test_client();
        let applicator = PostgresApplicator::new();
        let first = applicator.upgrade(&mut client, &CreateScratch).unwrap();
        assert!(first.is_success());
        assert!(!first.skipped);

        // Without the precondition this would fail with "relation already exists"
        let second = applicator.upgrade(&mut client, &CreateScratch).unwrap();
        assert!(second.is_success());
        assert!(second.skipped);
    }
}
