#![cfg_attr(docsrs, feature(doc_cfg))]
//! `geomigrate` applies a single SQL migration to a PostgreSQL/PostGIS database and verifies the
//! schema and the data on both sides of it.
//!
//! Core concepts:
//! - A migration is an up script and an optional down script, applied one at a time and on
//!   request. There is no version table: a [Precondition] inspects the live schema to decide
//!   whether the script still needs to run.
//! - Every application runs in its own transaction. PostgreSQL's transactional DDL means a
//!   failing script leaves the schema exactly as it was.
//! - Verification goes through the catalog (`information_schema`, `pg_type`, `pg_attribute`,
//!   `pg_class`, `pg_indexes`, PostGIS `geometry_columns`) and the rows themselves.
//!
//! # Workflow
//!
//! The shipped migration, [ConvertStructuresPositionToGeometry](structures::ConvertStructuresPositionToGeometry),
//! converts `structures.position` from `POINT` to `GEOMETRY(POINT, 0)`. Checking it follows the
//! same steps every time:
//!
//! 1. set up the schema ([testing::fixtures], with the `testing` feature)
//! 2. verify the pre-state ([verify::SchemaVerifier])
//! 3. apply the migration ([postgres::PostgresApplicator])
//! 4. verify the post-state
//! 5. apply the rollback
//! 6. verify that the pre-state is restored ([verify::SchemaSnapshot])
//!
//! ```ignore
//! use geomigrate::postgres::PostgresApplicator;
//! use geomigrate::structures::{ConvertStructuresPositionToGeometry, POSITION_COLUMN, TABLE};
//! use geomigrate::verify::{ColumnType, SchemaVerifier};
//!
//! let applicator = PostgresApplicator::new();
//! applicator
//!     .upgrade(&mut client, &ConvertStructuresPositionToGeometry)?
//!     .into_result()?;
//! SchemaVerifier::new(&mut client).assert_column_type(TABLE, POSITION_COLUMN, &ColumnType::Geometry)?;
//! ```
//!
//! # Feature flags
//! - `tracing` - spans and events for every applied migration.
//! - `testing` - the [testing] harness and `structures` fixtures.

mod core;
pub use crate::core::{
    AppliedMigration, Direction, Migration, MigrationFailure, MigrationReport, Precondition,
};

mod error;
pub use crate::error::Error;

#[macro_use]
mod macros;

pub mod config;
pub mod postgres;
pub mod script;
pub mod structures;
pub mod verify;

#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;

#[cfg(test)]
pub(crate) mod test_postgres;
