//! The `structures.position` conversion from PostgreSQL `POINT` to PostGIS `GEOMETRY(POINT, 0)`.
//!
//! The SQL is embedded from `database/migrations/`, the same files the CLI and
//! [PostgresApplicator::apply_file](crate::postgres::PostgresApplicator::apply_file) read from disk.

use crate::core::{Direction, Precondition};
use crate::error::Error;
use crate::postgres::PostgresTransaction;
use crate::verify::{ColumnType, SchemaVerifier};

pub const TABLE: &str = "structures";
pub const POSITION_COLUMN: &str = "position";
pub const POSITION_INDEX: &str = "idx_structures_position";
pub const MIGRATION_VERSION: u32 = 23;
pub const MIGRATION_STEM: &str = "000023_convert_structures_position_to_geometry";

pub const UP_SQL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../database/migrations/000023_convert_structures_position_to_geometry.up.sql"
));
pub const DOWN_SQL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../database/migrations/000023_convert_structures_position_to_geometry.down.sql"
));

/// The column type each direction leaves behind.
pub fn target_column_type(direction: Direction) -> ColumnType {
    match direction {
        Direction::Up => ColumnType::Geometry,
        Direction::Down => ColumnType::Point,
    }
}

/// Satisfied when `structures.position` already has the direction's target type.
/// A missing column is left to the script, which fails with PostgreSQL's own error.
fn position_precondition(
    tx: &mut PostgresTransaction,
    direction: Direction,
) -> Result<Precondition, Error> {
    let current = SchemaVerifier::new(tx).column_type(TABLE, POSITION_COLUMN)?;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        current = ?current,
        target = %target_column_type(direction),
        "Checked structures.position type"
    );

    if current == Some(target_column_type(direction)) {
        Ok(Precondition::AlreadySatisfied)
    } else {
        Ok(Precondition::NeedsApply)
    }
}

sql_migration!(
    /// Migration 23: `structures.position` becomes `GEOMETRY(POINT, 0)`, and back on downgrade.
    /// The GiST index `idx_structures_position` is rebuilt for the new type in both directions.
    ConvertStructuresPositionToGeometry,
    MIGRATION_VERSION,
    "convert_structures_position_to_geometry",
    up: UP_SQL,
    down: DOWN_SQL,
    precondition: position_precondition
);
