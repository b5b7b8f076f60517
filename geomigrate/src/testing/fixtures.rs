//! The `structures` table as it exists on either side of migration 23.

use crate::verify::Position;
use crate::Error;
use postgres::Client;

const COLUMNS_AFTER_POSITION: &str = "
    floor INTEGER DEFAULT 0 NOT NULL,
    rotation REAL DEFAULT 0,
    scale REAL DEFAULT 1.0,
    owner_id INTEGER,
    zone_id INTEGER,
    is_procedural BOOLEAN DEFAULT FALSE,
    procedural_seed INTEGER,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    properties JSONB,
    model_data JSONB";

/// Install PostGIS if it is not there yet.
pub fn ensure_postgis(client: &mut Client) -> Result<(), Error> {
    client.batch_execute("CREATE EXTENSION IF NOT EXISTS postgis")?;
    Ok(())
}

fn create_structures_table(client: &mut Client, position_type: &str) -> Result<(), Error> {
    client.batch_execute(&format!(
        "DROP TABLE IF EXISTS structures CASCADE;
         CREATE TABLE structures (
             id SERIAL PRIMARY KEY,
             structure_type VARCHAR(50) NOT NULL,
             position {} NOT NULL,{}
         );
         CREATE INDEX IF NOT EXISTS idx_structures_position ON structures USING GIST(position);",
        position_type, COLUMNS_AFTER_POSITION
    ))?;
    Ok(())
}

/// `structures` before the migration: `position POINT NOT NULL` with a GiST index.
/// Any existing `structures` table is dropped first.
pub fn create_point_structures_table(client: &mut Client) -> Result<(), Error> {
    create_structures_table(client, "POINT")
}

/// `structures` after the migration: `position GEOMETRY(POINT, 0) NOT NULL` with a GiST index.
pub fn create_geometry_structures_table(client: &mut Client) -> Result<(), Error> {
    ensure_postgis(client)?;
    create_structures_table(client, "GEOMETRY(POINT, 0)")
}

/// Insert a row into the `POINT` table, returning its id.
pub fn insert_point_structure(
    client: &mut Client,
    structure_type: &str,
    position: Position,
) -> Result<i64, Error> {
    let row = client.query_one(
        "INSERT INTO structures (structure_type, floor, position, rotation, scale)
         VALUES ($1, $2, POINT($3, $4), 0, 1.0)
         RETURNING id::int8",
        &[&structure_type, &0i32, &position.x, &position.y],
    )?;
    Ok(row.get(0))
}

/// Insert a row into the geometry table, returning its id.
pub fn insert_geometry_structure(
    client: &mut Client,
    structure_type: &str,
    position: Position,
) -> Result<i64, Error> {
    let row = client.query_one(
        "INSERT INTO structures (structure_type, floor, position, rotation, scale)
         VALUES ($1, $2, ST_SetSRID(ST_MakePoint($3, $4), 0), 0, 1.0)
         RETURNING id::int8",
        &[&structure_type, &0i32, &position.x, &position.y],
    )?;
    Ok(row.get(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_postgres::get_test_client;

    #[test]
    fn point_table_matches_pre_migration_layout() {
        let mut client = get_test_client();
        create_point_structures_table(&mut client).unwrap();
        let id = insert_point_structure(&mut client, "building_0", Position::new(1.0, 2.0)).unwrap();
        assert_eq!(id, 1);

        let (floor, scale): (i32, f32) = {
            let row = client
                .query_one("SELECT floor, scale FROM structures WHERE id = 1", &[])
                .unwrap();
            (row.get(0), row.get(1))
        };
        assert_eq!(floor, 0);
        assert_eq!(scale, 1.0);
    }

    #[test]
    fn recreating_replaces_existing_table() {
        let mut client = get_test_client();
        create_point_structures_table(&mut client).unwrap();
        insert_point_structure(&mut client, "building_0", Position::new(1.0, 2.0)).unwrap();

        create_geometry_structures_table(&mut client).unwrap();
        let id =
            insert_geometry_structure(&mut client, "building_0", Position::new(1.0, 2.0)).unwrap();
        assert_eq!(id, 1);
    }
}
