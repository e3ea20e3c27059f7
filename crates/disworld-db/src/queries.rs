use crate::Database;
use crate::models::{LocationRow, MapRow, Upsert};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

impl Database {
    // -- Maps --

    pub fn insert_map(&self, channel_id: &str, message_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO maps (channel_id, message_id) VALUES (?1, ?2)",
                (channel_id, message_id),
            )?;
            Ok(())
        })
    }

    pub fn get_maps(&self) -> Result<Vec<MapRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT channel_id, message_id FROM maps")?;
            let rows = stmt
                .query_map([], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_map(&self, channel_id: &str) -> Result<Option<MapRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT channel_id, message_id FROM maps WHERE channel_id = ?1",
                    [channel_id],
                    map_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Delete a channel's map together with every location pinned on it.
    /// Both tables change in one transaction. Returns the number of
    /// locations removed, or `None` if the channel had no map.
    pub fn delete_map(&self, channel_id: &str) -> Result<Option<usize>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let maps = tx.execute("DELETE FROM maps WHERE channel_id = ?1", [channel_id])?;
            let locations = tx.execute("DELETE FROM locations WHERE channel_id = ?1", [channel_id])?;
            tx.commit()?;
            Ok((maps > 0).then_some(locations))
        })
    }

    // -- Locations --

    pub fn get_locations(&self) -> Result<Vec<LocationRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT channel_id, user_id, latitude, longitude FROM locations")?;
            let rows = stmt
                .query_map([], location_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_channel_locations(&self, channel_id: &str) -> Result<Vec<LocationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT channel_id, user_id, latitude, longitude FROM locations WHERE channel_id = ?1",
            )?;
            let rows = stmt
                .query_map([channel_id], location_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_location(&self, channel_id: &str, user_id: &str) -> Result<Option<LocationRow>> {
        self.with_conn(|conn| query_location(conn, channel_id, user_id))
    }

    /// Insert the user's location, or move it if one is already stored.
    pub fn upsert_location(
        &self,
        channel_id: &str,
        user_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Upsert> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let outcome = if query_location(&tx, channel_id, user_id)?.is_some() {
                tx.execute(
                    "UPDATE locations SET latitude = ?1, longitude = ?2 WHERE channel_id = ?3 AND user_id = ?4",
                    rusqlite::params![latitude, longitude, channel_id, user_id],
                )?;
                Upsert::Updated
            } else {
                tx.execute(
                    "INSERT INTO locations (channel_id, user_id, latitude, longitude) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![channel_id, user_id, latitude, longitude],
                )?;
                Upsert::Inserted
            };
            tx.commit()?;
            Ok(outcome)
        })
    }

    /// Returns `false` when there was nothing to delete.
    pub fn delete_location(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM locations WHERE channel_id = ?1 AND user_id = ?2",
                (channel_id, user_id),
            )?;
            Ok(removed > 0)
        })
    }

    /// Remove locations whose channel no longer has a map.
    pub fn delete_orphan_locations(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM locations WHERE channel_id NOT IN (SELECT channel_id FROM maps)",
                [],
            )?;
            Ok(removed)
        })
    }
}

fn query_location(conn: &Connection, channel_id: &str, user_id: &str) -> Result<Option<LocationRow>> {
    let row = conn
        .query_row(
            "SELECT channel_id, user_id, latitude, longitude FROM locations WHERE channel_id = ?1 AND user_id = ?2",
            (channel_id, user_id),
            location_row,
        )
        .optional()?;
    Ok(row)
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<MapRow> {
    Ok(MapRow {
        channel_id: row.get(0)?,
        message_id: row.get(1)?,
    })
}

fn location_row(row: &Row<'_>) -> rusqlite::Result<LocationRow> {
    Ok(LocationRow {
        channel_id: row.get(0)?,
        user_id: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
    })
}
