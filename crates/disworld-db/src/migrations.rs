use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS maps (
            channel_id  TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS locations (
            channel_id  TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            latitude    REAL NOT NULL,
            longitude   REAL NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_locations_channel_user
            ON locations(channel_id, user_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
