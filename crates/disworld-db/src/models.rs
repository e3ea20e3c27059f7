/// Database row types. These map directly to SQLite rows.

#[derive(Debug, Clone, PartialEq)]
pub struct MapRow {
    pub channel_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationRow {
    pub channel_id: String,
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Outcome of writing a user's location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}
