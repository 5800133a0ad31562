use super::Database;
use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct CursorRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> CursorRepository<'a> {
    const UPSERT_CURSOR: &'static str =
        "INSERT INTO cursors (name, last_processed_block) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET last_processed_block = excluded.last_processed_block";

    const GET_LAST_PROCESSED_BLOCK: &'static str =
        "SELECT last_processed_block FROM cursors WHERE name = ?1";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn get_last_processed_block(&self, name: &str) -> Result<Option<u64>> {
        let block: Option<i64> = self
            .conn
            .query_row(Self::GET_LAST_PROCESSED_BLOCK, params![name], |row| {
                row.get(0)
            })
            .optional()?;
        block
            .map(|b| u64::try_from(b).context("Negative block number in cursor store"))
            .transpose()
    }

    pub fn update_last_processed_block(&self, name: &str, block_number: u64) -> Result<()> {
        self.conn
            .execute(Self::UPSERT_CURSOR, params![name, i64::try_from(block_number)?])?;
        Ok(())
    }
}

/// One cursor database shared by every poller in the process.
#[derive(Clone)]
pub struct CursorStore {
    db: Arc<Mutex<Database>>,
}

impl CursorStore {
    pub fn open(db_path: &str) -> Result<Self> {
        Ok(Self::from_database(Database::new(db_path)?))
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn load(&self, name: &str) -> Result<Option<u64>> {
        let db = self.lock()?;
        CursorRepository::new(&db.conn).get_last_processed_block(name)
    }

    pub fn save(&self, name: &str, block_number: u64) -> Result<()> {
        let db = self.lock()?;
        CursorRepository::new(&db.conn).update_last_processed_block(name, block_number)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| anyhow::anyhow!("Cursor store lock poisoned"))
    }
}
