//! SQLite executor.

use async_trait::async_trait;

use super::Action;
use crate::database::{Connection, Database};

/// [`Action`] for SQLite. Generated keys come from `last_insert_rowid()`.
#[derive(Debug)]
pub struct SqliteAction {
    connection: Connection,
}

impl SqliteAction {
    pub fn new(database: Database) -> Self {
        Self { connection: Connection::new(database) }
    }
}

#[async_trait]
impl Action for SqliteAction {
    fn connection(&self) -> &Connection {
        &self.connection
    }
}
