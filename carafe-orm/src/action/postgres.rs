//! PostgreSQL executor.

use async_trait::async_trait;

use super::Action;
use crate::{
    Error, Value,
    database::{Connection, Database},
    value::Fields,
};

/// [`Action`] for PostgreSQL.
///
/// Inserts use `RETURNING` to read the generated key, since the server does
/// not report a last insert id.
#[derive(Debug)]
pub struct PostgresAction {
    connection: Connection,
}

impl PostgresAction {
    pub fn new(database: Database) -> Self {
        Self { connection: Connection::new(database) }
    }
}

#[async_trait]
impl Action for PostgresAction {
    fn connection(&self) -> &Connection {
        &self.connection
    }

    async fn insert(&self, table: &str, fields: &Fields, returning: Option<&str>) -> Result<Option<Value>, Error> {
        let mut statement = self.insert_statement(table, fields);

        let Some(key) = returning else {
            self.connection.execute(&statement).await?;
            return Ok(None);
        };

        statement.sql = format!("{} RETURNING {}", statement.sql, self.quote_identifier(key));
        let row = self.connection.fetch_optional(&statement).await?;
        Ok(row.and_then(|mut r| r.remove(key)))
    }
}
