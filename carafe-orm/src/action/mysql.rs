//! MySQL executor.

use async_trait::async_trait;

use super::Action;
use crate::{
    database::{Connection, Database},
    statement::Params,
};

/// [`Action`] for MySQL and MariaDB.
#[derive(Debug)]
pub struct MySqlAction {
    connection: Connection,
}

impl MySqlAction {
    pub fn new(database: Database) -> Self {
        Self { connection: Connection::new(database) }
    }
}

#[async_trait]
impl Action for MySqlAction {
    fn connection(&self) -> &Connection {
        &self.connection
    }

    /// MySQL rejects text-typed binds in `LIMIT`, so the validated integers are inlined.
    fn limit_clause(&self, limit: Option<u64>, offset: Option<u64>) -> (String, Params) {
        let sql = match (limit, offset) {
            (Some(limit), Some(offset)) => format!("LIMIT {} OFFSET {}", limit, offset),
            (Some(limit), None) => format!("LIMIT {}", limit),
            // largest row count MySQL accepts
            (None, Some(offset)) => format!("LIMIT 18446744073709551615 OFFSET {}", offset),
            (None, None) => String::new(),
        };
        (sql, Params::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn renders_limit_and_offset_as_literals() -> Result<(), Box<dyn std::error::Error>> {
        // rendering only; the sqlite pool never sees the clause
        let db = Database::builder().max_connections(1).connect("sqlite::memory:").await?;
        let action = MySqlAction::new(db);

        let (sql, params) = action.limit_clause(Some(10), Some(20));
        assert_eq!(sql, "LIMIT 10 OFFSET 20");
        assert!(params.is_empty());
        assert_eq!(action.limit_clause(Some(5), None).0, "LIMIT 5");
        assert_eq!(action.limit_clause(None, Some(3)).0, "LIMIT 18446744073709551615 OFFSET 3");
        assert_eq!(action.limit_clause(None, None).0, "");
        Ok(())
    }
}
