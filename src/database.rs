//! Database management on a single server

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::connection::{call_within, Channel};
use crate::types::{ClientError, Result};
use crate::wire::{Request, Response};

/// Create, look up and list databases
#[derive(Clone)]
pub struct DatabaseManager {
    channel: Arc<dyn Channel>,
    timeout: Duration,
}

impl DatabaseManager {
    pub(crate) fn new(channel: Arc<dyn Channel>, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    pub async fn get(&self, name: &str) -> Result<Database> {
        if self.contains(name).await? {
            Ok(Database { name: name.to_string(), manager: self.clone() })
        } else {
            Err(database_not_found(name))
        }
    }

    pub async fn contains(&self, name: &str) -> Result<bool> {
        match self.call(Request::DatabaseContains { name: name.to_string() }).await? {
            Response::Bool(contains) => Ok(contains),
            _ => Err(ClientError::missing_response("bool")),
        }
    }

    pub async fn create(&self, name: &str) -> Result {
        expect_unit(self.call(Request::DatabaseCreate { name: name.to_string() }).await?)?;
        info!(database = %name, "Database created");
        Ok(())
    }

    pub async fn all(&self) -> Result<Vec<Database>> {
        match self.call(Request::DatabaseAll).await? {
            Response::Databases(names) => Ok(names
                .into_iter()
                .map(|name| Database { name, manager: self.clone() })
                .collect()),
            _ => Err(ClientError::missing_response("database list")),
        }
    }

    async fn call(&self, request: Request) -> Result<Response> {
        call_within(self.channel.as_ref(), request, self.timeout).await
    }
}

/// One database on the server
#[derive(Clone)]
pub struct Database {
    name: String,
    manager: DatabaseManager,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full schema as TypeQL
    pub async fn schema(&self) -> Result<String> {
        self.text(Request::DatabaseSchema { name: self.name.clone() }).await
    }

    pub async fn type_schema(&self) -> Result<String> {
        self.text(Request::DatabaseTypeSchema { name: self.name.clone() }).await
    }

    pub async fn rule_schema(&self) -> Result<String> {
        self.text(Request::DatabaseRuleSchema { name: self.name.clone() }).await
    }

    pub async fn delete(&self) -> Result {
        expect_unit(self.manager.call(Request::DatabaseDelete { name: self.name.clone() }).await?)?;
        info!(database = %self.name, "Database deleted");
        Ok(())
    }

    async fn text(&self, request: Request) -> Result<String> {
        match self.manager.call(request).await? {
            Response::Text(text) => Ok(text),
            _ => Err(ClientError::missing_response("schema text")),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("name", &self.name).finish()
    }
}

pub(crate) fn database_not_found(name: &str) -> ClientError {
    ClientError::Unclassified(format!("The database '{}' does not exist.", name))
}

fn expect_unit(response: Response) -> Result {
    match response {
        Response::Unit => Ok(()),
        _ => Err(ClientError::missing_response("acknowledgement")),
    }
}
