use std::future::Future;
use std::time::Duration;

use tokio_postgres::{Client, Config, NoTls};

use bb8::ManageConnection;

use crate::db::error::{DbError, DbResult, pg_message};

/// Static parameters for opening PostgreSQL connections.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
}

impl ConnectParams {
    fn to_pg_config(&self) -> Config {
        let mut config = Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.username)
            .password(&self.password)
            .application_name("pgdeck")
            .connect_timeout(self.connect_timeout);
        config
    }
}

/// Opens and health-checks `tokio_postgres` clients for the pool.
pub struct PgConnector {
    config: Config,
    target: String,
}

impl PgConnector {
    pub fn new(params: &ConnectParams) -> Self {
        Self {
            config: params.to_pg_config(),
            target: format!("{}:{}/{}", params.host, params.port, params.database),
        }
    }
}

impl ManageConnection for PgConnector {
    type Connection = Client;
    type Error = DbError;

    fn connect(&self) -> impl Future<Output = DbResult<Client>> + Send {
        let config = self.config.clone();
        let target = self.target.clone();
        async move {
            match config.connect(NoTls).await {
                Ok((client, connection)) => {
                    // The connection object performs the actual communication with the database,
                    // so spawn it off to run on its own.
                    tokio::spawn(async move {
                        if let Err(e) = connection.await {
                            tracing::error!(error = %e, "Database connection error");
                        }
                    });
                    tracing::debug!(target = %target, "Opened database connection");
                    Ok(client)
                }
                Err(e) => Err(DbError::from_connect(&e)),
            }
        }
    }

    /// Round trip on checkout; a failure makes bb8 discard the client.
    fn is_valid(&self, conn: &mut Client) -> impl Future<Output = DbResult<()>> + Send {
        async move {
            conn.simple_query("")
                .await
                .map(|_| ())
                .map_err(|e| DbError::transient(pg_message(&e)))
        }
    }

    fn has_broken(&self, conn: &mut Client) -> bool {
        conn.is_closed()
    }
}
