//! Blocking Postgres row source.
//!
//! Every batch opens its own connection (connect, query, drop), so a
//! connection poisoned by one failed attempt can never leak into the next,
//! and pooled endpoints (pgbouncer, serverless proxies) only ever see short
//! sessions.

use std::str::FromStr;

use postgres::{Client, Config, Row};
use postgres_native_tls::MakeTlsConnector;
use tracing::debug;

use super::{ConnectOptions, RowSource, SourceError};
use crate::snapshot::Listing;

const COLUMNS: &str =
    "id, title, body, specialization, skills, engagement, published_at, updated_at, is_champion";

/// Keyset-paginated reader over one remote relation.
pub struct PgSource {
    options: ConnectOptions,
    relation: String,
}

impl PgSource {
    pub fn new(options: ConnectOptions, relation: impl Into<String>) -> Self {
        Self {
            options,
            relation: relation.into(),
        }
    }

    fn connect(&self) -> Result<Client, SourceError> {
        let connector = native_tls::TlsConnector::new()
            .map_err(|e| SourceError::Io(format!("tls setup failed: {e}")))?;
        let tls = MakeTlsConnector::new(connector);

        let mut config = Config::from_str(self.options.dsn())
            .map_err(|e| SourceError::Query(format!("invalid connection string: {e}")))?;
        config
            .connect_timeout(self.options.connect_timeout())
            // The server must not kill a slow batch mid-flight.
            .options("-c statement_timeout=0 -c idle_in_transaction_session_timeout=0");

        config.connect(tls).map_err(|e| classify(&e, &self.options))
    }
}

impl RowSource for PgSource {
    fn fetch_batch(&mut self, after: Option<i64>, limit: u32) -> Result<Vec<Listing>, SourceError> {
        let mut client = self.connect()?;
        debug!(
            "Requesting batch of {limit} from {} after key {after:?}",
            self.options
        );

        let rows = match after {
            Some(last_key) => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM {} WHERE id > $1 ORDER BY id LIMIT $2",
                    self.relation
                );
                client.query(&sql, &[&last_key, &i64::from(limit)])
            }
            None => {
                let sql = format!("SELECT {COLUMNS} FROM {} ORDER BY id LIMIT $1", self.relation);
                client.query(&sql, &[&i64::from(limit)])
            }
        }
        .map_err(|e| classify(&e, &self.options))?;

        rows.iter().map(decode_row).collect()
    }
}

fn decode_row(row: &Row) -> Result<Listing, SourceError> {
    Ok(Listing {
        id: row.try_get("id").map_err(decode_err)?,
        title: row.try_get("title").map_err(decode_err)?,
        body: row.try_get("body").map_err(decode_err)?,
        specialization: row.try_get("specialization").map_err(decode_err)?,
        skills: row.try_get("skills").map_err(decode_err)?,
        engagement: row.try_get("engagement").map_err(decode_err)?,
        published_at: row.try_get("published_at").map_err(decode_err)?,
        updated_at: row.try_get("updated_at").map_err(decode_err)?,
        is_champion: row.try_get("is_champion").map_err(decode_err)?,
    })
}

fn decode_err(err: postgres::Error) -> SourceError {
    SourceError::Schema(format!("row decode failed: {err}"))
}

fn classify(err: &postgres::Error, target: &ConnectOptions) -> SourceError {
    let msg = format!("{err} [{target}]");
    match err.code() {
        Some(state) => classify_sqlstate(state.code(), msg),
        // No SQLSTATE means the failure happened client-side: refused
        // sockets, resets, connect timeouts.
        None => SourceError::Io(msg),
    }
}

/// SQLSTATE-class mapping onto the retry taxonomy.
///
/// Class 08 (connection exception), class 53 (insufficient resources) and
/// the class-57 operator kills are what flaky pooled endpoints produce
/// under load; everything else repeats identically on retry.
fn classify_sqlstate(code: &str, msg: String) -> SourceError {
    match code {
        c if c.starts_with("08") => SourceError::Io(msg),
        c if c.starts_with("53") => SourceError::Unavailable(msg),
        // query_canceled, cannot_connect_now, idle_session_timeout
        "57014" | "57P03" | "57P05" => SourceError::Unavailable(msg),
        c if c.starts_with("28") => SourceError::Auth(msg),
        // invalid_catalog_name: the database itself does not exist
        "3D000" => SourceError::Schema(msg),
        c if c.starts_with("42") => SourceError::Schema(msg),
        _ => SourceError::Query(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_code(code: &str) -> SourceError {
        classify_sqlstate(code, "boom".to_string())
    }

    #[test]
    fn test_connection_class_is_transient() {
        assert!(classify_code("08006").is_transient()); // connection_failure
        assert!(classify_code("08001").is_transient()); // sqlclient_unable_to_establish
    }

    #[test]
    fn test_resource_class_is_transient() {
        assert!(classify_code("53300").is_transient()); // too_many_connections
        assert!(classify_code("57014").is_transient()); // query_canceled
        assert!(classify_code("57P03").is_transient()); // cannot_connect_now
    }

    #[test]
    fn test_auth_and_schema_are_fatal() {
        assert!(matches!(classify_code("28P01"), SourceError::Auth(_)));
        assert!(matches!(classify_code("42P01"), SourceError::Schema(_)));
        assert!(matches!(classify_code("42703"), SourceError::Schema(_)));
        assert!(matches!(classify_code("3D000"), SourceError::Schema(_)));
        assert!(!classify_code("28P01").is_transient());
        assert!(!classify_code("42P01").is_transient());
    }

    #[test]
    fn test_unknown_code_is_fatal_query_error() {
        let err = classify_code("22P02"); // invalid_text_representation
        assert!(matches!(err, SourceError::Query(_)));
        assert!(!err.is_transient());
    }
}
