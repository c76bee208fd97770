//! Relational adapter for MySQL-like and PostgreSQL-like backends.
//!
//! Every call opens one driver connection, does its work and closes the connection
//! again, whether the work succeeded, failed or ran out of time. Nothing is pooled.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::types::{BigDecimal, Uuid};
use sqlx::{Column, Connection, Executor, Row, TypeInfo};
use std::future::Future;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::connection::{BackendConfig, BackendType, RelationalConfig};
use crate::error::{EngineError, Result};
use crate::schema::{ColumnInfo, SchemaInfo, TableInfo};

use super::{AdapterSettings, BackendAdapter, ConnectionTest, ResultRow, TargetKind};

static MANAGED_CLOUD_HOST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\.(rds\.amazonaws\.com(\.cn)?|database\.azure\.com|database\.windows\.net|psdb\.cloud|neon\.tech|supabase\.(co|com)|aivencloud\.com|ondigitalocean\.com|cockroachlabs\.cloud|tidbcloud\.com|timescale\.com|sql\.goog|cloudsql\.(com|net))$",
    )
    .expect("managed host pattern is valid")
});

/// Whether `host` looks like a managed cloud database endpoint.
pub fn is_managed_cloud_host(host: &str) -> bool {
    MANAGED_CLOUD_HOST_RE.is_match(host.trim())
}

fn tls_required(config: &RelationalConfig) -> bool {
    config
        .ssl
        .unwrap_or_else(|| is_managed_cloud_host(&config.host))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    MySql,
    Postgres,
}

impl SqlDialect {
    pub fn default_port(&self) -> u16 {
        match self {
            SqlDialect::MySql => 3306,
            SqlDialect::Postgres => 5432,
        }
    }

    pub fn backend_type(&self) -> BackendType {
        match self {
            SqlDialect::MySql => BackendType::Mysql,
            SqlDialect::Postgres => BackendType::Postgresql,
        }
    }
}

async fn within_budget<T>(budget: Duration, work: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(budget, work).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::execution(format!(
            "query timed out after {}s",
            budget.as_secs()
        ))),
    }
}

/// One driver session per call. The `scoped_*` methods consume the session and close
/// it on every exit path, timeouts included.
enum DriverConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
}

impl DriverConnection {
    async fn close(self) {
        let closed = match self {
            DriverConnection::MySql(conn) => conn.close().await,
            DriverConnection::Postgres(conn) => conn.close().await,
        };
        if let Err(e) = closed {
            warn!("Failed to close driver connection cleanly: {}", e);
        }
    }

    async fn scoped_ping(mut self, budget: Duration) -> Result<()> {
        let outcome = within_budget(budget, self.ping()).await;
        self.close().await;
        outcome
    }

    async fn scoped_fetch(mut self, sql: &str, budget: Duration) -> Result<Vec<ResultRow>> {
        let outcome = within_budget(budget, self.fetch_rows(sql)).await;
        self.close().await;
        outcome
    }

    async fn scoped_schema(mut self, budget: Duration) -> Result<SchemaInfo> {
        let outcome = within_budget(budget, self.load_schema()).await;
        self.close().await;
        outcome
    }

    async fn ping(&mut self) -> Result<()> {
        match self {
            DriverConnection::MySql(conn) => conn.ping().await?,
            DriverConnection::Postgres(conn) => conn.ping().await?,
        }
        Ok(())
    }

    async fn fetch_rows(&mut self, sql: &str) -> Result<Vec<ResultRow>> {
        match self {
            DriverConnection::MySql(conn) => {
                let rows = (&mut *conn).fetch_all(sqlx::raw_sql(sql)).await?;
                Ok(rows.iter().map(mysql_row_to_json).collect())
            }
            DriverConnection::Postgres(conn) => {
                let rows = (&mut *conn).fetch_all(sqlx::raw_sql(sql)).await?;
                Ok(rows.iter().map(pg_row_to_json).collect())
            }
        }
    }

    async fn load_schema(&mut self) -> Result<SchemaInfo> {
        match self {
            DriverConnection::MySql(conn) => load_mysql_schema(conn).await,
            DriverConnection::Postgres(conn) => load_pg_schema(conn).await,
        }
    }
}

async fn load_mysql_schema(conn: &mut MySqlConnection) -> Result<SchemaInfo> {
    let table_rows = (&mut *conn).fetch_all(sqlx::raw_sql("SHOW TABLES")).await?;
    let table_names: Vec<String> = table_rows
        .iter()
        .map(|row| value_to_text(mysql_value(row, 0)))
        .collect();

    let mut tables = Vec::with_capacity(table_names.len());
    for table_name in table_names {
        let describe = format!("DESCRIBE {}", quote_mysql_identifier(&table_name));
        let column_rows = (&mut *conn).fetch_all(sqlx::raw_sql(&describe)).await?;

        // Field, Type, Null, Key, Default, Extra
        let columns = column_rows
            .iter()
            .map(|row| {
                let default = match mysql_value(row, 4) {
                    Value::Null => None,
                    other => Some(value_to_text(other)),
                };
                ColumnInfo::new(
                    value_to_text(mysql_value(row, 0)),
                    value_to_text(mysql_value(row, 1)),
                    value_to_text(mysql_value(row, 2)).eq_ignore_ascii_case("YES"),
                )
                .with_default(default)
            })
            .collect();

        tables.push(TableInfo::new(table_name, columns));
    }

    Ok(SchemaInfo::new(tables))
}

async fn load_pg_schema(conn: &mut PgConnection) -> Result<SchemaInfo> {
    let column_rows = (&mut *conn)
        .fetch_all(sqlx::raw_sql(
        "SELECT c.table_name::text, c.column_name::text, c.data_type::text, \
                c.is_nullable::text, c.column_default::text \
         FROM information_schema.columns c \
         JOIN information_schema.tables t \
           ON t.table_schema = c.table_schema AND t.table_name = c.table_name \
         WHERE c.table_schema = 'public' AND t.table_type = 'BASE TABLE' \
         ORDER BY c.table_name, c.ordinal_position",
    ))
    .await?;

    let mut tables: Vec<TableInfo> = Vec::new();
    for row in &column_rows {
        let table_name: String = row.try_get(0)?;
        let column = ColumnInfo::new(
            row.try_get::<String, _>(1)?,
            row.try_get::<String, _>(2)?,
            row.try_get::<String, _>(3)?.eq_ignore_ascii_case("YES"),
        )
        .with_default(row.try_get::<Option<String>, _>(4)?);

        match tables.last_mut() {
            Some(table) if table.name == table_name => table.columns.push(column),
            _ => tables.push(TableInfo::new(table_name, vec![column])),
        }
    }

    Ok(SchemaInfo::new(tables))
}

fn quote_mysql_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Relational-driver adapter, parameterized by dialect.
pub struct RelationalAdapter {
    dialect: SqlDialect,
    settings: AdapterSettings,
}

impl RelationalAdapter {
    pub fn new(dialect: SqlDialect, settings: AdapterSettings) -> Self {
        Self { dialect, settings }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    fn relational_config<'a>(&self, config: &'a BackendConfig) -> Result<&'a RelationalConfig> {
        match config {
            BackendConfig::Relational(relational) => Ok(relational),
            other => Err(EngineError::configuration(format!(
                "{} adapter cannot use a '{}' configuration",
                self.dialect.backend_type(),
                other.kind_name()
            ))),
        }
    }

    fn mysql_options(&self, config: &RelationalConfig) -> MySqlConnectOptions {
        let ssl_mode = match config.ssl {
            Some(false) => MySqlSslMode::Disabled,
            _ if tls_required(config) => MySqlSslMode::Required,
            _ => MySqlSslMode::Preferred,
        };

        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port.unwrap_or(self.dialect.default_port()))
            .username(&config.username)
            .database(&config.database)
            .ssl_mode(ssl_mode);
        if let Some(password) = &config.password {
            options = options.password(password);
        }
        options
    }

    fn pg_options(&self, config: &RelationalConfig) -> PgConnectOptions {
        let ssl_mode = match config.ssl {
            Some(false) => PgSslMode::Disable,
            _ if tls_required(config) => PgSslMode::Require,
            _ => PgSslMode::Prefer,
        };

        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port.unwrap_or(self.dialect.default_port()))
            .username(&config.username)
            .database(&config.database)
            .ssl_mode(ssl_mode);
        if let Some(password) = &config.password {
            options = options.password(password);
        }
        options
    }

    async fn open(&self, config: &RelationalConfig) -> Result<DriverConnection> {
        debug!(
            "Opening {} connection to {}:{}",
            self.dialect.backend_type(),
            config.host,
            config.port.unwrap_or(self.dialect.default_port())
        );

        let connect = async {
            match self.dialect {
                SqlDialect::MySql => MySqlConnection::connect_with(&self.mysql_options(config))
                    .await
                    .map(DriverConnection::MySql),
                SqlDialect::Postgres => PgConnection::connect_with(&self.pg_options(config))
                    .await
                    .map(DriverConnection::Postgres),
            }
        };

        match tokio::time::timeout(self.settings.connect_timeout, connect).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(EngineError::execution(format!(
                "failed to connect to {}: {}",
                config.host, e
            ))),
            Err(_) => Err(EngineError::execution(format!(
                "connecting to {} timed out after {}s",
                config.host,
                self.settings.connect_timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl BackendAdapter for RelationalAdapter {
    fn backend_type(&self) -> BackendType {
        self.dialect.backend_type()
    }

    fn validate_config(&self, config: &BackendConfig) -> Result<()> {
        let relational = self.relational_config(config)?;
        if relational.host.trim().is_empty() {
            return Err(EngineError::configuration("host is required"));
        }
        if relational.database.trim().is_empty() {
            return Err(EngineError::configuration("database is required"));
        }
        if relational.username.trim().is_empty() {
            return Err(EngineError::configuration("username is required"));
        }
        Ok(())
    }

    fn describe_target(&self, config: &BackendConfig) -> Result<TargetKind> {
        let relational = self.relational_config(config)?;
        Ok(TargetKind::Database {
            dialect: self.backend_type().dialect_name(),
            database: relational.database.clone(),
            simple_select_only: false,
        })
    }

    async fn test_connection(&self, config: &BackendConfig) -> ConnectionTest {
        let relational = match self.relational_config(config) {
            Ok(relational) => relational,
            Err(e) => return ConnectionTest::failed(e.to_string()),
        };

        let started = Instant::now();
        let conn = match self.open(relational).await {
            Ok(conn) => conn,
            Err(e) => return ConnectionTest::failed(e.to_string()),
        };

        let pinged = conn.scoped_ping(self.settings.query_timeout).await;

        match pinged {
            Ok(()) => {
                let latency = started.elapsed();
                info!(
                    "{} connection to {} succeeded in {}ms",
                    self.dialect.backend_type(),
                    relational.host,
                    latency.as_millis()
                );
                ConnectionTest::succeeded(
                    format!(
                        "Connected to {} database '{}'",
                        self.backend_type().dialect_name(),
                        relational.database
                    ),
                    latency,
                )
            }
            Err(e) => ConnectionTest::failed(e.to_string()),
        }
    }

    async fn introspect_schema(&self, config: &BackendConfig) -> Result<SchemaInfo> {
        let relational = self.relational_config(config)?;
        let conn = self.open(relational).await?;

        let schema = conn.scoped_schema(self.settings.query_timeout).await?;

        info!(
            "Introspected {} tables from {}",
            schema.total_tables, relational.database
        );
        Ok(schema)
    }

    async fn execute_query(&self, config: &BackendConfig, query: &str) -> Result<Vec<ResultRow>> {
        let sql = self.sanitize(query)?;
        let relational = self.relational_config(config)?;
        let conn = self.open(relational).await?;

        debug!("Executing SQL: {}", sql);
        let rows = conn.scoped_fetch(&sql, self.settings.query_timeout).await?;

        info!("Query returned {} rows", rows.len());
        Ok(rows)
    }
}

macro_rules! decode_first {
    ($row:expr, $idx:expr; $($ty:ty => $convert:expr),+ $(,)?) => {
        $(
            if let Ok(value) = $row.try_get::<Option<$ty>, _>($idx) {
                return match value {
                    Some(inner) => $convert(inner),
                    None => Value::Null,
                };
            }
        )+
    };
}

fn float_value(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn decimal_value(value: BigDecimal) -> Value {
    let text = value.to_string();
    match text.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => float_value(parsed),
        _ => Value::String(text),
    }
}

fn bytes_value(value: Vec<u8>) -> Value {
    Value::String(String::from_utf8_lossy(&value).into_owned())
}

fn text_value<T: ToString>(value: T) -> Value {
    Value::String(value.to_string())
}

fn utc_value(value: DateTime<Utc>) -> Value {
    Value::String(value.to_rfc3339())
}

fn mysql_value(row: &MySqlRow, idx: usize) -> Value {
    decode_first!(row, idx;
        i64 => Value::from,
        u64 => Value::from,
        f64 => float_value,
        f32 => |v: f32| float_value(v as f64),
        BigDecimal => decimal_value,
        String => Value::String,
        NaiveDateTime => text_value,
        DateTime<Utc> => utc_value,
        NaiveDate => text_value,
        NaiveTime => text_value,
        Value => |v: Value| v,
        Vec<u8> => bytes_value,
    );

    let type_name = row.column(idx).type_info().name().to_string();
    debug!("Unsupported MySQL column type {}, returning null", type_name);
    Value::Null
}

fn pg_value(row: &PgRow, idx: usize) -> Value {
    decode_first!(row, idx;
        bool => Value::Bool,
        i16 => Value::from,
        i32 => Value::from,
        i64 => Value::from,
        f32 => |v: f32| float_value(v as f64),
        f64 => float_value,
        BigDecimal => decimal_value,
        String => Value::String,
        Uuid => text_value,
        NaiveDateTime => text_value,
        DateTime<Utc> => utc_value,
        NaiveDate => text_value,
        NaiveTime => text_value,
        Value => |v: Value| v,
        Vec<u8> => bytes_value,
    );

    // enums and other text-like types the driver has no Rust mapping for
    if let Ok(Some(text)) = row.try_get_unchecked::<Option<String>, _>(idx) {
        return Value::String(text);
    }

    let type_name = row.column(idx).type_info().name().to_string();
    debug!("Unsupported PostgreSQL column type {}, returning null", type_name);
    Value::Null
}

fn mysql_row_to_json(row: &MySqlRow) -> ResultRow {
    let mut map = serde_json::Map::new();
    for column in row.columns() {
        map.insert(column.name().to_string(), mysql_value(row, column.ordinal()));
    }
    ResultRow::new(Value::Object(map))
}

fn pg_row_to_json(row: &PgRow) -> ResultRow {
    let mut map = serde_json::Map::new();
    for column in row.columns() {
        map.insert(column.name().to_string(), pg_value(row, column.ordinal()));
    }
    ResultRow::new(Value::Object(map))
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    struct FakeSession {
        counters: Arc<Counters>,
    }

    impl FakeSession {
        fn open(counters: &Arc<Counters>) -> Self {
            counters.opened.fetch_add(1, Ordering::SeqCst);
            Self {
                counters: Arc::clone(counters),
            }
        }

        async fn work(&mut self, fail: bool, stall: Duration) -> Result<u32> {
            tokio::time::sleep(stall).await;
            if fail {
                Err(EngineError::execution("boom"))
            } else {
                Ok(42)
            }
        }

        async fn close(self) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }

        // same shape as the DriverConnection scoped_* methods
        async fn scoped_work(mut self, fail: bool, stall: Duration, budget: Duration) -> Result<u32> {
            let outcome = within_budget(budget, self.work(fail, stall)).await;
            self.close().await;
            outcome
        }
    }

    #[tokio::test]
    async fn test_scoped_session_closes_on_success_error_and_timeout() {
        let counters = Arc::new(Counters::default());
        let budget = Duration::from_millis(50);

        let ok = FakeSession::open(&counters)
            .scoped_work(false, Duration::ZERO, budget)
            .await;
        assert_eq!(ok.unwrap(), 42);

        let failed = FakeSession::open(&counters)
            .scoped_work(true, Duration::ZERO, budget)
            .await;
        assert!(failed.is_err());

        let timed_out = FakeSession::open(&counters)
            .scoped_work(false, Duration::from_secs(5), budget)
            .await;
        assert!(timed_out.unwrap_err().to_string().contains("timed out"));

        assert_eq!(counters.opened.load(Ordering::SeqCst), 3);
        assert_eq!(
            counters.opened.load(Ordering::SeqCst),
            counters.closed.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn test_managed_cloud_hosts_require_tls() {
        assert!(is_managed_cloud_host(
            "mydb.abc123.us-east-1.rds.amazonaws.com"
        ));
        assert!(is_managed_cloud_host("server.postgres.database.azure.com"));
        assert!(is_managed_cloud_host("aws.connect.psdb.cloud"));
        assert!(is_managed_cloud_host("a1b2c3.us-central1.sql.goog"));
        assert!(is_managed_cloud_host("ep-cool-darkness.us-east-2.aws.neon.tech"));
        assert!(!is_managed_cloud_host("localhost"));
        assert!(!is_managed_cloud_host("db.internal.example.com"));
    }

    fn relational(host: &str, ssl: Option<bool>) -> RelationalConfig {
        RelationalConfig {
            host: host.to_string(),
            port: None,
            database: "shop".to_string(),
            username: "app".to_string(),
            password: None,
            ssl,
        }
    }

    #[test]
    fn test_explicit_ssl_setting_wins() {
        assert!(tls_required(&relational("localhost", Some(true))));
        assert!(!tls_required(&relational("x.rds.amazonaws.com", Some(false))));
        assert!(tls_required(&relational("x.rds.amazonaws.com", None)));
    }

    #[test]
    fn test_validate_config_rejects_wrong_kind_and_missing_fields() {
        let adapter = RelationalAdapter::new(SqlDialect::MySql, AdapterSettings::default());

        let missing_host = BackendConfig::Relational(relational("", None));
        assert!(matches!(
            adapter.validate_config(&missing_host),
            Err(EngineError::Configuration(_))
        ));

        let rest = BackendConfig::RestApi(crate::connection::RestApiConfig {
            base_url: "https://api.example.com".to_string(),
            endpoints: vec![],
            health_path: None,
            allow_writes: false,
            auth: Default::default(),
        });
        assert!(matches!(
            adapter.validate_config(&rest),
            Err(EngineError::Configuration(_))
        ));

        let valid = BackendConfig::Relational(relational("localhost", None));
        assert!(adapter.validate_config(&valid).is_ok());
    }

    #[tokio::test]
    async fn test_execute_rejects_unsafe_sql_before_connecting() {
        // Port 1 is never a database; reaching the driver would fail differently.
        let adapter = RelationalAdapter::new(SqlDialect::Postgres, AdapterSettings::default());
        let config = BackendConfig::Relational(RelationalConfig {
            port: Some(1),
            ..relational("127.0.0.1", Some(false))
        });

        let err = adapter
            .execute_query(&config, "DELETE FROM users")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsafeQuery(_)));
    }

    #[tokio::test]
    async fn test_unreachable_database_reports_failed_test() {
        let adapter = RelationalAdapter::new(
            SqlDialect::MySql,
            AdapterSettings {
                connect_timeout: Duration::from_secs(2),
                ..AdapterSettings::default()
            },
        );
        let config = BackendConfig::Relational(RelationalConfig {
            port: Some(1),
            ..relational("127.0.0.1", Some(false))
        });

        let test = adapter.test_connection(&config).await;
        assert!(!test.success);
        assert!(test.latency_ms.is_none());

        let err = adapter
            .execute_query(&config, "SELECT 1")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Execution(_)));
    }

    #[test]
    fn test_describe_target_uses_dialect_and_database() {
        let adapter = RelationalAdapter::new(SqlDialect::Postgres, AdapterSettings::default());
        let target = adapter
            .describe_target(&BackendConfig::Relational(relational("localhost", None)))
            .unwrap();
        assert_eq!(
            target,
            TargetKind::Database {
                dialect: "PostgreSQL",
                database: "shop".to_string(),
                simple_select_only: false,
            }
        );
    }

    #[test]
    fn test_mysql_identifier_quoting() {
        assert_eq!(quote_mysql_identifier("users"), "`users`");
        assert_eq!(quote_mysql_identifier("we`ird"), "`we``ird`");
    }
}
