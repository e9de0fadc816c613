use super::{RecordStream, Source};
use crate::config::{ConnectionConfig, PostgresSourceConfig};
use crate::error::{IngestError, Result};
use crate::record::{Record, Value};
use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::{Stream, TryStreamExt};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::types::{BigDecimal, Uuid};
use sqlx::{Column, Row, TypeInfo};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// One table, filtered on `DATE(date_column)` in the query
pub struct PostgresSource {
    config: PostgresSourceConfig,
}

impl PostgresSource {
    pub fn new(config: PostgresSourceConfig) -> Self {
        Self { config }
    }

    /// The extraction query. Identifiers are validated when the
    /// configuration loads and quoted here.
    pub fn select_sql(&self) -> String {
        format!(
            "SELECT * FROM {}.{} WHERE DATE({}) = $1",
            quote_ident(&self.config.schema),
            quote_ident(&self.config.table),
            quote_ident(&self.config.date_column)
        )
    }

    #[instrument(skip(self), fields(host = ?self.config.connection.host))]
    async fn connect(&self) -> Result<PgPool> {
        let options = connect_options(&self.config.connection)?;
        let timeout = Duration::from_secs(self.config.connection.connect_timeout_secs);

        PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await
            .map_err(|e| IngestError::connection(format!("cannot connect to PostgreSQL: {e}")))
    }

    /// Fail fast with `Schema` when the table or a required column is absent
    async fn check_columns(&self, pool: &PgPool) -> Result<()> {
        let columns: Vec<String> = sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2",
        )
        .bind(&self.config.schema)
        .bind(&self.config.table)
        .fetch_all(pool)
        .await
        .map_err(map_query_error)?;

        if columns.is_empty() {
            return Err(IngestError::schema(format!(
                "table {}.{} not found",
                self.config.schema, self.config.table
            )));
        }

        let expected = std::iter::once(self.config.date_column.as_str())
            .chain(self.config.columns.iter().map(|c| c.name.as_str()));
        let missing: Vec<&str> = expected.filter(|name| !columns.iter().any(|c| c == name)).collect();
        if !missing.is_empty() {
            return Err(IngestError::schema(format!(
                "columns missing from {}.{}: {}",
                self.config.schema,
                self.config.table,
                missing.join(", ")
            )));
        }

        debug!(columns = columns.len(), "Table columns verified");
        Ok(())
    }
}

#[async_trait]
impl Source for PostgresSource {
    fn describe(&self) -> String {
        format!("postgres:{}.{}", self.config.schema, self.config.table)
    }

    async fn extract(&self, execution_date: NaiveDate) -> Result<RecordStream> {
        let pool = self.connect().await?;
        self.check_columns(&pool).await?;

        let sql = self.select_sql();
        info!(table = %self.config.table, %execution_date, "Querying PostgreSQL source");

        Ok(Box::pin(fetch_rows(pool, sql, execution_date)))
    }
}

fn fetch_rows(
    pool: PgPool,
    sql: String,
    execution_date: NaiveDate,
) -> impl Stream<Item = Result<Record>> + Send + 'static {
    try_stream! {
        let mut rows = sqlx::query(&sql).bind(execution_date).fetch(&pool);
        while let Some(row) = rows.try_next().await.map_err(map_query_error)? {
            yield decode_row(&row)?;
        }
    }
}

fn connect_options(connection: &ConnectionConfig) -> Result<PgConnectOptions> {
    let url = connection.url.clone().or_else(|| {
        connection
            .host
            .is_none()
            .then(|| std::env::var("DATABASE_URL").ok())
            .flatten()
    });

    // PgConnectOptions::new() picks up the PG* environment variables
    let mut options = match url {
        Some(url) => url
            .parse::<PgConnectOptions>()
            .map_err(|e| IngestError::config(format!("invalid PostgreSQL URL: {e}")))?,
        None => PgConnectOptions::new(),
    };

    if let Some(host) = &connection.host {
        options = options.host(host);
    }
    if let Some(port) = connection.port {
        options = options.port(port);
    }
    if let Some(database) = &connection.database {
        options = options.database(database);
    }
    if let Some(user) = &connection.user {
        options = options.username(user);
    }
    if let Some(password) = &connection.password {
        options = options.password(password);
    }

    Ok(options.options([("timezone", "UTC")]))
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// SQLSTATE class 42 is "syntax error or access rule violation", which is
/// where undefined tables and columns land
fn map_query_error(err: sqlx::Error) -> IngestError {
    match &err {
        sqlx::Error::Database(db) if db.code().is_some_and(|code| code.starts_with("42")) => {
            IngestError::schema(db.message().to_string())
        },
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
            IngestError::schema(err.to_string())
        },
        _ => IngestError::connection(format!("query failed: {err}")),
    }
}

fn decode_row(row: &PgRow) -> Result<Record> {
    let mut record = Record::with_capacity(row.len());
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name())
            .map_err(|e| IngestError::schema(format!("column '{}': {e}", column.name())))?;
        record.push(column.name(), value);
    }
    Ok(record)
}

fn decode_column(
    row: &PgRow,
    index: usize,
    type_name: &str,
) -> std::result::Result<Value, String> {
    fn get<'r, T>(row: &'r PgRow, index: usize) -> std::result::Result<Option<T>, String>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        row.try_get::<Option<T>, _>(index).map_err(|e| e.to_string())
    }

    let value = match type_name {
        "BOOL" => get::<bool>(row, index)?.map(Value::Boolean),
        "INT2" => get::<i16>(row, index)?.map(|v| Value::Integer(v.into())),
        "INT4" => get::<i32>(row, index)?.map(|v| Value::Integer(v.into())),
        "INT8" => get::<i64>(row, index)?.map(Value::Integer),
        "FLOAT4" => get::<f32>(row, index)?.map(|v| Value::Float(v.into())),
        "FLOAT8" => get::<f64>(row, index)?.map(Value::Float),
        // text keeps the full precision
        "NUMERIC" => get::<BigDecimal>(row, index)?.map(|v| Value::Text(v.to_string())),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => get::<String>(row, index)?.map(Value::Text),
        "UUID" => get::<Uuid>(row, index)?.map(|v| Value::Text(v.to_string())),
        "JSON" | "JSONB" => {
            get::<serde_json::Value>(row, index)?.map(|v| Value::Text(v.to_string()))
        },
        "DATE" => get::<NaiveDate>(row, index)?.map(Value::Date),
        "TIMESTAMP" => get::<NaiveDateTime>(row, index)?.map(Value::Timestamp),
        "TIMESTAMPTZ" => get::<DateTime<Utc>>(row, index)?.map(|v| Value::Timestamp(v.naive_utc())),
        other => return Err(format!("unsupported PostgreSQL type {other}")),
    };

    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config() -> PostgresSourceConfig {
        PostgresSourceConfig {
            table: "users".into(),
            schema: "public".into(),
            date_column: "created_at".into(),
            connection: ConnectionConfig::default(),
            timestamp_columns: vec![],
            columns: vec![],
        }
    }

    #[test]
    fn test_select_sql_quotes_identifiers() {
        let source = PostgresSource::new(config());
        assert_eq!(
            source.select_sql(),
            r#"SELECT * FROM "public"."users" WHERE DATE("created_at") = $1"#
        );
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }

    #[test]
    fn test_explicit_fields_override_url() {
        let connection = ConnectionConfig {
            url: Some("postgres://app@db.internal:5432/app".into()),
            port: Some(6543),
            database: Some("warehouse".into()),
            ..ConnectionConfig::default()
        };
        let options = connect_options(&connection).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("warehouse"));
        assert_eq!(options.get_username(), "app");
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let connection = ConnectionConfig {
            url: Some("not a url".into()),
            ..ConnectionConfig::default()
        };
        assert!(matches!(connect_options(&connection), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_describe() {
        assert_eq!(PostgresSource::new(config()).describe(), "postgres:public.users");
    }
}
