//! 线上数据库适配层
//!
//! 备份读取、恢复写入都通过 `LiveConnection` 完成。具体引擎的 SQL 差异只存在于
//! 本模块的各个适配器和 `ConstraintManager` 中。

mod duck;
mod sqlite;

pub use duck::DuckDbLive;
pub use sqlite::SqliteLive;

use crate::config::{EngineKind, LiveDatabaseConfig};
use crate::schema::{CollectionSpec, FieldType, Record};
use crate::{Result, VaultError};
use serde_json::{Number, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// 与线上数据库的一条同步连接，只在阻塞线程中使用
pub trait LiveConnection: Send {
    fn engine(&self) -> EngineKind;

    fn table_exists(&self, table: &str) -> Result<bool>;

    fn count_rows(&self, table: &str) -> Result<u64>;

    /// 按主键顺序逐行读取，每行交给 `sink`，返回行数
    fn stream_rows(
        &self,
        spec: &CollectionSpec,
        sink: &mut dyn FnMut(Record) -> Result<()>,
    ) -> Result<u64>;

    /// 在一个事务中批量插入，主键冲突的记录被忽略，返回实际插入的行数
    fn insert_batch(&mut self, spec: &CollectionSpec, records: &[Record]) -> Result<u64>;

    /// 执行单条语句，返回受影响行数
    fn execute(&self, sql: &str) -> Result<usize>;

    fn execute_batch(&self, sql: &str) -> Result<()>;

    /// 执行返回单个整数的查询
    fn query_i64(&self, sql: &str) -> Result<Option<i64>>;

    /// 列出违反外键约束的记录（描述文本）
    fn foreign_key_violations(&self) -> Result<Vec<String>>;
}

/// 线上数据库句柄，可以廉价克隆并在任务之间共享
#[derive(Clone)]
pub enum LiveDatabase {
    /// SQLite 每次打开新连接
    Sqlite { path: PathBuf },
    /// DuckDB 同一文件只能被一个实例打开，新连接从根连接克隆
    DuckDb { root: Arc<Mutex<duckdb::Connection>> },
}

impl std::fmt::Debug for LiveDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiveDatabase::Sqlite { path } => f.debug_struct("Sqlite").field("path", path).finish(),
            LiveDatabase::DuckDb { .. } => f.debug_struct("DuckDb").finish_non_exhaustive(),
        }
    }
}

/// 内存数据库路径
pub const IN_MEMORY: &str = ":memory:";

impl LiveDatabase {
    pub fn open(config: &LiveDatabaseConfig) -> Result<Self> {
        match config.engine {
            EngineKind::Sqlite => {
                let path = PathBuf::from(&config.path);
                // 先打开一次，尽早暴露路径或权限问题
                SqliteLive::open(&path)?;
                Ok(LiveDatabase::Sqlite { path })
            }
            EngineKind::DuckDb => {
                let conn = if config.path == IN_MEMORY {
                    duckdb::Connection::open_in_memory()?
                } else {
                    duckdb::Connection::open(&config.path)?
                };
                Ok(LiveDatabase::DuckDb {
                    root: Arc::new(Mutex::new(conn)),
                })
            }
        }
    }

    pub fn engine(&self) -> EngineKind {
        match self {
            LiveDatabase::Sqlite { .. } => EngineKind::Sqlite,
            LiveDatabase::DuckDb { .. } => EngineKind::DuckDb,
        }
    }

    /// 打开一条新连接（阻塞操作）
    pub fn connect(&self) -> Result<Box<dyn LiveConnection>> {
        match self {
            LiveDatabase::Sqlite { path } => Ok(Box::new(SqliteLive::open(path)?)),
            LiveDatabase::DuckDb { root } => {
                let root = root
                    .lock()
                    .map_err(|_| VaultError::custom("DuckDB 根连接锁已损坏"))?;
                Ok(Box::new(DuckDbLive::new(root.try_clone()?)))
            }
        }
    }

    /// 在阻塞线程中使用一条新连接执行操作
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn LiveConnection) -> Result<T> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.connect()?;
            f(conn.as_mut())
        })
        .await?
    }
}

/// 跨多个异步步骤复用的同一条连接
///
/// 每次操作把连接移入阻塞线程，结束后再取回。连接级别的设置（如 SQLite 的
/// 外键开关）因此在整个恢复过程中保持一致。
pub struct PinnedConnection {
    conn: Option<Box<dyn LiveConnection>>,
}

impl PinnedConnection {
    pub async fn open(db: &LiveDatabase) -> Result<Self> {
        let db = db.clone();
        let conn = tokio::task::spawn_blocking(move || db.connect()).await??;
        Ok(Self { conn: Some(conn) })
    }

    pub async fn with<T, F>(&mut self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn LiveConnection) -> Result<T> + Send + 'static,
    {
        let mut conn = self
            .conn
            .take()
            .ok_or_else(|| VaultError::custom("数据库连接已在之前的步骤中丢失"))?;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = f(conn.as_mut());
            (conn, result)
        })
        .await?;
        self.conn = Some(conn);
        result
    }
}

/// 绑定到 SQL 语句的值
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
}

impl SqlValue {
    /// 按字段类型把 JSON 值转换为绑定参数
    pub fn from_json(field: &str, field_type: FieldType, value: &Value) -> Result<Self> {
        let mismatch = || {
            VaultError::schema(format!(
                "字段 {field} 的值 {value} 不是 {} 类型",
                field_type.as_str()
            ))
        };
        Ok(match (field_type, value) {
            (_, Value::Null) => SqlValue::Null,
            (FieldType::Integer, Value::Number(n)) => SqlValue::Integer(n.as_i64().ok_or_else(mismatch)?),
            (FieldType::Real, Value::Number(n)) => SqlValue::Real(n.as_f64().ok_or_else(mismatch)?),
            (FieldType::Text | FieldType::Timestamp, Value::String(s)) => SqlValue::Text(s.clone()),
            (FieldType::Boolean, Value::Bool(b)) => SqlValue::Boolean(*b),
            _ => return Err(mismatch()),
        })
    }

    pub fn into_json(self) -> Result<Value> {
        Ok(match self {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::from(i),
            SqlValue::Real(f) => Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| VaultError::schema(format!("无法导出非有限浮点数 {f}")))?,
            SqlValue::Text(s) => Value::String(s),
            SqlValue::Boolean(b) => Value::Bool(b),
        })
    }
}

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{Null, ToSqlOutput};
        Ok(match self {
            SqlValue::Null => ToSqlOutput::from(Null),
            SqlValue::Integer(i) => ToSqlOutput::from(*i),
            SqlValue::Real(f) => ToSqlOutput::from(*f),
            SqlValue::Text(s) => ToSqlOutput::from(s.as_str()),
            SqlValue::Boolean(b) => ToSqlOutput::from(*b),
        })
    }
}

impl duckdb::ToSql for SqlValue {
    fn to_sql(&self) -> duckdb::Result<duckdb::types::ToSqlOutput<'_>> {
        use duckdb::types::{Null, ToSqlOutput};
        Ok(match self {
            SqlValue::Null => ToSqlOutput::from(Null),
            SqlValue::Integer(i) => ToSqlOutput::from(*i),
            SqlValue::Real(f) => ToSqlOutput::from(*f),
            SqlValue::Text(s) => ToSqlOutput::from(s.as_str()),
            SqlValue::Boolean(b) => ToSqlOutput::from(*b),
        })
    }
}

/// 标识符加双引号（名称已在注册表中校验过）
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

pub(crate) fn select_sql(spec: &CollectionSpec) -> String {
    let columns: Vec<String> = spec.field_names().map(quote_ident).collect();
    format!(
        "SELECT {} FROM {} ORDER BY {}",
        columns.join(", "),
        quote_ident(&spec.name),
        quote_ident(&spec.primary_key)
    )
}

/// 多行 `INSERT OR IGNORE` 语句
pub(crate) fn insert_sql(spec: &CollectionSpec, rows: usize) -> String {
    let columns: Vec<String> = spec.field_names().map(quote_ident).collect();
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    format!(
        "INSERT OR IGNORE INTO {} ({}) VALUES {}",
        quote_ident(&spec.name),
        columns.join(", "),
        vec![placeholders; rows].join(", ")
    )
}

/// 单条语句最多能容纳的记录数
pub(crate) fn rows_per_statement(spec: &CollectionSpec) -> usize {
    (crate::constants::restore::MAX_BOUND_PARAMETERS / spec.fields.len().max(1)).max(1)
}

/// 把一批记录展开成按列顺序排列的绑定参数
pub(crate) fn bind_values(spec: &CollectionSpec, records: &[Record]) -> Result<Vec<SqlValue>> {
    let mut values = Vec::with_capacity(records.len() * spec.fields.len());
    for record in records {
        for field in &spec.fields {
            let value = record.get(&field.name).unwrap_or(&Value::Null);
            values.push(SqlValue::from_json(&field.name, field.field_type, value)?);
        }
    }
    Ok(values)
}
