//! 外键约束管理
//!
//! 恢复时的引擎差异都封装在这里：能否关闭外键检查、用什么语句最快地清空表。

use crate::config::EngineKind;
use crate::live::{LiveConnection, quote_ident};
use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// 恢复时处理外键的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityMode {
    /// 已关闭外键检查，按清单顺序处理
    ChecksDisabled,
    /// 无法关闭检查，按依赖顺序删除和插入
    DependencyOrdered,
}

impl IntegrityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityMode::ChecksDisabled => "checks_disabled",
            IntegrityMode::DependencyOrdered => "dependency_ordered",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConstraintManager {
    engine: EngineKind,
}

impl ConstraintManager {
    pub fn new(engine: EngineKind) -> Self {
        Self { engine }
    }

    /// 导出时的引擎与当前线上库不同，表结构和外键语义无法保证一致
    pub fn ensure_same_engine(&self, archived: EngineKind) -> Result<()> {
        if archived == self.engine {
            Ok(())
        } else {
            Err(VaultError::invalid_state(format!(
                "归档来自 {:?} 引擎，不能恢复到 {:?}",
                archived, self.engine
            )))
        }
    }

    /// 关闭外键检查
    ///
    /// 引擎不支持时返回 `IntegrityDisableUnsupported`，调用方应改用按依赖顺序删除。
    pub fn disable_integrity_checks(&self, conn: &dyn LiveConnection) -> Result<()> {
        match self.engine {
            EngineKind::Sqlite => {
                conn.execute("PRAGMA foreign_keys = OFF")?;
                // 在事务内执行时 PRAGMA 会被静默忽略，需要确认确实生效
                if conn.query_i64("PRAGMA foreign_keys")? != Some(0) {
                    return Err(VaultError::IntegrityDisableUnsupported(
                        "SQLite 未能关闭外键检查".to_string(),
                    ));
                }
                debug!("已关闭 SQLite 外键检查");
                Ok(())
            }
            EngineKind::DuckDb => Err(VaultError::IntegrityDisableUnsupported(
                "DuckDB 的外键约束无法关闭".to_string(),
            )),
        }
    }

    /// 重新开启外键检查
    pub fn enable_integrity_checks(&self, conn: &dyn LiveConnection) -> Result<()> {
        match self.engine {
            EngineKind::Sqlite => {
                conn.execute("PRAGMA foreign_keys = ON")?;
                if conn.query_i64("PRAGMA foreign_keys")? != Some(1) {
                    return Err(VaultError::custom("SQLite 外键检查未能重新开启"));
                }
                debug!("已重新开启 SQLite 外键检查");
                Ok(())
            }
            EngineKind::DuckDb => Ok(()),
        }
    }

    pub fn integrity_checks_enabled(&self, conn: &dyn LiveConnection) -> Result<bool> {
        match self.engine {
            EngineKind::Sqlite => Ok(conn.query_i64("PRAGMA foreign_keys")? == Some(1)),
            EngineKind::DuckDb => Ok(true),
        }
    }

    /// 用单条语句清空表，返回删除前的行数
    ///
    /// SQLite 没有 TRUNCATE，`DELETE FROM` 不带条件时会走整表清空的快速路径，
    /// 之后重置自增序列。DuckDB 的 TRUNCATE 等价于 DELETE。
    pub fn fast_clear_table(&self, conn: &dyn LiveConnection, table: &str) -> Result<u64> {
        let before = conn.count_rows(table)?;
        conn.execute(&format!("DELETE FROM {}", quote_ident(table)))?;

        if self.engine == EngineKind::Sqlite && conn.table_exists("sqlite_sequence")? {
            conn.execute(&format!(
                "DELETE FROM sqlite_sequence WHERE name = '{table}'"
            ))?;
        }

        info!("已清空表 {} ({} 行)", table, before);
        Ok(before)
    }

    /// 恢复后仍然存在的悬空引用
    pub fn dangling_references(&self, conn: &dyn LiveConnection) -> Result<Vec<String>> {
        conn.foreign_key_violations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{DuckDbLive, SqliteLive};

    const SQLITE_SCHEMA: &str = "
        CREATE TABLE customers (id INTEGER PRIMARY KEY AUTOINCREMENT, email TEXT);
        CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER REFERENCES customers(id));
        INSERT INTO customers (email) VALUES ('a@x.io'), ('b@x.io');
        INSERT INTO orders VALUES (1, 1), (2, 2);
    ";

    #[test]
    fn test_cross_engine_rejected() {
        let manager = ConstraintManager::new(EngineKind::Sqlite);
        assert!(manager.ensure_same_engine(EngineKind::Sqlite).is_ok());
        let err = manager.ensure_same_engine(EngineKind::DuckDb).unwrap_err();
        assert!(matches!(err, VaultError::InvalidState(_)));
    }

    #[test]
    fn test_sqlite_disable_clear_enable() {
        let dir = tempfile::tempdir().unwrap();
        let conn = SqliteLive::open(&dir.path().join("live.db")).unwrap();
        conn.execute_batch(SQLITE_SCHEMA).unwrap();
        let manager = ConstraintManager::new(EngineKind::Sqlite);

        // 检查开启时不能清空被引用的父表
        assert!(manager.fast_clear_table(&conn, "customers").is_err());

        manager.disable_integrity_checks(&conn).unwrap();
        assert!(!manager.integrity_checks_enabled(&conn).unwrap());
        assert_eq!(manager.fast_clear_table(&conn, "customers").unwrap(), 2);
        assert_eq!(manager.dangling_references(&conn).unwrap().len(), 2);

        manager.enable_integrity_checks(&conn).unwrap();
        assert!(manager.integrity_checks_enabled(&conn).unwrap());

        // 自增序列被重置
        conn.execute("DELETE FROM orders").unwrap();
        conn.execute("INSERT INTO customers (email) VALUES ('c@x.io')")
            .unwrap();
        assert_eq!(
            conn.query_i64("SELECT id FROM customers").unwrap(),
            Some(1)
        );

        // 重新开启后违反外键的写入被拒绝
        assert!(conn.execute("INSERT INTO orders VALUES (9, 999)").is_err());
    }

    #[test]
    fn test_duckdb_reports_unsupported() {
        let conn = DuckDbLive::new(duckdb::Connection::open_in_memory().unwrap());
        conn.execute_batch(
            "CREATE TABLE parents (id INTEGER PRIMARY KEY);
             CREATE TABLE children (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parents(id));
             INSERT INTO parents VALUES (1);
             INSERT INTO children VALUES (1, 1);",
        )
        .unwrap();
        let manager = ConstraintManager::new(EngineKind::DuckDb);

        assert!(matches!(
            manager.disable_integrity_checks(&conn),
            Err(VaultError::IntegrityDisableUnsupported(_))
        ));
        assert!(manager.integrity_checks_enabled(&conn).unwrap());

        // 子表在前的顺序下可以逐个清空
        assert_eq!(manager.fast_clear_table(&conn, "children").unwrap(), 1);
        assert_eq!(manager.fast_clear_table(&conn, "parents").unwrap(), 1);
        manager.enable_integrity_checks(&conn).unwrap();
    }
}
