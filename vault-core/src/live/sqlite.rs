use super::{LiveConnection, SqlValue, bind_values, insert_sql, quote_ident, rows_per_statement, select_sql};
use crate::Result;
use crate::config::EngineKind;
use crate::schema::{CollectionSpec, FieldType, Record};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::time::Duration;

/// SQLite 连接
///
/// SQLite 的外键检查是连接级别的设置，默认关闭，这里打开连接时立即开启。
pub struct SqliteLive {
    conn: Connection,
}

impl SqliteLive {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { conn })
    }
}

fn read_cell(row: &Row<'_>, index: usize, field_type: FieldType) -> rusqlite::Result<SqlValue> {
    let value = match field_type {
        FieldType::Integer => row.get::<_, Option<i64>>(index)?.map(SqlValue::Integer),
        FieldType::Real => row.get::<_, Option<f64>>(index)?.map(SqlValue::Real),
        FieldType::Text | FieldType::Timestamp => {
            row.get::<_, Option<String>>(index)?.map(SqlValue::Text)
        }
        FieldType::Boolean => row.get::<_, Option<bool>>(index)?.map(SqlValue::Boolean),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

impl LiveConnection for SqliteLive {
    fn engine(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn count_rows(&self, table: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn stream_rows(
        &self,
        spec: &CollectionSpec,
        sink: &mut dyn FnMut(Record) -> Result<()>,
    ) -> Result<u64> {
        let mut stmt = self.conn.prepare(&select_sql(spec))?;
        let mut rows = stmt.query([])?;
        let mut count = 0u64;

        while let Some(row) = rows.next()? {
            let mut record = Record::new();
            for (i, field) in spec.fields.iter().enumerate() {
                let value = read_cell(row, i, field.field_type)?;
                record.insert(field.name.clone(), value.into_json()?);
            }
            sink(record)?;
            count += 1;
        }

        Ok(count)
    }

    fn insert_batch(&mut self, spec: &CollectionSpec, records: &[Record]) -> Result<u64> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0u64;

        for chunk in records.chunks(rows_per_statement(spec)) {
            let values = bind_values(spec, chunk)?;
            let mut stmt = tx.prepare_cached(&insert_sql(spec, chunk.len()))?;
            inserted += stmt.execute(rusqlite::params_from_iter(values.iter()))? as u64;
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn execute(&self, sql: &str) -> Result<usize> {
        Ok(self.conn.execute(sql, [])?)
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        Ok(self.conn.execute_batch(sql)?)
    }

    fn query_i64(&self, sql: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(sql, [], |row| row.get::<_, Option<i64>>(0))
            .optional()?
            .flatten())
    }

    fn foreign_key_violations(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("PRAGMA foreign_key_check")?;
        let violations = stmt
            .query_map([], |row| {
                let table: String = row.get(0)?;
                let rowid: Option<i64> = row.get(1)?;
                let parent: String = row.get(2)?;
                Ok(format!(
                    "{table} 第 {} 行引用的 {parent} 记录不存在",
                    rowid.map(|r| r.to_string()).unwrap_or_else(|| "?".to_string())
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;
    use serde_json::json;

    fn tags() -> CollectionSpec {
        CollectionSpec {
            name: "tags".to_string(),
            primary_key: "id".to_string(),
            fields: vec![
                FieldSpec {
                    name: "id".to_string(),
                    field_type: FieldType::Integer,
                },
                FieldSpec {
                    name: "label".to_string(),
                    field_type: FieldType::Text,
                },
                FieldSpec {
                    name: "visible".to_string(),
                    field_type: FieldType::Boolean,
                },
            ],
            references: vec![],
        }
    }

    fn open_with_table() -> (tempfile::TempDir, SqliteLive) {
        let dir = tempfile::tempdir().unwrap();
        let live = SqliteLive::open(&dir.path().join("live.db")).unwrap();
        live.execute_batch(
            "CREATE TABLE tags (id INTEGER PRIMARY KEY, label TEXT, visible BOOLEAN);",
        )
        .unwrap();
        (dir, live)
    }

    #[test]
    fn test_insert_ignores_conflicts_and_streams_back() {
        let (_dir, mut live) = open_with_table();
        let spec = tags();
        let records: Vec<Record> = (1..=3)
            .map(|i| {
                json!({"id": i, "label": format!("t{i}"), "visible": i % 2 == 0})
                    .as_object()
                    .unwrap()
                    .clone()
            })
            .collect();

        assert_eq!(live.insert_batch(&spec, &records).unwrap(), 3);
        // 第二次插入全部冲突，被忽略
        assert_eq!(live.insert_batch(&spec, &records).unwrap(), 0);
        assert_eq!(live.count_rows("tags").unwrap(), 3);

        let mut streamed = Vec::new();
        let count = live
            .stream_rows(&spec, &mut |r| {
                streamed.push(r);
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(streamed, records);
    }

    #[test]
    fn test_nulls_survive() {
        let (_dir, mut live) = open_with_table();
        let record = json!({"id": 1, "label": null, "visible": null})
            .as_object()
            .unwrap()
            .clone();
        live.insert_batch(&tags(), std::slice::from_ref(&record))
            .unwrap();

        let mut streamed = Vec::new();
        live.stream_rows(&tags(), &mut |r| {
            streamed.push(r);
            Ok(())
        })
        .unwrap();
        assert_eq!(streamed, vec![record]);
    }

    #[test]
    fn test_foreign_keys_enabled_on_open() {
        let (_dir, live) = open_with_table();
        assert_eq!(live.query_i64("PRAGMA foreign_keys").unwrap(), Some(1));
        assert!(live.table_exists("tags").unwrap());
        assert!(!live.table_exists("missing").unwrap());
    }
}
