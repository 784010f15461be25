use super::{LiveConnection, SqlValue, bind_values, insert_sql, quote_ident, rows_per_statement, select_sql};
use crate::Result;
use crate::config::EngineKind;
use crate::schema::{CollectionSpec, FieldType, Record};
use duckdb::{Connection, OptionalExt, Row, params};

/// DuckDB 连接
///
/// DuckDB 的外键约束始终生效，无法按连接关闭。
pub struct DuckDbLive {
    conn: Connection,
}

impl DuckDbLive {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

fn read_cell(row: &Row<'_>, index: usize, field_type: FieldType) -> duckdb::Result<SqlValue> {
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

impl LiveConnection for DuckDbLive {
    fn engine(&self) -> EngineKind {
        EngineKind::DuckDb
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            params![table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
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
            let mut stmt = tx.prepare(&insert_sql(spec, chunk.len()))?;
            inserted += stmt.execute(duckdb::params_from_iter(values.iter()))? as u64;
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

    /// 约束始终生效，不会存在违反外键的记录
    fn foreign_key_violations(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;
    use serde_json::json;

    fn spec() -> CollectionSpec {
        CollectionSpec {
            name: "events".to_string(),
            primary_key: "id".to_string(),
            fields: vec![
                FieldSpec {
                    name: "id".to_string(),
                    field_type: FieldType::Integer,
                },
                FieldSpec {
                    name: "at".to_string(),
                    field_type: FieldType::Timestamp,
                },
                FieldSpec {
                    name: "weight".to_string(),
                    field_type: FieldType::Real,
                },
            ],
            references: vec![],
        }
    }

    #[test]
    fn test_duckdb_insert_or_ignore_and_stream() {
        let mut live = DuckDbLive::new(Connection::open_in_memory().unwrap());
        live.execute_batch("CREATE TABLE events (id BIGINT PRIMARY KEY, at VARCHAR, weight DOUBLE);")
            .unwrap();

        let records: Vec<Record> = vec![
            json!({"id": 2, "at": "2024-05-01T10:00:00Z", "weight": 1.5}),
            json!({"id": 1, "at": null, "weight": null}),
        ]
        .into_iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect();

        assert_eq!(live.insert_batch(&spec(), &records).unwrap(), 2);
        assert_eq!(live.insert_batch(&spec(), &records).unwrap(), 0);
        assert_eq!(live.count_rows("events").unwrap(), 2);
        assert!(live.table_exists("events").unwrap());

        let mut ids = Vec::new();
        live.stream_rows(&spec(), &mut |r| {
            ids.push(r["id"].as_i64().unwrap());
            Ok(())
        })
        .unwrap();
        assert_eq!(ids, vec![1, 2]);
    }
}
