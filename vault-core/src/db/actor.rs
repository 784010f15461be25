use crate::Result;
use chrono::{DateTime, Utc};
use duckdb::{Connection, Row, params};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::messages::DbMessage;
use super::models::{BackupRow, RestoreRow, ScheduleRow};

const BACKUP_COLUMNS: &str = "id, name, kind, status, progress_percent, current_operation, \
     created_by, created_at, completed_at, archive_path, archive_size_bytes, checksum, error_message";

const RESTORE_COLUMNS: &str = "id, backup_id, status, progress_percent, current_operation, \
     started_at, finished_at, options, result_summary, error_message";

/// DuckDB Actor - 确保单线程访问DuckDB
pub struct DuckDbActor {
    connection: Connection,
}

impl DuckDbActor {
    /// 创建新的DuckDB Actor
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let connection = Connection::open(db_path)?;
        Ok(Self { connection })
    }

    /// 创建内存DuckDB Actor
    pub fn new_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        Ok(Self { connection })
    }

    /// 运行Actor消息循环（在专用线程上阻塞执行）
    pub fn run(mut self, mut receiver: mpsc::Receiver<DbMessage>) {
        info!("目录库 Actor 已启动");

        while let Some(message) = receiver.blocking_recv() {
            self.handle_message(message);
        }

        info!("目录库 Actor 已关闭");
    }

    /// 处理数据库消息
    fn handle_message(&mut self, message: DbMessage) {
        match message {
            DbMessage::InitTables { respond_to } => {
                let _ = respond_to.send(self.init_tables());
            }
            DbMessage::InsertBackup { row, respond_to } => {
                let _ = respond_to.send(self.insert_backup(&row));
            }
            DbMessage::GetBackup { id, respond_to } => {
                let _ = respond_to.send(self.get_backup(&id));
            }
            DbMessage::ListBackups {
                offset,
                limit,
                respond_to,
            } => {
                let _ = respond_to.send(self.list_backups(offset, limit));
            }
            DbMessage::ListBackupsCreatedBefore { cutoff, respond_to } => {
                let _ = respond_to.send(self.list_backups_created_before(cutoff));
            }
            DbMessage::UpdateBackupProgress {
                id,
                percent,
                label,
                respond_to,
            } => {
                let result = self.update_progress("backups", &id, percent, &label);
                let _ = respond_to.send(result);
            }
            DbMessage::TransitionBackup {
                id,
                from,
                to,
                error_message,
                finished_at,
                respond_to,
            } => {
                let result = self.transition_backup(
                    &id,
                    &from,
                    &to,
                    error_message.as_deref(),
                    finished_at,
                );
                let _ = respond_to.send(result);
            }
            DbMessage::SetBackupArchive {
                id,
                archive_path,
                archive_size_bytes,
                checksum,
                respond_to,
            } => {
                let result =
                    self.set_backup_archive(&id, &archive_path, archive_size_bytes, &checksum);
                let _ = respond_to.send(result);
            }
            DbMessage::DeleteBackup { id, respond_to } => {
                let _ = respond_to.send(self.delete_backup(&id));
            }
            DbMessage::InsertRestore { row, respond_to } => {
                let _ = respond_to.send(self.insert_restore(&row));
            }
            DbMessage::GetRestore { id, respond_to } => {
                let _ = respond_to.send(self.get_restore(&id));
            }
            DbMessage::ListRestores {
                offset,
                limit,
                respond_to,
            } => {
                let _ = respond_to.send(self.list_restores(offset, limit));
            }
            DbMessage::UpdateRestoreProgress {
                id,
                percent,
                label,
                respond_to,
            } => {
                let result = self.update_progress("restores", &id, percent, &label);
                let _ = respond_to.send(result);
            }
            DbMessage::TransitionRestore {
                id,
                from,
                to,
                result_summary,
                error_message,
                finished_at,
                respond_to,
            } => {
                let result = self.transition_restore(
                    &id,
                    &from,
                    &to,
                    result_summary.as_deref(),
                    error_message.as_deref(),
                    finished_at,
                );
                let _ = respond_to.send(result);
            }
            DbMessage::CountActiveRestores {
                backup_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.count_active_restores(&backup_id));
            }
            DbMessage::FailInterruptedJobs {
                message,
                respond_to,
            } => {
                let _ = respond_to.send(self.fail_interrupted_jobs(&message));
            }
            DbMessage::InsertSchedule {
                name,
                cadence,
                kind,
                created_at,
                respond_to,
            } => {
                let result = self.insert_schedule(&name, &cadence, &kind, created_at);
                let _ = respond_to.send(result);
            }
            DbMessage::ListSchedules { respond_to } => {
                let _ = respond_to.send(self.list_schedules());
            }
            DbMessage::SetScheduleActive {
                id,
                active,
                respond_to,
            } => {
                let _ = respond_to.send(self.set_schedule_active(id, active));
            }
            DbMessage::UpdateScheduleLastRun {
                id,
                last_run_at,
                respond_to,
            } => {
                let _ = respond_to.send(self.update_schedule_last_run(id, last_run_at));
            }
            DbMessage::DeleteSchedule { id, respond_to } => {
                let _ = respond_to.send(self.delete_schedule(id));
            }
        }
    }

    /// 初始化数据库表
    fn init_tables(&mut self) -> Result<()> {
        debug!("正在初始化目录库表...");

        // 读取并执行SQL初始化脚本
        let sql_content = include_str!("../../migrations/init_duckdb.sql");

        // 按分号分割SQL语句并执行
        for statement in sql_content.split(';') {
            let trimmed = strip_comments(statement);
            if !trimmed.is_empty() {
                self.connection.execute(&trimmed, [])?;
            }
        }

        info!("目录库表初始化完成");
        Ok(())
    }

    fn backup_from_row(row: &Row<'_>) -> duckdb::Result<BackupRow> {
        Ok(BackupRow {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            status: row.get(3)?,
            progress_percent: row.get(4)?,
            current_operation: row.get(5)?,
            created_by: row.get(6)?,
            created_at: row.get(7)?,
            completed_at: row.get(8)?,
            archive_path: row.get(9)?,
            archive_size_bytes: row.get(10)?,
            checksum: row.get(11)?,
            error_message: row.get(12)?,
        })
    }

    fn restore_from_row(row: &Row<'_>) -> duckdb::Result<RestoreRow> {
        Ok(RestoreRow {
            id: row.get(0)?,
            backup_id: row.get(1)?,
            status: row.get(2)?,
            progress_percent: row.get(3)?,
            current_operation: row.get(4)?,
            started_at: row.get(5)?,
            finished_at: row.get(6)?,
            options: row.get(7)?,
            result_summary: row.get(8)?,
            error_message: row.get(9)?,
        })
    }

    /// 插入备份记录
    fn insert_backup(&mut self, row: &BackupRow) -> Result<()> {
        self.connection.execute(
            &format!(
                "INSERT INTO backups ({BACKUP_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                row.id,
                row.name,
                row.kind,
                row.status,
                row.progress_percent,
                row.current_operation,
                row.created_by,
                row.created_at,
                row.completed_at,
                row.archive_path,
                row.archive_size_bytes,
                row.checksum,
                row.error_message,
            ],
        )?;
        Ok(())
    }

    /// 根据ID获取备份记录
    fn get_backup(&mut self, id: &str) -> Result<Option<BackupRow>> {
        let mut stmt = self
            .connection
            .prepare(&format!("SELECT {BACKUP_COLUMNS} FROM backups WHERE id = ?"))?;
        let mut rows = stmt.query(params![id])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::backup_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    /// 分页获取备份记录
    fn list_backups(&mut self, offset: i64, limit: i64) -> Result<(Vec<BackupRow>, i64)> {
        let mut stmt = self.connection.prepare(&format!(
            "SELECT {BACKUP_COLUMNS} FROM backups ORDER BY created_at DESC, id LIMIT ? OFFSET ?"
        ))?;
        let backup_iter = stmt.query_map(params![limit, offset], Self::backup_from_row)?;

        let mut backups = Vec::new();
        for backup in backup_iter {
            backups.push(backup?);
        }

        let total: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM backups", [], |row| row.get(0))?;

        Ok((backups, total))
    }

    /// 获取创建时间早于 cutoff 的备份
    fn list_backups_created_before(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<BackupRow>> {
        let mut stmt = self.connection.prepare(&format!(
            "SELECT {BACKUP_COLUMNS} FROM backups WHERE created_at < ? ORDER BY created_at"
        ))?;
        let backup_iter = stmt.query_map(params![cutoff], Self::backup_from_row)?;

        let mut backups = Vec::new();
        for backup in backup_iter {
            backups.push(backup?);
        }
        Ok(backups)
    }

    /// 更新进度，百分比只增不减
    fn update_progress(&mut self, table: &str, id: &str, percent: i32, label: &str) -> Result<()> {
        self.connection.execute(
            &format!(
                "UPDATE {table} SET progress_percent = GREATEST(progress_percent, ?), \
                 current_operation = ? WHERE id = ?"
            ),
            params![percent, label, id],
        )?;
        Ok(())
    }

    /// 切换备份状态，只有当前状态在 `from` 中时才会生效
    fn transition_backup(
        &mut self,
        id: &str,
        from: &[String],
        to: &str,
        error_message: Option<&str>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let Some(current) = self.get_backup(id)? else {
            return Ok(0);
        };
        if !from.iter().any(|s| s == &current.status) {
            return Ok(0);
        }

        let progress_sql = if to == "completed" {
            ", progress_percent = 100"
        } else {
            ""
        };
        let changed = self.connection.execute(
            &format!(
                "UPDATE backups SET status = ?, \
                 error_message = COALESCE(CAST(? AS VARCHAR), error_message), \
                 completed_at = COALESCE(CAST(? AS TIMESTAMP), completed_at){progress_sql} \
                 WHERE id = ? AND status = ?"
            ),
            params![to, error_message, finished_at, id, current.status],
        )?;
        Ok(changed)
    }

    /// 写入归档路径、大小和校验和
    fn set_backup_archive(
        &mut self,
        id: &str,
        archive_path: &str,
        archive_size_bytes: i64,
        checksum: &str,
    ) -> Result<()> {
        self.connection.execute(
            "UPDATE backups SET archive_path = ?, archive_size_bytes = ?, checksum = ? WHERE id = ?",
            params![archive_path, archive_size_bytes, checksum, id],
        )?;
        Ok(())
    }

    /// 删除备份记录
    fn delete_backup(&mut self, id: &str) -> Result<()> {
        self.connection.execute(
            "DELETE FROM restores WHERE backup_id = ? AND status IN ('completed', 'failed')",
            params![id],
        )?;
        self.connection
            .execute("DELETE FROM backups WHERE id = ?", params![id])?;
        Ok(())
    }

    /// 插入恢复记录
    fn insert_restore(&mut self, row: &RestoreRow) -> Result<()> {
        self.connection.execute(
            &format!("INSERT INTO restores ({RESTORE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                row.id,
                row.backup_id,
                row.status,
                row.progress_percent,
                row.current_operation,
                row.started_at,
                row.finished_at,
                row.options,
                row.result_summary,
                row.error_message,
            ],
        )?;
        Ok(())
    }

    /// 根据ID获取恢复记录
    fn get_restore(&mut self, id: &str) -> Result<Option<RestoreRow>> {
        let mut stmt = self
            .connection
            .prepare(&format!("SELECT {RESTORE_COLUMNS} FROM restores WHERE id = ?"))?;
        let mut rows = stmt.query(params![id])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::restore_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    /// 分页获取恢复记录
    fn list_restores(&mut self, offset: i64, limit: i64) -> Result<(Vec<RestoreRow>, i64)> {
        let mut stmt = self.connection.prepare(&format!(
            "SELECT {RESTORE_COLUMNS} FROM restores ORDER BY started_at DESC, id LIMIT ? OFFSET ?"
        ))?;
        let restore_iter = stmt.query_map(params![limit, offset], Self::restore_from_row)?;

        let mut restores = Vec::new();
        for restore in restore_iter {
            restores.push(restore?);
        }

        let total: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM restores", [], |row| row.get(0))?;

        Ok((restores, total))
    }

    /// 切换恢复状态
    fn transition_restore(
        &mut self,
        id: &str,
        from: &[String],
        to: &str,
        result_summary: Option<&str>,
        error_message: Option<&str>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let Some(current) = self.get_restore(id)? else {
            return Ok(0);
        };
        if !from.iter().any(|s| s == &current.status) {
            return Ok(0);
        }

        let progress_sql = if to == "completed" {
            ", progress_percent = 100"
        } else {
            ""
        };
        let changed = self.connection.execute(
            &format!(
                "UPDATE restores SET status = ?, \
                 result_summary = COALESCE(CAST(? AS VARCHAR), result_summary), \
                 error_message = COALESCE(CAST(? AS VARCHAR), error_message), \
                 finished_at = COALESCE(CAST(? AS TIMESTAMP), finished_at){progress_sql} \
                 WHERE id = ? AND status = ?"
            ),
            params![to, result_summary, error_message, finished_at, id, current.status],
        )?;
        Ok(changed)
    }

    /// 统计引用指定备份的进行中恢复
    fn count_active_restores(&mut self, backup_id: &str) -> Result<i64> {
        let count: i64 = self.connection.query_row(
            "SELECT COUNT(*) FROM restores WHERE backup_id = ? AND status IN ('pending', 'in_progress')",
            params![backup_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 标记遗留任务失败
    fn fail_interrupted_jobs(&mut self, message: &str) -> Result<(usize, usize)> {
        let now = Utc::now();
        let backups = self.connection.execute(
            "UPDATE backups SET status = 'failed', error_message = ?, completed_at = ? \
             WHERE status IN ('pending', 'in_progress')",
            params![message, now],
        )?;
        let restores = self.connection.execute(
            "UPDATE restores SET status = 'failed', error_message = ?, finished_at = ? \
             WHERE status IN ('pending', 'in_progress')",
            params![message, now],
        )?;
        Ok((backups, restores))
    }

    /// 创建备份计划
    fn insert_schedule(
        &mut self,
        name: &str,
        cadence: &str,
        kind: &str,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        self.connection.execute(
            "INSERT INTO schedules (name, cadence, kind, is_active, created_at) \
             VALUES (?, ?, ?, TRUE, ?)",
            params![name, cadence, kind, created_at],
        )?;

        // 获取刚插入的ID
        let id: i64 = self
            .connection
            .query_row("SELECT currval('schedule_id_seq')", [], |row| row.get(0))?;
        Ok(id)
    }

    /// 获取全部备份计划
    fn list_schedules(&mut self) -> Result<Vec<ScheduleRow>> {
        let mut stmt = self.connection.prepare(
            "SELECT id, name, cadence, kind, is_active, last_run_at, created_at \
             FROM schedules ORDER BY id",
        )?;

        let schedule_iter = stmt.query_map([], |row| {
            Ok(ScheduleRow {
                id: row.get(0)?,
                name: row.get(1)?,
                cadence: row.get(2)?,
                kind: row.get(3)?,
                is_active: row.get(4)?,
                last_run_at: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;

        let mut schedules = Vec::new();
        for schedule in schedule_iter {
            schedules.push(schedule?);
        }
        Ok(schedules)
    }

    /// 启用或停用备份计划
    fn set_schedule_active(&mut self, id: i64, active: bool) -> Result<usize> {
        let changed = self.connection.execute(
            "UPDATE schedules SET is_active = ? WHERE id = ?",
            params![active, id],
        )?;
        Ok(changed)
    }

    /// 更新计划最近执行时间
    fn update_schedule_last_run(&mut self, id: i64, last_run_at: DateTime<Utc>) -> Result<()> {
        self.connection.execute(
            "UPDATE schedules SET last_run_at = ? WHERE id = ?",
            params![last_run_at, id],
        )?;
        Ok(())
    }

    /// 删除备份计划
    fn delete_schedule(&mut self, id: i64) -> Result<usize> {
        let changed = self
            .connection
            .execute("DELETE FROM schedules WHERE id = ?", params![id])?;
        Ok(changed)
    }
}

/// 去掉 `--` 注释行，避免把纯注释片段当作语句执行
fn strip_comments(statement: &str) -> String {
    statement
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
