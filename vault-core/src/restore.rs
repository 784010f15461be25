use crate::backup::{BackupRequest, BackupService};
use crate::catalog::{
    Backup, BackupKind, Catalog, CollectionOutcome, RestoreOptions, RestoreRecord, RestoreSummary,
};
use crate::codec::{
    DumpReader, OpenedArchive, deserialize_collection, extract_media, open_archive,
    read_dump_header, verify_archive,
};
use crate::config::Granularity;
use crate::constraints::{ConstraintManager, IntegrityMode};
use crate::live::{LiveConnection, LiveDatabase, PinnedConnection};
use crate::progress::{JobHandle, JobKind, ProgressTracker};
use crate::schema::{CollectionRegistry, CollectionSpec, Record};
use crate::{Result, VaultError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// 摘要中最多列出的悬空引用条数
const MAX_REPORTED_VIOLATIONS: usize = 20;

/// 恢复服务
///
/// 恢复会清空线上表，同一时刻只允许一个恢复任务，互斥锁是服务自身的字段。
#[derive(Debug, Clone)]
pub struct RestoreService {
    catalog: Catalog,
    live: LiveDatabase,
    registry: Arc<CollectionRegistry>,
    tracker: ProgressTracker,
    backups: BackupService,
    constraints: ConstraintManager,
    settings: Arc<RestoreSettings>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Clone)]
pub struct RestoreSettings {
    pub media_root: PathBuf,
    /// 每批插入的记录数
    pub batch_size: usize,
}

/// 已拿到恢复锁、尚未执行的恢复任务；锁随任务结束释放
pub struct RestoreTicket {
    pub record: RestoreRecord,
    backup: Backup,
    handle: Arc<JobHandle>,
    guard: OwnedMutexGuard<()>,
}

/// 计划恢复的集合
struct PlannedCollection {
    spec: CollectionSpec,
    dump_path: PathBuf,
    expected: u64,
}

/// 进度区间
#[derive(Debug, Clone, Copy)]
struct Span {
    start: u8,
    end: u8,
}

impl Span {
    fn at(&self, done: u64, total: u64) -> u8 {
        let width = u64::from(self.end.saturating_sub(self.start));
        let offset = (width * done.min(total)) / total.max(1);
        self.start + offset as u8
    }
}

const COLLECTIONS_SPAN: Span = Span { start: 20, end: 85 };

impl RestoreService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Catalog,
        live: LiveDatabase,
        registry: Arc<CollectionRegistry>,
        tracker: ProgressTracker,
        backups: BackupService,
        settings: RestoreSettings,
    ) -> Self {
        let constraints = ConstraintManager::new(live.engine());
        Self {
            catalog,
            live,
            registry,
            tracker,
            backups,
            constraints,
            settings: Arc::new(settings),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// 是否有恢复任务正在执行
    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// 获取恢复锁并创建恢复记录
    ///
    /// 锁被占用时立即返回 `RestoreInProgress`，不排队等待。
    pub async fn prepare(&self, backup_id: Uuid, options: RestoreOptions) -> Result<RestoreTicket> {
        let guard = self.lock.clone().try_lock_owned().map_err(|_| {
            VaultError::RestoreInProgress("请等待当前恢复任务结束后再试".to_string())
        })?;

        let backup = self.backups.completed_backup(backup_id).await?;
        if let Some(subset) = &options.collections {
            if subset.is_empty() {
                return Err(VaultError::invalid_state("指定的恢复集合列表为空"));
            }
            if let Some(unknown) = subset.iter().find(|n| self.registry.get(n).is_none()) {
                return Err(VaultError::schema(format!("集合 {unknown} 未注册")));
            }
        }

        let record = self.catalog.create_restore(backup_id, &options).await?;
        let handle = self.tracker.register(record.id, JobKind::Restore);
        info!(restore_id = %record.id, backup_id = %backup_id, "已创建恢复任务");

        Ok(RestoreTicket {
            record,
            backup,
            handle,
            guard,
        })
    }

    /// 在后台执行恢复，立即返回 pending 状态的记录
    pub async fn start_restore(
        &self,
        backup_id: Uuid,
        options: RestoreOptions,
    ) -> Result<RestoreRecord> {
        let ticket = self.prepare(backup_id, options).await?;
        let record = ticket.record.clone();
        let service = self.clone();
        tokio::spawn(async move {
            let _ = service.run(ticket).await;
        });
        Ok(record)
    }

    /// 执行恢复并等待结束
    pub async fn restore_backup(
        &self,
        backup_id: Uuid,
        options: RestoreOptions,
    ) -> Result<RestoreRecord> {
        let ticket = self.prepare(backup_id, options).await?;
        self.run(ticket).await
    }

    #[instrument(skip_all, fields(restore_id = %ticket.record.id, backup_id = %ticket.backup.id))]
    pub async fn run(&self, ticket: RestoreTicket) -> Result<RestoreRecord> {
        let RestoreTicket {
            record,
            backup,
            handle,
            guard,
        } = ticket;

        let mut summary = RestoreSummary::default();
        let executed = self
            .execute(&record, &backup, &handle, &mut summary)
            .await;

        let outcome = match executed {
            Ok(()) => self.catalog.complete_restore(record.id, &summary).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            if let Err(mark_err) = self
                .catalog
                .fail_restore(record.id, &e.to_string(), Some(&summary))
                .await
            {
                error!("无法把恢复任务标记为失败: {}", mark_err);
            }
        }
        // 终态已写入目录库，此时才释放锁；随后通知等待进度的调用方
        drop(guard);

        match outcome {
            Ok(()) => {
                handle.complete("恢复完成");
                info!(
                    "✅ 恢复完成: {} 个集合, {} 个媒体文件, {} 条警告",
                    summary.collections.len(),
                    summary.media_restored,
                    summary.warnings.len()
                );
                self.catalog.get_restore(record.id).await
            }
            Err(e) => {
                let message = e.to_string();
                error!("❌ 恢复失败: {}", message);
                handle.fail(message);
                Err(e)
            }
        }
    }

    async fn report(&self, restore_id: Uuid, handle: &JobHandle, percent: u8, label: &str) {
        handle.set(percent, label);
        if let Err(e) = self
            .catalog
            .update_restore_progress(restore_id, percent, label)
            .await
        {
            warn!("保存恢复进度失败: {}", e);
        }
    }

    async fn execute(
        &self,
        record: &RestoreRecord,
        backup: &Backup,
        handle: &Arc<JobHandle>,
        summary: &mut RestoreSummary,
    ) -> Result<()> {
        self.catalog.mark_restore_started(record.id).await?;
        handle.mark_started();
        let options = &record.options;

        // 1. 打开并校验归档，任何数据被改动之前完成
        self.report(record.id, handle, 1, "打开归档").await;
        let archive_path = backup
            .archive_path
            .clone()
            .ok_or_else(|| VaultError::corrupt("备份记录缺少归档路径"))?;
        let staging_parent = self.backups.backup_dir(backup.id);
        let opened = {
            let archive_path = archive_path.clone();
            tokio::task::spawn_blocking(move || open_archive(&archive_path, &staging_parent))
                .await??
        };

        self.report(record.id, handle, 3, "校验归档").await;
        let opened = self
            .verify(opened, archive_path, backup, options, summary)
            .await?;

        self.constraints.ensure_same_engine(opened.manifest.engine)?;
        summary.granularity = Some(opened.manifest.granularity);

        let plan = self.plan(&opened, options, summary).await?;

        // 2. 恢复前的安全备份
        handle.check_cancelled()?;
        if options.wants_pre_backup() {
            self.report(record.id, handle, 5, "恢复前创建安全备份").await;
            let pre = self
                .backups
                .create_backup(BackupRequest {
                    kind: BackupKind::Full,
                    name: Some(format!("pre_restore_{}", record.id.simple())),
                    created_by: format!("restore:{}", record.id),
                })
                .await
                .map_err(|e| VaultError::custom(format!("恢复前的安全备份失败，已中止恢复: {e}")))?;
            info!("安全备份已完成: {}", pre.id);
            summary.pre_backup_id = Some(pre.id);
        }

        // 3. 替换数据和媒体，无论成败都重新开启外键检查
        handle.check_cancelled()?;
        let mut conn = PinnedConnection::open(&self.live).await?;
        let replaced = self
            .replace_live_data(&mut conn, &plan, &opened, record, handle, summary)
            .await;

        let constraints = self.constraints;
        let reenabled = conn
            .with(move |c| {
                constraints.enable_integrity_checks(c)?;
                constraints.integrity_checks_enabled(c)
            })
            .await
            .map(|enabled| summary.integrity_checks_enabled = Some(enabled));
        match (replaced, reenabled) {
            (Ok(()), Ok(())) => {}
            (Err(e), Ok(())) | (Ok(()), Err(e)) => return Err(e),
            (Err(e), Err(enable_err)) => {
                error!("重新开启外键检查失败: {}", enable_err);
                summary
                    .errors
                    .push(format!("重新开启外键检查失败: {enable_err}"));
                return Err(e);
            }
        }

        // 4. 核对
        self.report(record.id, handle, 95, "核对恢复结果").await;
        self.verify_counts(&mut conn, options, summary).await?;

        Ok(())
    }

    /// 校验归档；关闭校验时只记录警告
    async fn verify(
        &self,
        opened: OpenedArchive,
        archive_path: PathBuf,
        backup: &Backup,
        options: &RestoreOptions,
        summary: &mut RestoreSummary,
    ) -> Result<OpenedArchive> {
        let deep = options.wants_deep_verification();
        let expected = backup.checksum.clone();
        let (opened, verdict) = tokio::task::spawn_blocking(move || {
            let verdict = verify_archive(&opened, &archive_path, expected.as_deref(), deep);
            (opened, verdict)
        })
        .await?;

        match verdict {
            Ok(()) => {}
            Err(e) if options.verify => return Err(e),
            Err(e) => {
                warn!("⚠️ 归档校验未通过，已按要求跳过校验继续恢复: {}", e);
                summary
                    .warnings
                    .push(format!("归档校验未通过（已跳过校验）: {e}"));
            }
        }

        if opened.manifest.backup_id != backup.id {
            summary.warnings.push(format!(
                "归档清单中的备份 ID {} 与记录 {} 不一致",
                opened.manifest.backup_id, backup.id
            ));
        }
        Ok(opened)
    }

    /// 决定要恢复哪些集合，结构漂移记为警告
    async fn plan(
        &self,
        opened: &OpenedArchive,
        options: &RestoreOptions,
        summary: &mut RestoreSummary,
    ) -> Result<Vec<PlannedCollection>> {
        let manifest = &opened.manifest;

        if let Some(subset) = &options.collections {
            if manifest.granularity == Granularity::Database {
                return Err(VaultError::invalid_state(
                    "整库粒度的备份只能整体恢复，不能选择部分集合",
                ));
            }
            if let Some(missing) = subset.iter().find(|n| manifest.collection(n).is_none()) {
                return Err(VaultError::not_found(format!("归档中没有集合 {missing}")));
            }
        }
        let selected = |name: &str| {
            options
                .collections
                .as_ref()
                .is_none_or(|subset| subset.iter().any(|n| n == name))
        };

        let mut plan = Vec::new();
        for entry in &manifest.collections {
            if !selected(&entry.name) {
                continue;
            }
            let Some(spec) = self.registry.get(&entry.name) else {
                warn!("集合 {} 在归档中存在但当前未注册，已跳过", entry.name);
                summary.warnings.push(format!(
                    "集合 {} 在归档中存在但当前未注册，已跳过",
                    entry.name
                ));
                continue;
            };
            plan.push(PlannedCollection {
                spec: spec.clone(),
                dump_path: opened.dump_path(&entry.dump_file),
                expected: entry.record_count,
            });
        }

        if manifest.kind.includes_database() && options.collections.is_none() {
            for spec in self.registry.iter() {
                if manifest.collection(&spec.name).is_none() {
                    summary.warnings.push(format!(
                        "集合 {} 已注册但归档中没有，保持不变",
                        spec.name
                    ));
                }
            }
        }

        // 导出结构必须与当前声明一致，在改动数据前检查
        let headers: Vec<(PathBuf, CollectionSpec)> = plan
            .iter()
            .map(|p| (p.dump_path.clone(), p.spec.clone()))
            .collect();
        tokio::task::spawn_blocking(move || {
            for (path, spec) in &headers {
                let header = read_dump_header(path)?;
                if !header.matches(spec) {
                    return Err(VaultError::schema(format!(
                        "集合 {} 的导出结构与当前声明不一致",
                        spec.name
                    )));
                }
            }
            Ok(())
        })
        .await??;

        // 线上库中已经不存在的表跳过
        let names: Vec<String> = plan.iter().map(|p| p.spec.name.clone()).collect();
        let exists = self
            .live
            .run(move |conn| {
                names
                    .iter()
                    .map(|n| conn.table_exists(n))
                    .collect::<Result<Vec<bool>>>()
            })
            .await?;

        let mut kept = Vec::with_capacity(plan.len());
        for (planned, exists) in plan.into_iter().zip(exists) {
            if exists {
                kept.push(planned);
            } else {
                warn!("线上数据库中没有表 {}，已跳过", planned.spec.name);
                summary.warnings.push(format!(
                    "线上数据库中没有表 {}，已跳过",
                    planned.spec.name
                ));
            }
        }
        Ok(kept)
    }

    /// 关闭外键检查、清空并导入集合、还原媒体
    async fn replace_live_data(
        &self,
        conn: &mut PinnedConnection,
        plan: &[PlannedCollection],
        opened: &OpenedArchive,
        record: &RestoreRecord,
        handle: &Arc<JobHandle>,
        summary: &mut RestoreSummary,
    ) -> Result<()> {
        if !plan.is_empty() {
            let constraints = self.constraints;
            let mode = conn
                .with(move |c| match constraints.disable_integrity_checks(c) {
                    Ok(()) => Ok(IntegrityMode::ChecksDisabled),
                    Err(VaultError::IntegrityDisableUnsupported(reason)) => {
                        warn!("无法关闭外键检查，改为按依赖顺序删除和插入: {}", reason);
                        Ok(IntegrityMode::DependencyOrdered)
                    }
                    Err(e) => Err(e),
                })
                .await?;
            summary.integrity_mode = Some(mode.as_str().to_string());

            let total: u64 = plan.iter().map(|p| p.expected + 1).sum();
            let mut done = 0u64;

            match mode {
                IntegrityMode::ChecksDisabled => {
                    // 外键检查已关闭，按清单顺序逐个清空后导入
                    for planned in plan {
                        handle.check_cancelled()?;
                        self.clear(conn, &planned.spec.name).await?;
                        let outcome = self
                            .load(conn, planned, handle, done, total)
                            .await?;
                        done += planned.expected + 1;
                        self.finish_collection(record.id, handle, outcome, done, total, summary)
                            .await;
                    }
                }
                IntegrityMode::DependencyOrdered => {
                    let names: Vec<String> = plan.iter().map(|p| p.spec.name.clone()).collect();
                    let order = self.registry.dependency_order(&names)?;
                    let by_name = |name: &str| plan.iter().find(|p| p.spec.name == name);

                    // 子表先删
                    for name in order.iter().rev() {
                        handle.check_cancelled()?;
                        self.clear(conn, name).await?;
                    }
                    // 父表先插
                    for name in &order {
                        handle.check_cancelled()?;
                        let Some(planned) = by_name(name) else {
                            continue;
                        };
                        let outcome = self
                            .load(conn, planned, handle, done, total)
                            .await?;
                        done += planned.expected + 1;
                        self.finish_collection(record.id, handle, outcome, done, total, summary)
                            .await;
                    }
                }
            }
        }

        if record.options.restore_media {
            if let Some(container) = opened.media_container() {
                handle.check_cancelled()?;
                self.report(record.id, handle, COLLECTIONS_SPAN.end, "还原媒体文件")
                    .await;
                let media_root = self.settings.media_root.clone();
                let media =
                    tokio::task::spawn_blocking(move || extract_media(&container, &media_root))
                        .await??;
                if !media.skipped.is_empty() {
                    warn!(
                        "媒体还原完成: {} 个文件已还原, {} 个文件跳过",
                        media.restored,
                        media.skipped.len()
                    );
                }
                summary.media_restored = media.restored;
                summary.media_skipped = media.skipped;
            }
        }

        Ok(())
    }

    async fn clear(&self, conn: &mut PinnedConnection, table: &str) -> Result<u64> {
        let constraints = self.constraints;
        let table = table.to_string();
        conn.with(move |c| constraints.fast_clear_table(c, &table))
            .await
    }

    /// 分批导入一个集合，进度在每批之后更新
    async fn load(
        &self,
        conn: &mut PinnedConnection,
        planned: &PlannedCollection,
        handle: &Arc<JobHandle>,
        done_before: u64,
        total: u64,
    ) -> Result<CollectionOutcome> {
        let spec = planned.spec.clone();
        let dump_path = planned.dump_path.clone();
        let expected = planned.expected;
        let batch_size = self.settings.batch_size;
        let handle = handle.clone();

        conn.with(move |c| {
            let reader = deserialize_collection(&dump_path, &spec)?;
            let label = format!("导入集合 {}", spec.name);
            let mut loaded = 0u64;
            let inserted = insert_in_batches(c, &spec, reader, batch_size, |batch| {
                loaded += batch;
                handle.set(COLLECTIONS_SPAN.at(done_before + loaded, total), label.as_str());
            })?;
            info!("集合 {} 导入完成: {} 条记录", spec.name, inserted);
            Ok(CollectionOutcome {
                name: spec.name.clone(),
                expected,
                inserted,
                actual: None,
            })
        })
        .await
    }

    async fn finish_collection(
        &self,
        restore_id: Uuid,
        handle: &JobHandle,
        outcome: CollectionOutcome,
        done: u64,
        total: u64,
        summary: &mut RestoreSummary,
    ) {
        let label = format!("集合 {} 已恢复", outcome.name);
        summary.collections.push(outcome);
        self.report(restore_id, handle, COLLECTIONS_SPAN.at(done, total), &label)
            .await;
    }

    /// 核对行数和悬空引用
    async fn verify_counts(
        &self,
        conn: &mut PinnedConnection,
        options: &RestoreOptions,
        summary: &mut RestoreSummary,
    ) -> Result<()> {
        if summary.collections.is_empty() {
            return Ok(());
        }

        let constraints = self.constraints;
        let violations = conn
            .with(move |c| constraints.dangling_references(c))
            .await?;
        if !violations.is_empty() {
            warn!("恢复后存在 {} 条悬空引用", violations.len());
            let extra = violations.len().saturating_sub(MAX_REPORTED_VIOLATIONS);
            summary.warnings.extend(
                violations
                    .into_iter()
                    .take(MAX_REPORTED_VIOLATIONS)
                    .map(|v| format!("悬空引用: {v}")),
            );
            if extra > 0 {
                summary.warnings.push(format!("另有 {extra} 条悬空引用未列出"));
            }
        }

        if !options.wants_deep_verification() {
            return Ok(());
        }

        let names: Vec<String> = summary.collections.iter().map(|c| c.name.clone()).collect();
        let counts = conn
            .with(move |c| {
                names
                    .iter()
                    .map(|n| c.count_rows(n))
                    .collect::<Result<Vec<u64>>>()
            })
            .await?;

        let mut mismatches = Vec::new();
        for (outcome, actual) in summary.collections.iter_mut().zip(counts) {
            outcome.actual = Some(actual);
            if actual != outcome.expected {
                mismatches.push(format!(
                    "{}: 期望 {} 行, 实际 {} 行",
                    outcome.name, outcome.expected, actual
                ));
            }
        }

        if !mismatches.is_empty() {
            summary.errors.extend(mismatches.iter().cloned());
            return Err(VaultError::Verification(mismatches.join("; ")));
        }
        Ok(())
    }
}

/// 按批读取导出记录并插入，返回实际插入的行数
fn insert_in_batches(
    conn: &mut dyn LiveConnection,
    spec: &CollectionSpec,
    reader: DumpReader,
    batch_size: usize,
    mut on_batch: impl FnMut(u64),
) -> Result<u64> {
    let mut inserted = 0u64;
    let mut batch: Vec<Record> = Vec::with_capacity(batch_size);

    for record in reader {
        batch.push(record?);
        if batch.len() >= batch_size {
            inserted += conn.insert_batch(spec, &batch)?;
            on_batch(batch.len() as u64);
            batch.clear();
        }
    }
    if !batch.is_empty() {
        inserted += conn.insert_batch(spec, &batch)?;
        on_batch(batch.len() as u64);
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_is_monotonic_and_bounded() {
        let span = Span { start: 20, end: 85 };
        assert_eq!(span.at(0, 10), 20);
        assert_eq!(span.at(10, 10), 85);
        assert_eq!(span.at(50, 10), 85);
        assert_eq!(span.at(0, 0), 20);

        let values: Vec<u8> = (0..=100).map(|d| span.at(d, 100)).collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }
}
