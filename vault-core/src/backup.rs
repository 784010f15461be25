use crate::catalog::{Backup, BackupKind, Catalog, JobStatus};
use crate::codec::checksum::sha256_file;
use crate::codec::{
    ArchiveManifest, CollectionEntry, DumpSummary, DumpWriter, MediaEntry, archive_media,
    pack_archive,
};
use crate::config::Granularity;
use crate::constants::archive::{
    ARCHIVE_EXTENSION, DUMP_EXTENSION, DUMPS_DIR_NAME, MEDIA_CONTAINER_NAME, WORK_DIR_NAME,
};
use crate::live::LiveDatabase;
use crate::progress::{JobHandle, JobKind, ProgressTracker};
use crate::schema::{CollectionRegistry, CollectionSpec};
use crate::{Result, VaultError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// 备份服务
#[derive(Debug, Clone)]
pub struct BackupService {
    catalog: Catalog,
    live: LiveDatabase,
    registry: Arc<CollectionRegistry>,
    tracker: ProgressTracker,
    settings: Arc<BackupSettings>,
}

/// 备份服务的静态设置
#[derive(Debug, Clone)]
pub struct BackupSettings {
    /// 归档存储根目录，每个备份一个子目录
    pub storage_root: PathBuf,
    pub media_root: PathBuf,
    /// 压缩级别 (1-9)
    pub compression_level: u32,
    pub granularity: Granularity,
}

/// 备份请求
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub kind: BackupKind,
    /// 为空时自动生成
    pub name: Option<String>,
    pub created_by: String,
}

/// 进度按步骤平均分配，最后一步（打包）完成前最多到 99%
struct StepCounter {
    done: usize,
    total: usize,
}

impl StepCounter {
    fn percent(&self) -> u8 {
        ((self.done * 99) / self.total.max(1)).min(99) as u8
    }
}

impl BackupService {
    pub fn new(
        catalog: Catalog,
        live: LiveDatabase,
        registry: Arc<CollectionRegistry>,
        tracker: ProgressTracker,
        settings: BackupSettings,
    ) -> Self {
        Self {
            catalog,
            live,
            registry,
            tracker,
            settings: Arc::new(settings),
        }
    }

    /// 备份目录：`<storage_root>/<backup_id>`
    pub fn backup_dir(&self, id: Uuid) -> PathBuf {
        self.settings.storage_root.join(id.to_string())
    }

    /// 创建 pending 状态的备份记录并登记进度
    pub async fn prepare(&self, request: BackupRequest) -> Result<(Backup, Arc<JobHandle>)> {
        let backup = self
            .catalog
            .create_backup(request.name, request.kind, &request.created_by)
            .await?;
        let handle = self.tracker.register(backup.id, JobKind::Backup);
        info!(backup_id = %backup.id, kind = %backup.kind, "已创建备份任务: {}", backup.name);
        Ok((backup, handle))
    }

    /// 在后台运行备份，立即返回 pending 状态的记录
    pub async fn start_backup(&self, request: BackupRequest) -> Result<Backup> {
        let (backup, handle) = self.prepare(request).await?;
        let service = self.clone();
        let job = backup.clone();
        tokio::spawn(async move {
            // 结果已写入目录库和进度表
            let _ = service.run(job, handle).await;
        });
        Ok(backup)
    }

    /// 创建备份并等待完成
    pub async fn create_backup(&self, request: BackupRequest) -> Result<Backup> {
        let (backup, handle) = self.prepare(request).await?;
        self.run(backup, handle).await
    }

    /// 执行备份，失败时把记录标记为失败并保留工作目录
    #[instrument(skip_all, fields(backup_id = %backup.id))]
    pub async fn run(&self, backup: Backup, handle: Arc<JobHandle>) -> Result<Backup> {
        match self.execute(&backup, &handle).await {
            Ok(()) => {
                handle.complete("备份完成");
                info!("✅ 备份完成: {}", backup.name);
                self.catalog.get_backup(backup.id).await
            }
            Err(e) => {
                let message = e.to_string();
                error!("❌ 备份失败: {}", message);
                if let Err(mark_err) = self.catalog.fail_backup(backup.id, &message).await {
                    error!("无法把备份标记为失败: {}", mark_err);
                }
                handle.fail(message);
                Err(e)
            }
        }
    }

    async fn report(&self, backup_id: Uuid, handle: &JobHandle, percent: u8, label: &str) {
        handle.set(percent, label);
        if let Err(e) = self
            .catalog
            .update_backup_progress(backup_id, percent, label)
            .await
        {
            warn!("保存备份进度失败: {}", e);
        }
    }

    async fn execute(&self, backup: &Backup, handle: &JobHandle) -> Result<()> {
        self.catalog.mark_backup_started(backup.id).await?;
        handle.mark_started();

        let backup_dir = self.backup_dir(backup.id);
        let work_dir = backup_dir.join(WORK_DIR_NAME);
        tokio::fs::create_dir_all(work_dir.join(DUMPS_DIR_NAME)).await?;

        let specs: Vec<CollectionSpec> = if backup.kind.includes_database() {
            self.registry.iter().cloned().collect()
        } else {
            Vec::new()
        };
        let mut steps = StepCounter {
            done: 0,
            total: specs.len() + usize::from(backup.kind.includes_media()) + 1,
        };

        // 引擎只作为来源写入清单，是否可恢复由恢复端的约束管理器判断
        let mut manifest = ArchiveManifest::new(
            backup.id,
            backup.kind,
            self.settings.granularity,
            self.live.engine(),
        );

        // 1. 按注册顺序逐个导出集合
        for spec in specs {
            handle.check_cancelled()?;
            let label = format!("导出集合 {}", spec.name);
            self.report(backup.id, handle, steps.percent(), &label).await;

            let entry = self.dump_collection(&work_dir, spec).await?;
            info!(
                "集合 {} 导出完成: {} 条记录",
                entry.name, entry.record_count
            );
            manifest.collections.push(entry);
            steps.done += 1;
        }

        // 2. 媒体文件
        if backup.kind.includes_media() {
            handle.check_cancelled()?;
            self.report(backup.id, handle, steps.percent(), "打包媒体文件")
                .await;
            manifest.media = Some(self.archive_media(&work_dir).await?);
            steps.done += 1;
        }

        // 3. 写清单并压缩
        handle.check_cancelled()?;
        self.report(backup.id, handle, steps.percent(), "压缩归档").await;
        manifest.seal()?;

        let archive_path = backup_dir.join(format!(
            "{}.{ARCHIVE_EXTENSION}",
            archive_file_stem(&backup.name)
        ));
        let level = self.settings.compression_level;
        let packed = {
            let work_dir = work_dir.clone();
            let archive_path = archive_path.clone();
            tokio::task::spawn_blocking(move || {
                pack_archive(&work_dir, &manifest, &archive_path, level)
            })
            .await??
        };

        self.catalog
            .complete_backup(backup.id, &packed.path, packed.size_bytes, &packed.checksum)
            .await?;

        // 成功后清理工作目录，失败时保留以便排查
        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            warn!("清理工作目录失败 {}: {}", work_dir.display(), e);
        }

        info!(
            "归档已写入 {} ({} 字节)",
            packed.path.display(),
            packed.size_bytes
        );
        Ok(())
    }

    /// 导出单个集合，错误统一包装为 `PartialBackup`
    async fn dump_collection(&self, work_dir: &Path, spec: CollectionSpec) -> Result<CollectionEntry> {
        let dump_file = format!("{DUMPS_DIR_NAME}/{}.{DUMP_EXTENSION}", spec.name);
        let path = work_dir.join(&dump_file);
        let name = spec.name.clone();

        let summary: Result<DumpSummary> = self
            .live
            .run(move |conn| {
                let mut writer = DumpWriter::create(&path, &spec)?;
                conn.stream_rows(&spec, &mut |record| writer.write_record(&record))?;
                writer.finish()
            })
            .await;

        match summary {
            Ok(summary) => Ok(CollectionEntry {
                name,
                record_count: summary.record_count,
                checksum: summary.checksum,
                dump_file,
            }),
            Err(e) => Err(VaultError::PartialBackup {
                collection: name,
                message: e.to_string(),
            }),
        }
    }

    async fn archive_media(&self, work_dir: &Path) -> Result<MediaEntry> {
        let media_root = self.settings.media_root.clone();
        let container = work_dir.join(MEDIA_CONTAINER_NAME);
        let level = self.settings.compression_level;

        let (media_manifest, container_checksum) = tokio::task::spawn_blocking(move || {
            let manifest = archive_media(&media_root, &container, level)?;
            let checksum = sha256_file(&container)?;
            Ok::<_, VaultError>((manifest, checksum))
        })
        .await??;

        info!("媒体文件打包完成: {} 个文件", media_manifest.files.len());
        Ok(MediaEntry {
            container_file: MEDIA_CONTAINER_NAME.to_string(),
            file_count: media_manifest.files.len() as u64,
            total_bytes: media_manifest.total_bytes,
            tree_checksum: media_manifest.tree_checksum,
            container_checksum,
        })
    }

    /// 删除备份记录和整个备份目录
    ///
    /// 备份仍在进行或正被恢复任务引用时拒绝删除。
    pub async fn delete_backup(&self, id: Uuid) -> Result<()> {
        let backup = self.catalog.get_backup(id).await?;
        if !backup.status.is_terminal() {
            return Err(VaultError::invalid_state(format!(
                "备份 {id} 仍在进行中 ({})",
                backup.status
            )));
        }
        if self.catalog.active_restores_for(id).await? > 0 {
            return Err(VaultError::invalid_state(format!(
                "备份 {id} 正在被恢复任务使用"
            )));
        }

        let dir = self.backup_dir(id);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await?;
            info!("删除备份目录: {}", dir.display());
        }
        // 归档可能在旧的存储根目录下
        if let Some(path) = backup.archive_path.filter(|p| !p.starts_with(&dir)) {
            if path.exists() {
                tokio::fs::remove_file(&path).await?;
                info!("删除备份文件: {}", path.display());
            }
        }

        self.catalog.delete_backup_record(id).await?;
        Ok(())
    }

    /// 确认备份可用于恢复
    pub async fn completed_backup(&self, id: Uuid) -> Result<Backup> {
        let backup = self.catalog.get_backup(id).await?;
        if backup.status != JobStatus::Completed {
            return Err(VaultError::invalid_state(format!(
                "只能从已完成的备份恢复，备份 {id} 当前状态为 {}",
                backup.status
            )));
        }
        Ok(backup)
    }
}

/// 归档文件名只保留字母、数字、`-`、`_` 和 `.`
fn archive_file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.trim_matches('.').is_empty() {
        "backup".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_file_stem() {
        assert_eq!(archive_file_stem("nightly 2024/05"), "nightly_2024_05");
        assert_eq!(archive_file_stem("备份"), "__");
        assert_eq!(archive_file_stem(".."), "backup");
        assert_eq!(archive_file_stem("backup_full_2024-05-01"), "backup_full_2024-05-01");
    }

    #[test]
    fn test_step_counter_stays_below_100() {
        let mut steps = StepCounter { done: 0, total: 4 };
        let mut seen = Vec::new();
        for _ in 0..=4 {
            seen.push(steps.percent());
            steps.done += 1;
        }
        assert_eq!(seen, vec![0, 24, 49, 74, 99]);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}
