use super::*;
use crate::catalog::JobStatus;
use crate::codec::{media_tree_checksum, open_archive, pack_archive};
use crate::config::{EngineKind, Granularity};
use crate::live::IN_MEMORY;
use crate::schema::{CollectionSpec, FieldSpec, FieldType};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SQLITE_SCHEMA: &str = r#"
CREATE TABLE customers (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT
);
CREATE TABLE orders (
    id INTEGER PRIMARY KEY,
    customer_id INTEGER NOT NULL REFERENCES customers(id),
    total REAL,
    paid BOOLEAN
);
CREATE TABLE notes (
    id INTEGER PRIMARY KEY,
    customer_id INTEGER NOT NULL REFERENCES customers(id),
    body TEXT
);
"#;

const DUCKDB_SCHEMA: &str = r#"
CREATE TABLE customers (
    id BIGINT PRIMARY KEY,
    name VARCHAR NOT NULL,
    created_at VARCHAR
);
CREATE TABLE orders (
    id BIGINT PRIMARY KEY,
    customer_id BIGINT NOT NULL REFERENCES customers(id),
    total DOUBLE,
    paid BOOLEAN
);
CREATE TABLE notes (
    id BIGINT PRIMARY KEY,
    customer_id BIGINT NOT NULL REFERENCES customers(id),
    body VARCHAR
);
"#;

fn field(name: &str, field_type: FieldType) -> FieldSpec {
    FieldSpec {
        name: name.to_string(),
        field_type,
    }
}

fn collections() -> Vec<CollectionSpec> {
    vec![
        CollectionSpec {
            name: "customers".to_string(),
            primary_key: "id".to_string(),
            fields: vec![
                field("id", FieldType::Integer),
                field("name", FieldType::Text),
                field("created_at", FieldType::Timestamp),
            ],
            references: vec![],
        },
        CollectionSpec {
            name: "orders".to_string(),
            primary_key: "id".to_string(),
            fields: vec![
                field("id", FieldType::Integer),
                field("customer_id", FieldType::Integer),
                field("total", FieldType::Real),
                field("paid", FieldType::Boolean),
            ],
            references: vec!["customers".to_string()],
        },
        CollectionSpec {
            name: "notes".to_string(),
            primary_key: "id".to_string(),
            fields: vec![
                field("id", FieldType::Integer),
                field("customer_id", FieldType::Integer),
                field("body", FieldType::Text),
            ],
            references: vec!["customers".to_string()],
        },
    ]
}

struct Fixture {
    _dir: TempDir,
    engine: VaultEngine,
    media_root: PathBuf,
}

async fn fixture(engine_kind: EngineKind, granularity: Granularity) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    let mut config = AppConfig::default();
    config.storage.root = root.join("backups").to_string_lossy().to_string();
    config.catalog.path = root.join("catalog.duckdb").to_string_lossy().to_string();
    config.media.root = root.join("media").to_string_lossy().to_string();
    config.database.engine = engine_kind;
    config.database.path = match engine_kind {
        EngineKind::Sqlite => root.join("store.db").to_string_lossy().to_string(),
        EngineKind::DuckDb => IN_MEMORY.to_string(),
    };
    config.backup.granularity = granularity;
    config.restore.batch_size = 3;
    config.collections = collections();
    config.ensure_dirs().unwrap();

    let catalog = Catalog::open_in_memory().await.unwrap();
    let engine = VaultEngine::with_catalog(config, catalog).await.unwrap();

    let schema = match engine_kind {
        EngineKind::Sqlite => SQLITE_SCHEMA,
        EngineKind::DuckDb => DUCKDB_SCHEMA,
    };
    engine
        .live()
        .run(move |conn| conn.execute_batch(schema))
        .await
        .unwrap();

    Fixture {
        media_root: root.join("media"),
        _dir: dir,
        engine,
    }
}

/// 清空后写入指定数量的记录
async fn seed(engine: &VaultEngine, customers: u64, orders: u64, notes: u64, tag: &str) {
    let tag = tag.to_string();
    engine
        .live()
        .run(move |conn| {
            conn.execute("DELETE FROM notes")?;
            conn.execute("DELETE FROM orders")?;
            conn.execute("DELETE FROM customers")?;
            for i in 1..=customers {
                conn.execute(&format!(
                    "INSERT INTO customers (id, name, created_at) VALUES ({i}, '{tag}-customer-{i}', '2024-05-01T08:00:00Z')"
                ))?;
            }
            for i in 1..=orders {
                let customer = (i - 1) % customers + 1;
                conn.execute(&format!(
                    "INSERT INTO orders (id, customer_id, total, paid) VALUES ({i}, {customer}, {i}.5, true)"
                ))?;
            }
            for i in 1..=notes {
                let customer = (i - 1) % customers + 1;
                conn.execute(&format!(
                    "INSERT INTO notes (id, customer_id, body) VALUES ({i}, {customer}, '{tag}-note-{i}')"
                ))?;
            }
            Ok(())
        })
        .await
        .unwrap();
}

async fn counts(engine: &VaultEngine) -> (u64, u64, u64) {
    engine
        .live()
        .run(|conn| {
            Ok((
                conn.count_rows("customers")?,
                conn.count_rows("orders")?,
                conn.count_rows("notes")?,
            ))
        })
        .await
        .unwrap()
}

fn write_media(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let target = root.join(path);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(target, content).unwrap();
    }
}

fn no_pre_backup() -> RestoreOptions {
    RestoreOptions {
        pre_backup: false,
        ..RestoreOptions::default()
    }
}

#[tokio::test]
async fn test_full_backup_then_restore_replaces_live_data() {
    let fx = fixture(EngineKind::Sqlite, Granularity::Collections).await;
    seed(&fx.engine, 10, 0, 4, "original").await;
    write_media(
        &fx.media_root,
        &[("logo.png", "png-bytes"), ("products/1/photo.jpg", "jpg-bytes")],
    );
    let media_before = media_tree_checksum(&fx.media_root).unwrap();

    let backup = fx
        .engine
        .create_backup(BackupKind::Full, Some("nightly".to_string()), "test")
        .await
        .unwrap();
    assert_eq!(backup.status, JobStatus::Completed);
    assert_eq!(backup.progress_percent, 100);
    let archive_path = backup.archive_path.clone().unwrap();
    assert!(archive_path.starts_with(fx.engine.config().get_storage_root().join(backup.id.to_string())));
    assert!(!archive_path.parent().unwrap().join("work").exists());

    let staging = tempfile::tempdir().unwrap();
    let opened = open_archive(&archive_path, staging.path()).unwrap();
    let counts_in_manifest: Vec<(String, u64)> = opened
        .manifest
        .collections
        .iter()
        .map(|c| (c.name.clone(), c.record_count))
        .collect();
    assert_eq!(
        counts_in_manifest,
        vec![
            ("customers".to_string(), 10),
            ("orders".to_string(), 0),
            ("notes".to_string(), 4)
        ]
    );
    assert_eq!(opened.manifest.media.as_ref().unwrap().file_count, 2);

    // 线上数据和媒体在备份之后被改动
    seed(&fx.engine, 99, 1, 1, "changed").await;
    fs::remove_file(fx.media_root.join("logo.png")).unwrap();
    fs::write(fx.media_root.join("products/1/photo.jpg"), "edited").unwrap();

    let restore = fx.engine.restore_backup(backup.id, RestoreOptions::default()).await.unwrap();
    assert_eq!(restore.status, JobStatus::Completed);
    assert_eq!(restore.progress_percent, 100);
    assert_eq!(counts(&fx.engine).await, (10, 0, 4));
    assert_eq!(media_tree_checksum(&fx.media_root).unwrap(), media_before);

    let summary = restore.result_summary.unwrap();
    assert_eq!(summary.integrity_mode.as_deref(), Some("checks_disabled"));
    assert_eq!(summary.media_restored, 2);
    assert!(summary.media_skipped.is_empty());
    assert!(summary.collections.iter().all(|c| c.actual == Some(c.expected)));

    // 预备份保存了恢复前的数据
    let pre_backup = fx.engine.get_backup(summary.pre_backup_id.unwrap()).await.unwrap();
    assert_eq!(pre_backup.status, JobStatus::Completed);
    let staging = tempfile::tempdir().unwrap();
    let opened = open_archive(pre_backup.archive_path.as_ref().unwrap(), staging.path()).unwrap();
    assert_eq!(opened.manifest.collection("customers").unwrap().record_count, 99);
}

#[tokio::test]
async fn test_restoring_twice_gives_same_state() {
    let fx = fixture(EngineKind::Sqlite, Granularity::Collections).await;
    seed(&fx.engine, 5, 3, 2, "original").await;
    let backup = fx
        .engine
        .create_backup(BackupKind::Database, None, "test")
        .await
        .unwrap();

    seed(&fx.engine, 7, 7, 7, "changed").await;
    let first = fx.engine.restore_backup(backup.id, no_pre_backup()).await.unwrap();
    let second = fx.engine.restore_backup(backup.id, no_pre_backup()).await.unwrap();

    assert_eq!(counts(&fx.engine).await, (5, 3, 2));
    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(second.status, JobStatus::Completed);
    assert!(second.result_summary.unwrap().errors.is_empty());
}

#[tokio::test]
async fn test_second_restore_conflicts_until_first_finishes() {
    let fx = fixture(EngineKind::Sqlite, Granularity::Collections).await;
    seed(&fx.engine, 3, 1, 1, "original").await;
    let backup_a = fx.engine.create_backup(BackupKind::Database, None, "test").await.unwrap();
    let backup_b = fx.engine.create_backup(BackupKind::Database, None, "test").await.unwrap();

    let restore_a = fx.engine.start_restore(backup_a.id, no_pre_backup()).await.unwrap();
    assert!(fx.engine.is_restore_running());

    let conflict = fx.engine.start_restore(backup_b.id, no_pre_backup()).await;
    assert!(matches!(conflict, Err(VaultError::RestoreInProgress(_))));
    // 冲突的请求不会留下恢复记录
    assert_eq!(fx.engine.list_restores(1, 10).await.unwrap().total, 1);

    let finished = fx.engine.wait_for(restore_a.id).await.unwrap();
    assert_eq!(finished.status, JobStatus::Completed);

    let retried = fx.engine.restore_backup(backup_b.id, no_pre_backup()).await.unwrap();
    assert_eq!(retried.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_tampered_archive_is_rejected_before_touching_data() {
    let fx = fixture(EngineKind::Sqlite, Granularity::Collections).await;
    seed(&fx.engine, 4, 2, 2, "original").await;
    let backup = fx.engine.create_backup(BackupKind::Database, None, "test").await.unwrap();
    let archive_path = backup.archive_path.clone().unwrap();

    // 改动清单中的行数但保留旧的校验和，然后重新打包
    let staging = tempfile::tempdir().unwrap();
    let mut opened = open_archive(&archive_path, staging.path()).unwrap();
    opened.manifest.collections[0].record_count += 1;
    pack_archive(opened.root(), &opened.manifest, &archive_path, 6).unwrap();

    seed(&fx.engine, 9, 0, 0, "changed").await;
    let result = fx.engine.restore_backup(backup.id, RestoreOptions::default()).await;
    assert!(matches!(result, Err(VaultError::ArchiveCorrupt(_))));
    assert_eq!(counts(&fx.engine).await, (9, 0, 0));

    let restores = fx.engine.list_restores(1, 10).await.unwrap();
    let record = &restores.items[0];
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error_message.is_some());
    // 校验在预备份之前，失败时不会产生额外的备份
    assert_eq!(fx.engine.list_backups(1, 10).await.unwrap().total, 1);
}

#[tokio::test]
async fn test_foreign_keys_enforced_after_success_and_failure() {
    let fx = fixture(EngineKind::Sqlite, Granularity::Collections).await;
    seed(&fx.engine, 2, 1, 4, "original").await;
    let backup = fx.engine.create_backup(BackupKind::Database, None, "test").await.unwrap();

    // 检查的是恢复所用的那条连接，而不是新打开的连接
    let restore = fx.engine.restore_backup(backup.id, no_pre_backup()).await.unwrap();
    let summary = restore.result_summary.unwrap();
    assert_eq!(summary.integrity_mode.as_deref(), Some("checks_disabled"));
    assert_eq!(summary.integrity_checks_enabled, Some(true));

    // customers 和 orders 已在关闭检查的状态下导入，notes 的插入失败
    fx.engine
        .live()
        .run(|conn| conn.execute("ALTER TABLE notes RENAME COLUMN body TO content"))
        .await
        .unwrap();
    let failed = fx.engine.restore_backup(backup.id, no_pre_backup()).await;
    assert!(failed.is_err());

    let record = &fx.engine.list_restores(1, 1).await.unwrap().items[0];
    assert_eq!(record.status, JobStatus::Failed);
    let summary = record.result_summary.as_ref().unwrap();
    assert_eq!(summary.integrity_mode.as_deref(), Some("checks_disabled"));
    assert_eq!(summary.integrity_checks_enabled, Some(true));
    assert!(summary.collections.iter().any(|c| c.name == "customers"));
    assert!(!summary.collections.iter().any(|c| c.name == "notes"));
}

#[tokio::test]
async fn test_row_count_mismatch_fails_restore() {
    let fx = fixture(EngineKind::Sqlite, Granularity::Collections).await;
    seed(&fx.engine, 2, 1, 4, "original").await;
    let backup = fx.engine.create_backup(BackupKind::Database, None, "test").await.unwrap();

    // 线上表新增的约束会让一条记录被忽略，行数核对失败
    fx.engine
        .live()
        .run(|conn| {
            conn.execute_batch(
                "DROP TABLE notes;
                 CREATE TABLE notes (
                     id INTEGER PRIMARY KEY,
                     customer_id INTEGER NOT NULL REFERENCES customers(id),
                     body TEXT CHECK (body <> 'original-note-2')
                 );",
            )
        })
        .await
        .unwrap();

    let failed = fx.engine.restore_backup(backup.id, no_pre_backup()).await;
    assert!(matches!(failed, Err(VaultError::Verification(_))));

    let record = &fx.engine.list_restores(1, 1).await.unwrap().items[0];
    assert_eq!(record.status, JobStatus::Failed);
    let summary = record.result_summary.as_ref().unwrap();
    assert_eq!(summary.integrity_checks_enabled, Some(true));
    let notes = summary.collections.iter().find(|c| c.name == "notes").unwrap();
    assert_eq!((notes.expected, notes.actual), (4, Some(3)));
}

#[tokio::test]
async fn test_duckdb_restore_falls_back_to_dependency_order() {
    let fx = fixture(EngineKind::DuckDb, Granularity::Collections).await;
    seed(&fx.engine, 6, 4, 3, "original").await;
    let backup = fx.engine.create_backup(BackupKind::Database, None, "test").await.unwrap();

    seed(&fx.engine, 2, 2, 2, "changed").await;
    let restore = fx.engine.restore_backup(backup.id, no_pre_backup()).await.unwrap();

    assert_eq!(counts(&fx.engine).await, (6, 4, 3));
    let summary = restore.result_summary.unwrap();
    assert_eq!(summary.integrity_mode.as_deref(), Some("dependency_ordered"));
    assert_eq!(
        summary.collections.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        vec!["customers", "orders", "notes"]
    );
}

#[tokio::test]
async fn test_restore_progress_never_moves_backward() {
    let fx = fixture(EngineKind::Sqlite, Granularity::Collections).await;
    seed(&fx.engine, 20, 10, 5, "original").await;
    let backup = fx.engine.create_backup(BackupKind::Database, None, "test").await.unwrap();

    let restore = fx.engine.start_restore(backup.id, RestoreOptions::default()).await.unwrap();
    let mut receiver = fx.engine.subscribe(restore.id).unwrap();

    let mut seen = Vec::new();
    loop {
        let snapshot = receiver.borrow_and_update().clone();
        seen.push(snapshot.percent);
        if snapshot.status.is_terminal() {
            assert_eq!(snapshot.status, JobStatus::Completed);
            break;
        }
        receiver.changed().await.unwrap();
    }

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(seen.last(), Some(&100));
    assert_eq!(fx.engine.get_restore(restore.id).await.unwrap().progress_percent, 100);
}

#[tokio::test]
async fn test_cancelled_backup_is_failed_and_not_restorable() {
    let fx = fixture(EngineKind::Sqlite, Granularity::Collections).await;
    seed(&fx.engine, 3, 0, 0, "original").await;

    // 当前线程运行时：任务在下一次 await 之前不会开始执行
    let backup = fx.engine.start_backup(BackupKind::Database, None, "test").await.unwrap();
    fx.engine.cancel(backup.id).unwrap();

    let finished = fx.engine.wait_for(backup.id).await.unwrap();
    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished.error.unwrap().contains("取消"));

    let record = fx.engine.get_backup(backup.id).await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(matches!(
        fx.engine.cancel(backup.id),
        Err(VaultError::InvalidState(_))
    ));

    let restore = fx.engine.restore_backup(backup.id, no_pre_backup()).await;
    assert!(matches!(restore, Err(VaultError::InvalidState(_))));
}

#[tokio::test]
async fn test_subset_restore_depends_on_granularity() {
    let fx = fixture(EngineKind::Sqlite, Granularity::Collections).await;
    seed(&fx.engine, 3, 2, 2, "original").await;
    let backup = fx.engine.create_backup(BackupKind::Database, None, "test").await.unwrap();

    fx.engine
        .live()
        .run(|conn| {
            conn.execute("DELETE FROM notes")?;
            conn.execute("DELETE FROM orders WHERE id = 1")
        })
        .await
        .unwrap();

    let options = RestoreOptions {
        collections: Some(vec!["notes".to_string()]),
        ..no_pre_backup()
    };
    fx.engine.restore_backup(backup.id, options).await.unwrap();
    assert_eq!(counts(&fx.engine).await, (3, 1, 2));

    let unknown = RestoreOptions {
        collections: Some(vec!["invoices".to_string()]),
        ..no_pre_backup()
    };
    assert!(matches!(
        fx.engine.restore_backup(backup.id, unknown).await,
        Err(VaultError::Schema(_))
    ));

    let whole = fixture(EngineKind::Sqlite, Granularity::Database).await;
    seed(&whole.engine, 3, 2, 2, "original").await;
    let backup = whole.engine.create_backup(BackupKind::Database, None, "test").await.unwrap();
    let options = RestoreOptions {
        collections: Some(vec!["notes".to_string()]),
        ..no_pre_backup()
    };
    assert!(matches!(
        whole.engine.restore_backup(backup.id, options).await,
        Err(VaultError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_schedules_trigger_and_cleanup_removes_old_backups() {
    let fx = fixture(EngineKind::Sqlite, Granularity::Collections).await;
    seed(&fx.engine, 2, 1, 1, "original").await;

    let schedule = fx
        .engine
        .create_schedule("daily_db", Cadence::Daily, BackupKind::Database)
        .await
        .unwrap();
    let paused = fx
        .engine
        .create_schedule("weekly_media", Cadence::Weekly, BackupKind::Media)
        .await
        .unwrap();
    fx.engine.set_schedule_active(paused.id, false).await.unwrap();

    let now = Utc::now();
    let triggered = fx.engine.tick(now).await.unwrap();
    assert_eq!(triggered.len(), 1);
    assert_eq!(triggered[0].schedule_id, schedule.id);
    fx.engine.wait_for(triggered[0].backup_id).await.unwrap();

    assert!(fx.engine.tick(now + Duration::hours(1)).await.unwrap().is_empty());
    let again = fx.engine.tick(now + Duration::days(1)).await.unwrap();
    assert_eq!(again.len(), 1);
    fx.engine.wait_for(again[0].backup_id).await.unwrap();

    let later = now + Duration::days(3);
    let preview = fx.engine.cleanup(1, true, later).await.unwrap();
    assert_eq!(preview.deleted.len(), 2);
    assert_eq!(fx.engine.list_backups(1, 10).await.unwrap().total, 2);

    let report = fx.engine.cleanup(1, false, later).await.unwrap();
    assert_eq!(report.deleted.len(), 2);
    assert!(report.skipped.is_empty());
    assert_eq!(fx.engine.list_backups(1, 10).await.unwrap().total, 0);
    for backup in &report.deleted {
        assert!(!fx.engine.config().get_storage_root().join(backup.id.to_string()).exists());
    }

    // 保留期内的备份不会被清理
    assert!(fx.engine.cleanup(30, false, later).await.unwrap().deleted.is_empty());
    assert!(matches!(
        fx.engine.cleanup(0, true, later).await,
        Err(VaultError::InvalidConfig(_))
    ));

    fx.engine.delete_schedule(schedule.id).await.unwrap();
    assert!(matches!(
        fx.engine.delete_schedule(schedule.id).await,
        Err(VaultError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_backup_removes_record_and_directory() {
    let fx = fixture(EngineKind::Sqlite, Granularity::Collections).await;
    seed(&fx.engine, 1, 0, 0, "original").await;
    let backup = fx.engine.create_backup(BackupKind::Database, None, "test").await.unwrap();
    let dir = fx.engine.config().get_storage_root().join(backup.id.to_string());
    assert!(dir.exists());
    assert!(fx.engine.archive_for_download(backup.id).await.is_ok());

    fx.engine.delete_backup(backup.id).await.unwrap();
    assert!(!dir.exists());
    assert!(matches!(
        fx.engine.get_backup(backup.id).await,
        Err(VaultError::NotFound(_))
    ));
    assert!(matches!(
        fx.engine.archive_for_download(backup.id).await,
        Err(VaultError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_unverified_restore_of_tampered_archive_completes_with_warnings() {
    let fx = fixture(EngineKind::Sqlite, Granularity::Collections).await;
    seed(&fx.engine, 4, 2, 2, "original").await;
    let backup = fx.engine.create_backup(BackupKind::Database, None, "test").await.unwrap();
    let archive_path = backup.archive_path.clone().unwrap();

    let staging = tempfile::tempdir().unwrap();
    let mut opened = open_archive(&archive_path, staging.path()).unwrap();
    opened.manifest.collections[0].record_count += 1;
    pack_archive(opened.root(), &opened.manifest, &archive_path, 6).unwrap();

    seed(&fx.engine, 9, 0, 0, "changed").await;
    let options = RestoreOptions {
        verify: false,
        ..no_pre_backup()
    };
    let restore = fx.engine.restore_backup(backup.id, options).await.unwrap();

    assert_eq!(restore.status, JobStatus::Completed);
    assert_eq!(counts(&fx.engine).await, (4, 2, 2));
    let summary = restore.result_summary.unwrap();
    assert!(!summary.warnings.is_empty());
    assert!(summary.errors.is_empty());
}

#[tokio::test]
async fn test_quick_restore_skips_pre_backup_and_count_check() {
    let fx = fixture(EngineKind::Sqlite, Granularity::Collections).await;
    seed(&fx.engine, 3, 2, 1, "original").await;
    let backup = fx.engine.create_backup(BackupKind::Database, None, "test").await.unwrap();

    seed(&fx.engine, 8, 0, 0, "changed").await;
    let options = RestoreOptions {
        quick_mode: true,
        ..RestoreOptions::default()
    };
    let restore = fx.engine.restore_backup(backup.id, options).await.unwrap();

    assert_eq!(restore.status, JobStatus::Completed);
    assert_eq!(counts(&fx.engine).await, (3, 2, 1));
    let summary = restore.result_summary.unwrap();
    assert!(summary.pre_backup_id.is_none());
    assert_eq!(summary.collections.len(), 3);
    assert!(summary.collections.iter().all(|c| c.actual.is_none()));
    assert_eq!(fx.engine.list_backups(1, 10).await.unwrap().total, 1);
}

#[tokio::test]
async fn test_restore_record_is_terminal_once_lock_is_free() {
    let fx = fixture(EngineKind::Sqlite, Granularity::Collections).await;
    seed(&fx.engine, 5, 5, 5, "original").await;
    let backup = fx.engine.create_backup(BackupKind::Database, None, "test").await.unwrap();

    let first = fx.engine.start_restore(backup.id, no_pre_backup()).await.unwrap();
    let mut second = None;
    for _ in 0..2000 {
        match fx.engine.start_restore(backup.id, no_pre_backup()).await {
            Ok(record) => {
                second = Some(record);
                break;
            }
            Err(VaultError::RestoreInProgress(_)) => {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    let second = second.expect("restore lock was never released");

    // 锁可再次获取时，上一次恢复的终态已写入目录库
    let first_record = fx.engine.get_restore(first.id).await.unwrap();
    assert!(first_record.status.is_terminal());
    assert_eq!(first_record.status, JobStatus::Completed);

    let finished = fx.engine.wait_for(second.id).await.unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_cleanup_skips_backup_used_by_pending_restore() {
    let fx = fixture(EngineKind::Sqlite, Granularity::Collections).await;
    seed(&fx.engine, 2, 1, 1, "original").await;
    let backup = fx.engine.create_backup(BackupKind::Database, None, "test").await.unwrap();
    fx.engine
        .catalog()
        .create_restore(backup.id, &RestoreOptions::default())
        .await
        .unwrap();

    let later = Utc::now() + Duration::days(3);
    for dry_run in [true, false] {
        let report = fx.engine.cleanup(1, dry_run, later).await.unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].backup_id, backup.id);
    }
    assert!(fx.engine.get_backup(backup.id).await.is_ok());
    assert!(fx.engine.config().get_storage_root().join(backup.id.to_string()).exists());
}

#[tokio::test]
async fn test_failed_collection_dump_marks_backup_failed_and_keeps_work_dir() {
    let fx = fixture(EngineKind::Sqlite, Granularity::Collections).await;
    seed(&fx.engine, 3, 1, 1, "original").await;
    fx.engine
        .live()
        .run(|conn| conn.execute("DROP TABLE notes"))
        .await
        .unwrap();

    let result = fx.engine.create_backup(BackupKind::Database, None, "test").await;
    match result {
        Err(VaultError::PartialBackup { collection, .. }) => assert_eq!(collection, "notes"),
        other => panic!("expected a partial backup error, got {other:?}"),
    }

    let backups = fx.engine.list_backups(1, 10).await.unwrap();
    assert_eq!(backups.total, 1);
    let record = &backups.items[0];
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error_message.as_deref().unwrap().contains("notes"));
    assert!(record.archive_path.is_none());

    let work_dir = fx
        .engine
        .config()
        .get_storage_root()
        .join(record.id.to_string())
        .join("work");
    assert!(work_dir.join("dumps").join("customers.jsonl").exists());
}
