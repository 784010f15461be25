//! 最终归档：清单 + 各集合导出文件 + 媒体容器，整体 gzip 压缩

use super::checksum::{HashingWriter, sha256_file};
use super::manifest::ArchiveManifest;
use crate::constants::archive::{MANIFEST_FILE_NAME, RESTORE_STAGING_PREFIX};
use crate::{Result, VaultError};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use tempfile::TempDir;
use tracing::debug;

/// 打包结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedArchive {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub checksum: String,
}

/// 把工作目录中的文件按清单打包
///
/// 清单放在最前面，随后按导出顺序放集合文件，最后是媒体容器。
/// 返回的校验和是压缩后文件的 SHA-256。
pub fn pack_archive(
    work_dir: &Path,
    manifest: &ArchiveManifest,
    archive_path: &Path,
    compression_level: u32,
) -> Result<PackedArchive> {
    let manifest_path = work_dir.join(MANIFEST_FILE_NAME);
    manifest.write_to(&manifest_path)?;

    let file = File::create(archive_path)?;
    let encoder = GzEncoder::new(HashingWriter::new(file), Compression::new(compression_level));
    let mut builder = Builder::new(encoder);

    builder.append_path_with_name(&manifest_path, MANIFEST_FILE_NAME)?;
    for entry in &manifest.collections {
        debug!("打包导出文件: {}", entry.dump_file);
        builder.append_path_with_name(work_dir.join(&entry.dump_file), &entry.dump_file)?;
    }
    if let Some(media) = &manifest.media {
        builder.append_path_with_name(work_dir.join(&media.container_file), &media.container_file)?;
    }

    let encoder = builder.into_inner()?;
    let mut hashing = encoder.finish()?;
    hashing.flush()?;
    let (file, checksum, size_bytes) = hashing.finish();
    file.sync_all()?;

    Ok(PackedArchive {
        path: archive_path.to_path_buf(),
        size_bytes,
        checksum,
    })
}

/// 解包到临时目录后的归档，离开作用域时临时目录被删除
#[derive(Debug)]
pub struct OpenedArchive {
    staging: TempDir,
    pub manifest: ArchiveManifest,
}

impl OpenedArchive {
    pub fn root(&self) -> &Path {
        self.staging.path()
    }

    pub fn dump_path(&self, dump_file: &str) -> PathBuf {
        self.root().join(dump_file)
    }

    pub fn media_container(&self) -> Option<PathBuf> {
        self.manifest
            .media
            .as_ref()
            .map(|m| self.root().join(&m.container_file))
    }
}

/// 磁盘和权限类错误保持为 IO 错误，其余解压错误都视为归档损坏
fn unpack_error(err: io::Error) -> VaultError {
    match err.kind() {
        io::ErrorKind::PermissionDenied
        | io::ErrorKind::StorageFull
        | io::ErrorKind::OutOfMemory
        | io::ErrorKind::WriteZero => VaultError::Io(err),
        _ => VaultError::corrupt(format!("归档无法解压: {err}")),
    }
}

/// 解包归档并读取清单（不做校验）
pub fn open_archive(archive_path: &Path, staging_parent: &Path) -> Result<OpenedArchive> {
    std::fs::create_dir_all(staging_parent)?;
    let staging = tempfile::Builder::new()
        .prefix(RESTORE_STAGING_PREFIX)
        .tempdir_in(staging_parent)?;

    let file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.unpack(staging.path()).map_err(unpack_error)?;

    let manifest_path = staging.path().join(MANIFEST_FILE_NAME);
    if !manifest_path.exists() {
        return Err(VaultError::corrupt("归档中缺少清单文件"));
    }
    let manifest = ArchiveManifest::read_from(&manifest_path)?;

    Ok(OpenedArchive { staging, manifest })
}

/// 校验归档
///
/// 总是核对清单自身的校验和；`deep` 时还核对归档文件、每个导出文件
/// 和媒体容器的校验和。
pub fn verify_archive(
    opened: &OpenedArchive,
    archive_path: &Path,
    expected_checksum: Option<&str>,
    deep: bool,
) -> Result<()> {
    opened.manifest.verify_checksum()?;
    if !deep {
        return Ok(());
    }

    if let Some(expected) = expected_checksum {
        let actual = sha256_file(archive_path)?;
        if actual != expected {
            return Err(VaultError::corrupt(format!(
                "归档文件校验和不匹配: 期望 {expected}, 实际 {actual}"
            )));
        }
    }

    for entry in &opened.manifest.collections {
        let path = opened.dump_path(&entry.dump_file);
        if !path.exists() {
            return Err(VaultError::corrupt(format!(
                "归档中缺少导出文件: {}",
                entry.dump_file
            )));
        }
        if sha256_file(&path)? != entry.checksum {
            return Err(VaultError::corrupt(format!(
                "集合 {} 的导出文件校验和不匹配",
                entry.name
            )));
        }
    }

    if let (Some(media), Some(path)) = (&opened.manifest.media, opened.media_container()) {
        if !path.exists() {
            return Err(VaultError::corrupt("归档中缺少媒体容器"));
        }
        if sha256_file(&path)? != media.container_checksum {
            return Err(VaultError::corrupt("媒体容器校验和不匹配"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BackupKind;
    use crate::codec::manifest::CollectionEntry;
    use crate::config::{EngineKind, Granularity};
    use uuid::Uuid;

    /// 准备一个只含一个集合的工作目录
    fn prepare(work: &Path) -> ArchiveManifest {
        std::fs::create_dir_all(work.join("dumps")).unwrap();
        let dump = work.join("dumps/tags.jsonl");
        std::fs::write(&dump, b"{\"collection\":\"tags\"}\n").unwrap();

        let mut manifest = ArchiveManifest::new(
            Uuid::new_v4(),
            BackupKind::Database,
            Granularity::Collections,
            EngineKind::Sqlite,
        );
        manifest.collections.push(CollectionEntry {
            name: "tags".to_string(),
            record_count: 0,
            checksum: sha256_file(&dump).unwrap(),
            dump_file: "dumps/tags.jsonl".to_string(),
        });
        manifest.seal().unwrap();
        manifest
    }

    /// 用给定的清单内容重新打一个归档
    fn repack_with_manifest(archive: &Path, manifest_json: &[u8], dump: &Path) {
        let file = File::create(archive).unwrap();
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(manifest_json.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, MANIFEST_FILE_NAME, manifest_json)
            .unwrap();
        builder
            .append_path_with_name(dump, "dumps/tags.jsonl")
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_pack_open_verify() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let manifest = prepare(&work);
        let archive_path = dir.path().join("b.tar.gz");

        let packed = pack_archive(&work, &manifest, &archive_path, 9).unwrap();
        assert_eq!(packed.checksum, sha256_file(&archive_path).unwrap());
        assert_eq!(packed.size_bytes, std::fs::metadata(&archive_path).unwrap().len());

        let opened = open_archive(&archive_path, dir.path()).unwrap();
        assert_eq!(opened.manifest, manifest);
        assert!(
            opened
                .root()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(RESTORE_STAGING_PREFIX)
        );
        verify_archive(&opened, &archive_path, Some(&packed.checksum), true).unwrap();

        // 归档文件与目录库记录不一致
        assert!(matches!(
            verify_archive(&opened, &archive_path, Some("deadbeef"), true),
            Err(VaultError::ArchiveCorrupt(_))
        ));
    }

    #[test]
    fn test_tampered_manifest_detected() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let manifest = prepare(&work);

        let mut value = serde_json::to_value(&manifest).unwrap();
        value["collections"][0]["record_count"] = serde_json::Value::from(5);
        let archive_path = dir.path().join("tampered.tar.gz");
        repack_with_manifest(
            &archive_path,
            &serde_json::to_vec(&value).unwrap(),
            &work.join("dumps/tags.jsonl"),
        );

        let opened = open_archive(&archive_path, dir.path()).unwrap();
        // 即使不做深度校验，清单自身的校验和也会被核对
        assert!(matches!(
            verify_archive(&opened, &archive_path, None, false),
            Err(VaultError::ArchiveCorrupt(_))
        ));
    }

    #[test]
    fn test_truncated_archive_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let manifest = prepare(&work);
        let archive_path = dir.path().join("b.tar.gz");
        pack_archive(&work, &manifest, &archive_path, 6).unwrap();

        let bytes = std::fs::read(&archive_path).unwrap();
        std::fs::write(&archive_path, &bytes[..bytes.len() / 2]).unwrap();

        let err = open_archive(&archive_path, dir.path()).unwrap_err();
        assert!(matches!(err, VaultError::ArchiveCorrupt(_)), "{err:?}");
    }
}
