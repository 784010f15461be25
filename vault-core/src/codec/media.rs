//! 媒体目录的打包与还原
//!
//! 容器是一个 tar.gz，文件放在 `files/` 下，最后追加一份文件级清单。

use super::checksum::{HashingReader, HashingWriter, sha256_bytes, sha256_file};
use crate::constants::archive::{MEDIA_FILES_PREFIX, MEDIA_MANIFEST_NAME};
use crate::{Result, VaultError};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, Header};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// 单个媒体文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFileEntry {
    /// 相对媒体根目录的路径，统一使用 `/`
    pub path: String,
    pub size: u64,
    pub checksum: String,
}

/// 媒体容器内的文件清单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaManifest {
    pub created_at: DateTime<Utc>,
    pub files: Vec<MediaFileEntry>,
    pub total_bytes: u64,
    pub tree_checksum: String,
}

/// 还原时被跳过的文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// 媒体还原结果，部分文件失败不影响其它文件
#[derive(Debug, Clone)]
pub struct MediaRestoreReport {
    pub restored: usize,
    pub skipped: Vec<SkippedFile>,
    pub manifest: MediaManifest,
}

/// 目录树的整体校验和：按路径排序后对 "路径\0校验和\n" 求 SHA-256
fn tree_checksum_of<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut pairs: Vec<(&str, &str)> = entries.into_iter().collect();
    pairs.sort_unstable();
    let mut buf = Vec::new();
    for (path, checksum) in pairs {
        buf.extend_from_slice(path.as_bytes());
        buf.push(0);
        buf.extend_from_slice(checksum.as_bytes());
        buf.push(b'\n');
    }
    sha256_bytes(&buf)
}

/// 相对路径统一为 `/` 分隔，tar 内部和清单都使用这种形式
fn portable_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// 列出目录下的所有普通文件（按文件名排序，结果确定）
fn walk_files(root: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(root)?;
            files.push((entry.path().to_path_buf(), portable_path(relative)));
        }
    }
    Ok(files)
}

/// 计算线上媒体目录的整体校验和，目录不存在时视为空
pub fn media_tree_checksum(root: &Path) -> Result<String> {
    if !root.exists() {
        return Ok(tree_checksum_of(std::iter::empty()));
    }
    let mut hashed = Vec::new();
    for (path, relative) in walk_files(root)? {
        hashed.push((relative, sha256_file(&path)?));
    }
    Ok(tree_checksum_of(
        hashed.iter().map(|(p, c)| (p.as_str(), c.as_str())),
    ))
}

/// 把媒体目录打包到 `container`
///
/// 目录不存在或为空时生成一个只含清单的合法容器。
pub fn archive_media(root: &Path, container: &Path, compression_level: u32) -> Result<MediaManifest> {
    let file = File::create(container)?;
    let encoder = GzEncoder::new(file, Compression::new(compression_level));
    let mut builder = Builder::new(encoder);

    let sources = if root.exists() {
        walk_files(root)?
    } else {
        warn!("媒体目录不存在，生成空的媒体容器: {}", root.display());
        Vec::new()
    };

    let mut entries = Vec::with_capacity(sources.len());
    let mut total_bytes = 0u64;

    for (path, relative) in sources {
        let source = File::open(&path)?;
        let metadata = source.metadata()?;
        let mut header = Header::new_gnu();
        header.set_metadata(&metadata);
        header.set_size(metadata.len());

        let mut reader = HashingReader::new(source.take(metadata.len()));
        builder.append_data(
            &mut header,
            format!("{MEDIA_FILES_PREFIX}/{relative}"),
            &mut reader,
        )?;
        let (checksum, size) = reader.finish();

        debug!("已打包媒体文件: {} ({} 字节)", relative, size);
        total_bytes += size;
        entries.push(MediaFileEntry {
            path: relative,
            size,
            checksum,
        });
    }

    let tree_checksum = tree_checksum_of(
        entries
            .iter()
            .map(|e| (e.path.as_str(), e.checksum.as_str())),
    );
    let manifest = MediaManifest {
        created_at: Utc::now(),
        files: entries,
        total_bytes,
        tree_checksum,
    };

    let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
    let mut header = Header::new_gnu();
    header.set_size(manifest_bytes.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(manifest.created_at.timestamp().max(0) as u64);
    builder.append_data(&mut header, MEDIA_MANIFEST_NAME, manifest_bytes.as_slice())?;

    let encoder = builder.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all()?;

    Ok(manifest)
}

/// 容器内的路径转换为目标目录下的路径，拒绝 `..` 和绝对路径
fn safe_destination(dest_root: &Path, relative: &Path) -> Option<PathBuf> {
    let mut out = dest_root.to_path_buf();
    let mut has_component = false;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                has_component = true;
            }
            _ => return None,
        }
    }
    has_component.then_some(out)
}

/// 写入单个文件，已存在的同名文件被覆盖
fn write_media_file(target: &Path, reader: &mut impl Read) -> Result<String> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    if target.is_dir() {
        return Err(VaultError::custom("目标路径是一个目录"));
    }
    if target.exists() {
        fs::remove_file(target)?;
    }

    let mut writer = HashingWriter::new(File::create(target)?);
    io::copy(reader, &mut writer)?;
    writer.flush()?;
    let (_, checksum, _) = writer.finish();
    Ok(checksum)
}

/// 把媒体容器还原到 `dest_root`
///
/// 单个文件的错误记录在结果中，不会中断整个还原；
/// 容器本身损坏或缺少清单时返回错误。
pub fn extract_media(container: &Path, dest_root: &Path) -> Result<MediaRestoreReport> {
    fs::create_dir_all(dest_root)?;

    let file = File::open(container)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut written: HashMap<String, String> = HashMap::new();
    let mut skipped: Vec<SkippedFile> = Vec::new();
    let mut manifest: Option<MediaManifest> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();

        if entry_path == Path::new(MEDIA_MANIFEST_NAME) {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            manifest = Some(serde_json::from_slice(&bytes).map_err(|e| {
                VaultError::corrupt(format!("媒体清单无法解析: {e}"))
            })?);
            continue;
        }

        let Ok(relative) = entry_path.strip_prefix(MEDIA_FILES_PREFIX) else {
            warn!("忽略媒体容器中的未知条目: {}", entry_path.display());
            continue;
        };
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let shown = portable_path(relative);
        let Some(target) = safe_destination(dest_root, relative) else {
            skipped.push(SkippedFile {
                path: shown,
                reason: "路径不安全".to_string(),
            });
            continue;
        };

        match write_media_file(&target, &mut entry) {
            Ok(checksum) => {
                written.insert(shown, checksum);
            }
            Err(e) => {
                warn!("媒体文件还原失败 {}: {}", shown, e);
                skipped.push(SkippedFile {
                    path: shown,
                    reason: e.to_string(),
                });
            }
        }
    }

    let manifest = manifest.ok_or_else(|| VaultError::corrupt("媒体容器缺少文件清单"))?;

    // 与清单逐个核对
    let mut restored = 0usize;
    for file in &manifest.files {
        match written.get(&file.path) {
            Some(checksum) if checksum == &file.checksum => restored += 1,
            Some(_) => skipped.push(SkippedFile {
                path: file.path.clone(),
                reason: "校验和与清单不一致".to_string(),
            }),
            None if skipped.iter().any(|s| s.path == file.path) => {}
            None => skipped.push(SkippedFile {
                path: file.path.clone(),
                reason: "容器中缺少该文件".to_string(),
            }),
        }
    }

    Ok(MediaRestoreReport {
        restored,
        skipped,
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populate(root: &Path) {
        fs::create_dir_all(root.join("products/2024")).unwrap();
        fs::write(root.join("logo.png"), b"\x89PNG fake").unwrap();
        fs::write(root.join("products/2024/shoe.jpg"), b"jpeg bytes").unwrap();
    }

    #[test]
    fn test_media_round_trip_preserves_tree() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("media");
        populate(&source);
        let container = dir.path().join("media.tar.gz");

        let manifest = archive_media(&source, &container, 6).unwrap();
        assert_eq!(manifest.files.len(), 2);
        assert_eq!(manifest.files[0].path, "logo.png");
        assert_eq!(manifest.files[1].path, "products/2024/shoe.jpg");
        assert_eq!(manifest.tree_checksum, media_tree_checksum(&source).unwrap());

        let dest = dir.path().join("restored");
        let report = extract_media(&container, &dest).unwrap();
        assert_eq!(report.restored, 2);
        assert!(report.skipped.is_empty());
        assert_eq!(
            media_tree_checksum(&dest).unwrap(),
            media_tree_checksum(&source).unwrap()
        );
    }

    #[test]
    fn test_missing_or_empty_root_gives_valid_container() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("media.tar.gz");

        let manifest = archive_media(&dir.path().join("nope"), &container, 1).unwrap();
        assert!(manifest.files.is_empty());
        assert_eq!(manifest.total_bytes, 0);

        let report = extract_media(&container, &dir.path().join("out")).unwrap();
        assert_eq!(report.restored, 0);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_restore_overwrites_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("media");
        populate(&source);
        let container = dir.path().join("media.tar.gz");
        archive_media(&source, &container, 6).unwrap();

        let dest = dir.path().join("live");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("logo.png"), b"stale").unwrap();
        fs::write(dest.join("unrelated.txt"), b"keep me").unwrap();

        let report = extract_media(&container, &dest).unwrap();
        assert_eq!(report.restored, 2);
        assert_eq!(fs::read(dest.join("logo.png")).unwrap(), b"\x89PNG fake");
        assert_eq!(fs::read(dest.join("unrelated.txt")).unwrap(), b"keep me");
    }

    #[test]
    fn test_per_file_failure_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("media");
        populate(&source);
        let container = dir.path().join("media.tar.gz");
        archive_media(&source, &container, 6).unwrap();

        // 目标位置被同名目录占据，该文件无法写入
        let dest = dir.path().join("live");
        fs::create_dir_all(dest.join("logo.png")).unwrap();

        let report = extract_media(&container, &dest).unwrap();
        assert_eq!(report.restored, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].path, "logo.png");
    }

    #[test]
    fn test_unsafe_paths_are_rejected() {
        let dest = Path::new("/srv/media");
        assert!(safe_destination(dest, Path::new("../etc/passwd")).is_none());
        assert!(safe_destination(dest, Path::new("/etc/passwd")).is_none());
        assert_eq!(
            safe_destination(dest, Path::new("a/b.png")),
            Some(PathBuf::from("/srv/media/a/b.png"))
        );
    }
}
