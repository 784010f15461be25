use super::checksum::sha256_bytes;
use crate::catalog::BackupKind;
use crate::config::{EngineKind, Granularity};
use crate::constants::archive::SCHEMA_VERSION;
use crate::{Result, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

/// 归档清单中的集合条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub name: String,
    pub record_count: u64,
    pub checksum: String,
    /// 相对归档根目录的路径
    pub dump_file: String,
}

/// 归档清单中的媒体条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEntry {
    pub container_file: String,
    pub file_count: u64,
    pub total_bytes: u64,
    /// 媒体目录树的整体校验和，见 `media_tree_checksum`
    pub tree_checksum: String,
    pub container_checksum: String,
}

/// 归档清单
///
/// `checksum` 是把该字段置空后整个清单 JSON 的 SHA-256，
/// 清单被篡改时恢复前就能发现。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub schema_version: u32,
    pub backup_id: Uuid,
    pub kind: BackupKind,
    pub granularity: Granularity,
    pub engine: EngineKind,
    pub created_at: DateTime<Utc>,
    /// 按导出顺序排列
    pub collections: Vec<CollectionEntry>,
    pub media: Option<MediaEntry>,
    #[serde(default)]
    pub checksum: String,
}

impl ArchiveManifest {
    pub fn new(
        backup_id: Uuid,
        kind: BackupKind,
        granularity: Granularity,
        engine: EngineKind,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            backup_id,
            kind,
            granularity,
            engine,
            created_at: Utc::now(),
            collections: Vec::new(),
            media: None,
            checksum: String::new(),
        }
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionEntry> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn total_records(&self) -> u64 {
        self.collections.iter().map(|c| c.record_count).sum()
    }

    fn compute_checksum(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.checksum.clear();
        Ok(sha256_bytes(&serde_json::to_vec(&unsigned)?))
    }

    /// 计算并写入自身校验和
    pub fn seal(&mut self) -> Result<()> {
        self.checksum = self.compute_checksum()?;
        Ok(())
    }

    /// 清单内容是否与记录的校验和一致
    pub fn verify_checksum(&self) -> Result<()> {
        let actual = self.compute_checksum()?;
        if actual != self.checksum {
            return Err(VaultError::corrupt(format!(
                "清单校验和不匹配: 记录为 {}, 实际为 {actual}",
                self.checksum
            )));
        }
        Ok(())
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// 解析清单
    ///
    /// 先只读版本号，版本过新时给出明确的错误，而不是字段解析失败。
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| VaultError::corrupt(format!("清单不是合法的 JSON: {e}")))?;

        let version = value
            .get("schema_version")
            .and_then(Value::as_u64)
            .ok_or_else(|| VaultError::corrupt("清单缺少 schema_version"))?;
        if version > u64::from(SCHEMA_VERSION) {
            return Err(VaultError::UnsupportedSchemaVersion {
                found: u32::try_from(version).unwrap_or(u32::MAX),
                supported: SCHEMA_VERSION,
            });
        }

        serde_json::from_value(value)
            .map_err(|e| VaultError::corrupt(format!("清单结构无效: {e}")))
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes)
    }
}
