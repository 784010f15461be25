//! 实体集合注册表
//!
//! 每个参与备份的集合都必须在注册时声明字段列表和字段类型，
//! 导出和导入时都按声明校验记录结构，而不是信任任意对象。

use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

/// 一条可移植记录：字段名 -> 原始值（外键保持为原始标识符）
pub type Record = Map<String, Value>;

/// 字段类型标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Real,
    Text,
    Boolean,
    /// RFC3339 格式的时间戳，库中以文本存储
    Timestamp,
}

impl FieldType {
    /// 检查 JSON 值是否符合字段类型（NULL 总是允许）
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldType::Real, Value::Number(_)) => true,
            (FieldType::Text, Value::String(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Timestamp, Value::String(s)) => {
                chrono::DateTime::parse_from_rfc3339(s).is_ok()
            }
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Real => "real",
            FieldType::Text => "text",
            FieldType::Boolean => "boolean",
            FieldType::Timestamp => "timestamp",
        }
    }
}

/// 字段声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// 集合声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    /// 集合名，同时也是线上库中的表名
    pub name: String,
    /// 主键字段
    pub primary_key: String,
    /// 字段列表（顺序即导出列顺序）
    pub fields: Vec<FieldSpec>,
    /// 通过外键引用的父集合
    #[serde(default)]
    pub references: Vec<String>,
}

impl CollectionSpec {
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// 按声明校验一条记录
    pub fn validate_record(&self, record: &Record) -> Result<()> {
        if record.len() != self.fields.len() {
            let extra: Vec<&String> = record
                .keys()
                .filter(|k| !self.fields.iter().any(|f| &f.name == *k))
                .collect();
            if !extra.is_empty() {
                return Err(VaultError::schema(format!(
                    "集合 {} 的记录包含未声明的字段: {:?}",
                    self.name, extra
                )));
            }
        }

        for field in &self.fields {
            let value = record.get(&field.name).ok_or_else(|| {
                VaultError::schema(format!("集合 {} 的记录缺少字段 {}", self.name, field.name))
            })?;
            if !field.field_type.accepts(value) {
                return Err(VaultError::schema(format!(
                    "集合 {} 字段 {} 期望 {} 类型，实际值为 {}",
                    self.name,
                    field.name,
                    field.field_type.as_str(),
                    value
                )));
            }
        }

        Ok(())
    }

    fn check_well_formed(&self) -> Result<()> {
        if !is_identifier(&self.name) {
            return Err(VaultError::schema(format!("非法的集合名: {}", self.name)));
        }
        if self.fields.is_empty() {
            return Err(VaultError::schema(format!("集合 {} 没有声明字段", self.name)));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !is_identifier(&field.name) {
                return Err(VaultError::schema(format!(
                    "集合 {} 中存在非法字段名: {}",
                    self.name, field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(VaultError::schema(format!(
                    "集合 {} 中字段 {} 重复声明",
                    self.name, field.name
                )));
            }
        }
        if !seen.contains(self.primary_key.as_str()) {
            return Err(VaultError::schema(format!(
                "集合 {} 的主键 {} 不在字段列表中",
                self.name, self.primary_key
            )));
        }
        Ok(())
    }
}

/// 表名和字段名会直接拼进 SQL，只允许字母、数字和下划线
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// 集合注册表，保留注册顺序
#[derive(Debug, Clone, Default)]
pub struct CollectionRegistry {
    collections: Vec<CollectionSpec>,
    index: HashMap<String, usize>,
}

impl CollectionRegistry {
    pub fn new(collections: Vec<CollectionSpec>) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, spec) in collections.iter().enumerate() {
            spec.check_well_formed()?;
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(VaultError::schema(format!("集合 {} 重复注册", spec.name)));
            }
        }

        for spec in &collections {
            for parent in &spec.references {
                if !index.contains_key(parent) {
                    return Err(VaultError::schema(format!(
                        "集合 {} 引用了未注册的集合 {}",
                        spec.name, parent
                    )));
                }
            }
        }

        Ok(Self { collections, index })
    }

    pub fn get(&self, name: &str) -> Option<&CollectionSpec> {
        self.index.get(name).map(|&i| &self.collections[i])
    }

    /// 注册顺序（备份使用的固定顺序）
    pub fn iter(&self) -> impl Iterator<Item = &CollectionSpec> {
        self.collections.iter()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// 父集合在前的拓扑顺序，只包含 `names` 中的集合
    ///
    /// 同一层级内保持注册顺序，保证结果确定。
    pub fn dependency_order(&self, names: &[String]) -> Result<Vec<String>> {
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        let mut pending: BTreeMap<usize, &CollectionSpec> = self
            .collections
            .iter()
            .enumerate()
            .filter(|(_, spec)| wanted.contains(spec.name.as_str()))
            .collect();

        let mut placed: HashSet<&str> = HashSet::new();
        let mut ordered = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            let ready: Vec<usize> = pending
                .iter()
                .filter(|(_, spec)| {
                    spec.references.iter().all(|parent| {
                        parent == &spec.name
                            || placed.contains(parent.as_str())
                            || !wanted.contains(parent.as_str())
                    })
                })
                .map(|(i, _)| *i)
                .collect();

            if ready.is_empty() {
                let stuck: Vec<&str> = pending.values().map(|s| s.name.as_str()).collect();
                return Err(VaultError::schema(format!(
                    "集合之间存在循环引用，无法确定删除顺序: {stuck:?}"
                )));
            }

            for i in ready {
                if let Some(spec) = pending.remove(&i) {
                    placed.insert(spec.name.as_str());
                    ordered.push(spec.name.clone());
                }
            }
        }

        Ok(ordered)
    }
}
