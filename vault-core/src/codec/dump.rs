//! 集合导出格式（JSON Lines）
//!
//! 第一行是描述集合结构的头部，之后每行一条记录。写入和读取都是流式的，
//! 内存占用与集合大小无关。

use super::checksum::HashingWriter;
use crate::schema::{CollectionSpec, FieldSpec, Record};
use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

/// 导出文件头部
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpHeader {
    pub collection: String,
    pub primary_key: String,
    pub fields: Vec<FieldSpec>,
}

impl DumpHeader {
    fn for_spec(spec: &CollectionSpec) -> Self {
        Self {
            collection: spec.name.clone(),
            primary_key: spec.primary_key.clone(),
            fields: spec.fields.clone(),
        }
    }

    /// 导出时的结构与当前注册的结构是否一致
    pub fn matches(&self, spec: &CollectionSpec) -> bool {
        self.collection == spec.name
            && self.primary_key == spec.primary_key
            && self.fields == spec.fields
    }
}

/// 单个导出文件的统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpSummary {
    pub record_count: u64,
    pub checksum: String,
    pub bytes: u64,
}

/// 流式写入一个集合
pub struct DumpWriter {
    spec: CollectionSpec,
    writer: HashingWriter<BufWriter<File>>,
    record_count: u64,
}

impl DumpWriter {
    pub fn create(path: &Path, spec: &CollectionSpec) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = HashingWriter::new(BufWriter::new(file));
        serde_json::to_writer(&mut writer, &DumpHeader::for_spec(spec))?;
        writer.write_all(b"\n")?;

        Ok(Self {
            spec: spec.clone(),
            writer,
            record_count: 0,
        })
    }

    /// 写入一条记录，结构不符合声明时拒绝
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        self.spec.validate_record(record)?;
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.record_count += 1;
        Ok(())
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn finish(mut self) -> Result<DumpSummary> {
        self.writer.flush()?;
        let (buffered, checksum, bytes) = self.writer.finish();
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        Ok(DumpSummary {
            record_count: self.record_count,
            checksum,
            bytes,
        })
    }
}

/// 把一组记录写成导出文件
pub fn serialize_collection<I>(path: &Path, spec: &CollectionSpec, records: I) -> Result<DumpSummary>
where
    I: IntoIterator<Item = Result<Record>>,
{
    let mut writer = DumpWriter::create(path, spec)?;
    for record in records {
        writer.write_record(&record?)?;
    }
    writer.finish()
}

/// 只读取导出文件的头部
pub fn read_dump_header(path: &Path) -> Result<DumpHeader> {
    let file = File::open(path)?;
    let mut lines = BufReader::new(file).lines();
    parse_header(path, &mut lines)
}

fn parse_header(path: &Path, lines: &mut Lines<BufReader<File>>) -> Result<DumpHeader> {
    let first = lines
        .next()
        .transpose()?
        .ok_or_else(|| VaultError::corrupt(format!("导出文件为空: {}", path.display())))?;
    serde_json::from_str(&first).map_err(|e| {
        VaultError::corrupt(format!("导出文件头部无法解析 {}: {e}", path.display()))
    })
}

/// 惰性读取导出文件，只能遍历一次
pub struct DumpReader {
    path: PathBuf,
    spec: CollectionSpec,
    header: DumpHeader,
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl DumpReader {
    pub fn header(&self) -> &DumpHeader {
        &self.header
    }

    fn parse_line(&self, line: &str) -> Result<Record> {
        let value: Value = serde_json::from_str(line).map_err(|e| {
            VaultError::corrupt(format!(
                "{} 第 {} 行无法解析: {e}",
                self.path.display(),
                self.line_no
            ))
        })?;
        let Value::Object(record) = value else {
            return Err(VaultError::corrupt(format!(
                "{} 第 {} 行不是对象",
                self.path.display(),
                self.line_no
            )));
        };
        self.spec.validate_record(&record)?;
        Ok(record)
    }
}

impl Iterator for DumpReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(self.parse_line(&line));
        }
    }
}

/// 打开导出文件，头部必须与当前注册的集合结构一致
pub fn deserialize_collection(path: &Path, spec: &CollectionSpec) -> Result<DumpReader> {
    let file = File::open(path)?;
    let mut lines = BufReader::new(file).lines();
    let header = parse_header(path, &mut lines)?;

    if !header.matches(spec) {
        return Err(VaultError::schema(format!(
            "集合 {} 的导出结构与当前声明不一致",
            spec.name
        )));
    }

    Ok(DumpReader {
        path: path.to_path_buf(),
        spec: spec.clone(),
        header,
        lines,
        line_no: 1,
    })
}
