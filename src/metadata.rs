use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const KEY_ID: &str = "id";
pub const KEY_PATH: &str = "path";
pub const KEY_CLASS: &str = "class";
pub const KEY_FILENAME: &str = "filename";
pub const KEY_HASH: &str = "hash";

/// 一条图片元数据，除了 `path`、`class`、`filename` 以外的字段原样保留
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataRecord(Map<String, Value>);

impl MetadataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以 `path`、`class`、`filename` 三个必需字段创建记录
    pub fn with_required(path: &str, class: &str, filename: &str) -> Self {
        Self::new().with(KEY_PATH, path).with(KEY_CLASS, class).with(KEY_FILENAME, filename)
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_owned(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn path(&self) -> Option<&str> {
        self.get_str(KEY_PATH)
    }

    pub fn class(&self) -> Option<&str> {
        self.get_str(KEY_CLASS)
    }

    pub fn filename(&self) -> Option<&str> {
        self.get_str(KEY_FILENAME)
    }

    /// 对外暴露的稳定 ID：优先使用入库时生成的 `id`，旧数据回退到 `path`
    pub fn external_id(&self) -> Option<&str> {
        self.get_str(KEY_ID).or_else(|| self.path())
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for MetadataRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// 与向量一一对应的元数据序列
///
/// 本身不提供修改接口，所有修改都经由 `VectorIndex` 的 `build`/`add` 完成
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataStore {
    records: Vec<MetadataRecord>,
}

impl MetadataStore {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&MetadataRecord> {
        self.records.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetadataRecord> {
        self.records.iter()
    }

    pub(crate) fn push(&mut self, record: MetadataRecord) {
        self.records.push(record);
    }

    /// 按字段值查找第一条记录
    pub fn position(&self, key: &str, value: &str) -> Option<usize> {
        self.records.iter().position(|r| r.get_str(key) == Some(value))
    }

    /// 统计每个分类的条目数
    pub fn class_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            let class = record.class().unwrap_or("<none>");
            *counts.entry(class.to_owned()).or_insert(0) += 1;
        }
        counts
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.records)
            .map_err(|e| Error::CorruptState(format!("无法序列化元数据: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let records = serde_json::from_slice(bytes)
            .map_err(|e| Error::CorruptState(format!("无法解析元数据: {e}")))?;
        Ok(Self { records })
    }
}

impl From<Vec<MetadataRecord>> for MetadataStore {
    fn from(records: Vec<MetadataRecord>) -> Self {
        Self { records }
    }
}
