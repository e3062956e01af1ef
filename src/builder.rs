use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ParallelProgressIterator, ProgressBar};
use log::{info, warn};
use rayon::prelude::*;
use regex::Regex;
use walkdir::WalkDir;

use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::index::{AddOutcome, VectorIndex};
use crate::metadata::{KEY_HASH, KEY_ID, MetadataRecord};
use crate::utils::{hash_bytes, imdecode, pb_style};

pub const DEFAULT_SUFFIX: &str = "jpg,jpeg,png,webp";

/// 批量构建中被跳过的单张图片
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// 批量构建的统计结果
#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    /// 成功写入索引的图片数量
    pub processed: usize,
    pub failures: Vec<ItemFailure>,
}

impl BuildSummary {
    pub fn skipped(&self) -> usize {
        self.failures.len()
    }
}

/// 从按分类组织的图片目录构建索引
///
/// 目录结构为 `root/<class>/<filename>`，分类取自图片的直接父目录名
pub struct IndexBuilder {
    embedder: Arc<dyn EmbeddingProvider>,
    suffix: Regex,
    progress: bool,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder, suffix: suffix_regex(DEFAULT_SUFFIX), progress: false }
    }

    /// 扫描的文件后缀名，多个后缀用逗号分隔，不区分大小写
    pub fn suffix(mut self, suffix: &str) -> Self {
        self.suffix = suffix_regex(suffix);
        self
    }

    /// 是否显示进度条
    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// 递归扫描图片文件，按路径排序以保证 ID 可复现
    pub fn scan(&self, root: impl AsRef<Path>) -> Vec<PathBuf> {
        let root = root.as_ref();
        info!("开始扫描目录: {}", root.display());
        let mut entries = WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("扫描出错: {e}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension().is_some_and(|ext| self.suffix.is_match(&ext.to_string_lossy()))
            })
            .collect::<Vec<_>>();
        entries.sort();
        info!("扫描完成，共 {} 张图片", entries.len());
        entries
    }

    /// 计算一张图片的特征和元数据，`locator` 为记录在元数据中的图片位置
    pub fn embed_bytes(&self, locator: &Path, bytes: &[u8]) -> Result<(Vec<f32>, MetadataRecord)> {
        let image = imdecode(bytes)?;
        let feature = self.embedder.extract(&image)?;
        if feature.len() != self.embedder.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.embedder.dimension(),
                actual: feature.len(),
            });
        }

        let class = locator
            .parent()
            .and_then(Path::file_name)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let filename =
            locator.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let hash = hash_bytes(bytes);
        let path = locator.to_string_lossy();

        let record = MetadataRecord::with_required(&path, &class, &filename)
            .with(KEY_ID, record_id(&hash, &path))
            .with(KEY_HASH, hash);
        Ok((feature, record))
    }

    pub fn embed_file(&self, path: &Path) -> Result<(Vec<f32>, MetadataRecord)> {
        let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
        self.embed_bytes(path, &bytes)
    }

    /// 处理目录下所有图片，返回对齐的向量、元数据和统计结果
    ///
    /// 单张图片失败只记录并跳过，不影响其他图片
    pub fn prepare(
        &self,
        root: impl AsRef<Path>,
    ) -> (Vec<Vec<f32>>, Vec<MetadataRecord>, BuildSummary) {
        let paths = self.scan(root);

        let pb = if self.progress {
            ProgressBar::new(paths.len() as u64).with_style(pb_style())
        } else {
            ProgressBar::hidden()
        };

        // NOTE: collect 会保持输入顺序，因此并行计算不影响 ID 分配
        let results = paths
            .par_iter()
            .progress_with(pb.clone())
            .map(|path| (path, self.embed_file(path)))
            .collect::<Vec<_>>();
        pb.finish_and_clear();

        let mut summary = BuildSummary::default();
        let mut vectors = Vec::with_capacity(results.len());
        let mut metadata = Vec::with_capacity(results.len());

        for (path, result) in results {
            match result {
                Ok((feature, record)) => {
                    vectors.push(feature);
                    metadata.push(record);
                    summary.processed += 1;
                }
                Err(e) => {
                    warn!("处理图片失败 {}: {e}", path.display());
                    summary.failures.push(ItemFailure { path: path.clone(), reason: e.to_string() });
                }
            }
        }

        info!("处理完成：成功 {}，失败 {}", summary.processed, summary.skipped());
        (vectors, metadata, summary)
    }

    /// 从目录重新构建索引并保存
    ///
    /// 没有任何图片处理成功时不会改动索引，返回 `NoItemsProcessed`
    pub fn build(&self, root: impl AsRef<Path>, index: &VectorIndex) -> Result<BuildSummary> {
        self.check_dimension(index)?;
        let (vectors, metadata, summary) = self.prepare(root);
        if vectors.is_empty() {
            return Err(Error::NoItemsProcessed { skipped: summary.skipped() });
        }
        index.build(vectors, metadata)?;
        Ok(summary)
    }

    /// 追加单张图片，不会自动保存
    pub fn add_image(
        &self,
        index: &VectorIndex,
        path: &Path,
        allow_duplicates: bool,
    ) -> Result<AddOutcome> {
        self.check_dimension(index)?;
        let (feature, record) = self.embed_file(path)?;
        self.add_record(index, feature, record, allow_duplicates)
    }

    /// 将已经计算好的特征追加到索引，按内容哈希去重
    pub fn add_record(
        &self,
        index: &VectorIndex,
        feature: Vec<f32>,
        record: MetadataRecord,
        allow_duplicates: bool,
    ) -> Result<AddOutcome> {
        match record.get_str(KEY_HASH) {
            Some(hash) if !allow_duplicates => {
                let hash = hash.to_owned();
                index.add_unique(feature, record, KEY_HASH, &hash)
            }
            _ => index.add(feature, record).map(AddOutcome::Added),
        }
    }

    fn check_dimension(&self, index: &VectorIndex) -> Result<()> {
        if self.embedder.dimension() != index.dimension() {
            return Err(Error::DimensionMismatch {
                expected: index.dimension(),
                actual: self.embedder.dimension(),
            });
        }
        Ok(())
    }
}

/// 图片 ID 由内容哈希和位置共同决定，内容相同但位置不同的图片各有自己的 ID
fn record_id(hash: &str, path: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(hash.as_bytes());
    hasher.update(b"\0");
    hasher.update(path.as_bytes());
    hasher.finalize().to_hex().to_string()
}

fn suffix_regex(suffix: &str) -> Regex {
    let parts = suffix
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(regex::escape)
        .collect::<Vec<_>>();
    // 每个后缀都已转义，正则总是合法的
    Regex::new(&format!("(?i)^({})$", parts.join("|"))).expect("failed to build regex")
}
