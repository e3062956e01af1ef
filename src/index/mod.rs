pub mod blob;
pub mod flat;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

pub use flat::Neighbor;
use log::{debug, info, warn};

use crate::config::ConfDir;
use crate::error::{Error, Result};
use crate::metadata::{MetadataRecord, MetadataStore};

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// 插入顺序 ID
    pub id: usize,
    /// 平方欧氏距离，越小越相似
    pub distance: f64,
    pub metadata: MetadataRecord,
}

/// 追加的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added(usize),
    /// 已存在相同键值的记录，附带已有记录的 ID
    Duplicate(usize),
}

/// 向量与元数据必须作为一个整体被替换或追加
#[derive(Debug, Clone, Default)]
struct IndexState {
    /// 按行拼接的向量
    vectors: Vec<f32>,
    metadata: MetadataStore,
    /// 每次修改递增，用于判断是否有未保存的改动
    generation: u64,
}

impl IndexState {
    fn append(&mut self, vector: &[f32], metadata: MetadataRecord) -> usize {
        let id = self.metadata.len();
        self.vectors.extend_from_slice(vector);
        self.metadata.push(metadata);
        self.generation += 1;
        id
    }
}

/// 精确 L2 最近邻索引
///
/// 读操作只克隆当前状态的 `Arc`，不会阻塞写操作；
/// 写操作在独占锁内修改状态，若仍有读者持有旧快照则先复制一份。
pub struct VectorIndex {
    dimension: usize,
    vector_path: PathBuf,
    metadata_path: PathBuf,
    state: RwLock<Arc<IndexState>>,
    /// 串行化所有持久化操作
    save_lock: Mutex<()>,
    saved_generation: AtomicU64,
}

impl VectorIndex {
    /// 创建一个空索引，`vector_path` 和 `metadata_path` 总是成对读写
    pub fn new(
        dimension: usize,
        vector_path: impl Into<PathBuf>,
        metadata_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dimension,
            vector_path: vector_path.into(),
            metadata_path: metadata_path.into(),
            state: RwLock::new(Arc::default()),
            save_lock: Mutex::new(()),
            saved_generation: AtomicU64::new(0),
        }
    }

    /// 使用配置目录中的默认文件位置创建索引
    pub fn with_conf_dir(conf_dir: &ConfDir, dimension: usize) -> Self {
        Self::new(dimension, conf_dir.vector_index(), conf_dir.metadata())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn vector_path(&self) -> &Path {
        &self.vector_path
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    fn snapshot(&self) -> Arc<IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch { expected: self.dimension, actual: vector.len() });
        }
        Ok(())
    }

    /// 同一快照中的 (向量数量, 元数据数量)
    pub fn counts(&self) -> (usize, usize) {
        let state = self.snapshot();
        (state.vectors.len() / self.dimension.max(1), state.metadata.len())
    }

    pub fn len(&self) -> usize {
        self.snapshot().metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 是否有尚未保存的 `add`
    pub fn is_dirty(&self) -> bool {
        self.snapshot().generation != self.saved_generation.load(Ordering::SeqCst)
    }

    /// 使用新的向量和元数据整体替换索引，并写入磁盘
    ///
    /// 任何校验或写入失败时，内存和磁盘上的旧状态都保持不变
    pub fn build(&self, vectors: Vec<Vec<f32>>, metadata: Vec<MetadataRecord>) -> Result<()> {
        if vectors.len() != metadata.len() {
            return Err(Error::LengthMismatch { vectors: vectors.len(), metadata: metadata.len() });
        }
        let mut flat = Vec::with_capacity(vectors.len() * self.dimension);
        for vector in &vectors {
            self.check_dimension(vector)?;
            flat.extend_from_slice(vector);
        }
        drop(vectors);

        info!("正在构建索引：{} 条记录", metadata.len());

        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state =
            IndexState { vectors: flat, metadata: MetadataStore::from(metadata), generation: 0 };
        self.persist(&state)?;

        let mut lock = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.generation = lock.generation + 1;
        self.saved_generation.store(state.generation, Ordering::SeqCst);
        *lock = Arc::new(state);
        Ok(())
    }

    /// 追加一条记录，返回分配的 ID
    ///
    /// 不会自动保存，需要持久化时调用方须显式调用 [`VectorIndex::save`]
    pub fn add(&self, vector: Vec<f32>, metadata: MetadataRecord) -> Result<usize> {
        self.check_dimension(&vector)?;
        let mut lock = self.state.write().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::make_mut(&mut lock).append(&vector, metadata))
    }

    /// 仅当没有 `key` 字段等于 `value` 的记录时才追加，检查与追加在同一把锁内完成
    pub fn add_unique(
        &self,
        vector: Vec<f32>,
        metadata: MetadataRecord,
        key: &str,
        value: &str,
    ) -> Result<AddOutcome> {
        self.check_dimension(&vector)?;
        let mut lock = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = lock.metadata.position(key, value) {
            return Ok(AddOutcome::Duplicate(id));
        }
        Ok(AddOutcome::Added(Arc::make_mut(&mut lock).append(&vector, metadata)))
    }

    /// 搜索与 `query` 最接近的 k 条记录，按距离升序，距离相同时按 ID 升序
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        self.check_dimension(query)?;
        let state = self.snapshot();
        let neighbors = flat::knn_l2(query, &state.vectors, self.dimension, k);
        debug!("searched {} vectors, {} hits", state.metadata.len(), neighbors.len());

        let hits = neighbors
            .into_iter()
            .filter_map(|n| {
                state.metadata.get(n.id).map(|metadata| Hit {
                    id: n.id,
                    distance: n.distance,
                    metadata: metadata.clone(),
                })
            })
            .collect();
        Ok(hits)
    }

    /// 根据 ID 获取向量和元数据
    pub fn get(&self, id: usize) -> Option<(Vec<f32>, MetadataRecord)> {
        let state = self.snapshot();
        let metadata = state.metadata.get(id)?.clone();
        let start = id * self.dimension;
        let vector = state.vectors.get(start..start + self.dimension)?.to_vec();
        Some((vector, metadata))
    }

    /// 查找第一条 `key` 字段等于 `value` 的记录
    pub fn find_by_key(&self, key: &str, value: &str) -> Option<(usize, MetadataRecord)> {
        let state = self.snapshot();
        let id = state.metadata.position(key, value)?;
        state.metadata.get(id).map(|record| (id, record.clone()))
    }

    pub fn class_counts(&self) -> BTreeMap<String, usize> {
        self.snapshot().metadata.class_counts()
    }

    /// 将当前状态写入磁盘
    ///
    /// 写入期间不持有索引锁，并发的 `add` 不会被阻塞，但也不会包含在这次保存中
    pub fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.snapshot();
        self.persist(&state)?;
        self.saved_generation.store(state.generation, Ordering::SeqCst);
        Ok(())
    }

    fn persist(&self, state: &IndexState) -> Result<()> {
        for path in [&self.vector_path, &self.metadata_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }

        let metadata = state.metadata.encode()?;
        let digest = blake3::hash(&metadata);
        let vectors = blob::encode(self.dimension, &state.vectors, *digest.as_bytes());

        // 两个临时文件都落盘后才开始替换，失败时磁盘上的旧文件保持原样
        let metadata_tmp = sibling(&self.metadata_path, TMP_SUFFIX);
        let vector_tmp = sibling(&self.vector_path, TMP_SUFFIX);
        write_synced(&metadata_tmp, &metadata)?;
        if let Err(e) = write_synced(&vector_tmp, &vectors) {
            let _ = fs::remove_file(&metadata_tmp);
            return Err(e);
        }

        // NOTE: 旧文件先改名为备份，替换过程中任意时刻崩溃，磁盘上都至少有一对摘要一致的文件
        backup(&self.vector_path)?;
        backup(&self.metadata_path)?;
        rename(&metadata_tmp, &self.metadata_path)?;
        rename(&vector_tmp, &self.vector_path)?;

        info!(
            "索引已保存：{} 条记录 -> {}",
            state.metadata.len(),
            self.vector_path.display()
        );
        Ok(())
    }

    /// 从磁盘加载索引
    ///
    /// 优先使用当前文件，当前文件不成对时使用上一次保存留下的备份。
    /// 没有任何可用文件时保持当前状态并返回 `Ok(false)`
    pub fn load(&self) -> Result<bool> {
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let vector_files = existing(&self.vector_path);
        let metadata_paths = existing(&self.metadata_path);
        if vector_files.is_empty() || metadata_paths.is_empty() {
            info!("未找到索引文件，使用空索引");
            return Ok(false);
        }

        let mut metadata_files = Vec::with_capacity(metadata_paths.len());
        for path in metadata_paths {
            let bytes = fs::read(&path).map_err(|e| Error::io(&path, e))?;
            metadata_files.push((path, bytes));
        }

        let mut last_error = None;
        for vector_path in vector_files {
            let bytes = fs::read(&vector_path).map_err(|e| Error::io(&vector_path, e))?;
            match self.decode_pair(&bytes, &metadata_files) {
                Ok((vectors, metadata)) => {
                    if vector_path != self.vector_path {
                        warn!("当前索引文件不完整，使用备份 {}", vector_path.display());
                    }
                    let count = metadata.len();
                    let mut lock = self.state.write().unwrap_or_else(PoisonError::into_inner);
                    let generation = lock.generation + 1;
                    *lock = Arc::new(IndexState { vectors, metadata, generation });
                    self.saved_generation.store(generation, Ordering::SeqCst);
                    info!("已加载索引：{} 条记录", count);
                    return Ok(true);
                }
                Err(e) => {
                    debug!("跳过 {}: {e}", vector_path.display());
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::CorruptState("没有可用的索引文件".to_owned())))
    }

    /// 解码向量文件，并在候选元数据中找到与之配对的一份
    fn decode_pair(
        &self,
        vector_bytes: &[u8],
        metadata_files: &[(PathBuf, Vec<u8>)],
    ) -> Result<(Vec<f32>, MetadataStore)> {
        let (header, vectors) = blob::decode(vector_bytes, self.dimension)?;
        let Some((_, bytes)) = metadata_files
            .iter()
            .find(|(_, bytes)| header.metadata_digest == *blake3::hash(bytes).as_bytes())
        else {
            return Err(Error::CorruptState("向量文件与元数据文件不是同一次保存的结果".to_owned()));
        };

        let metadata = MetadataStore::decode(bytes)?;
        if header.count as usize != metadata.len() {
            return Err(Error::CorruptState(format!(
                "向量数量 {} 与元数据数量 {} 不一致",
                header.count,
                metadata.len()
            )));
        }
        Ok((vectors, metadata))
    }
}

const TMP_SUFFIX: &str = ".tmp";
const BACKUP_SUFFIX: &str = ".prev";

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// 存在的当前文件和备份文件，当前文件在前
fn existing(path: &Path) -> Vec<PathBuf> {
    [path.to_path_buf(), sibling(path, BACKUP_SUFFIX)]
        .into_iter()
        .filter(|p| p.is_file())
        .collect()
}

fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| Error::io(path, e))?;
    file.write_all(data).map_err(|e| Error::io(path, e))?;
    file.sync_all().map_err(|e| Error::io(path, e))
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| Error::io(to, e))
}

/// 将现有文件改名为备份，文件不存在时什么也不做
fn backup(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    rename(path, &sibling(path, BACKUP_SUFFIX))
}
