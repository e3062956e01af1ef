use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::DynamicImage;
use log::{debug, warn};
use serde::Serialize;
use tokio::task::spawn_blocking;
use utoipa::ToSchema;

use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::index::{Hit, VectorIndex};
use crate::metadata::{KEY_ID, KEY_PATH, MetadataRecord};
use crate::saliency::SaliencyProvider;
use crate::{metrics, utils};

/// 进程内共享的服务上下文
///
/// 启动时创建一次并传给所有处理函数，各依赖可以在后台加载完成后再填入
pub struct AppContext {
    index: OnceLock<Arc<VectorIndex>>,
    embedder: OnceLock<Arc<dyn EmbeddingProvider>>,
    saliency: OnceLock<Arc<dyn SaliencyProvider>>,
    /// 单次模型调用的超时时间
    timeout: Duration,
}

impl AppContext {
    pub fn new(timeout: Duration) -> Self {
        Self {
            index: OnceLock::new(),
            embedder: OnceLock::new(),
            saliency: OnceLock::new(),
            timeout,
        }
    }

    /// 创建一个所有依赖都已就绪的上下文
    pub fn ready(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        saliency: Arc<dyn SaliencyProvider>,
        timeout: Duration,
    ) -> Self {
        let ctx = Self::new(timeout);
        ctx.set_index(index);
        ctx.set_embedder(embedder);
        ctx.set_saliency(saliency);
        ctx
    }

    /// 只有第一次设置生效，返回是否设置成功
    pub fn set_index(&self, index: Arc<VectorIndex>) -> bool {
        self.index.set(index).is_ok()
    }

    pub fn set_embedder(&self, embedder: Arc<dyn EmbeddingProvider>) -> bool {
        self.embedder.set(embedder).is_ok()
    }

    pub fn set_saliency(&self, saliency: Arc<dyn SaliencyProvider>) -> bool {
        self.saliency.set(saliency).is_ok()
    }

    pub fn index(&self) -> Result<&Arc<VectorIndex>> {
        self.index.get().ok_or(Error::NotReady("索引尚未加载"))
    }

    pub fn embedder(&self) -> Result<&Arc<dyn EmbeddingProvider>> {
        self.embedder.get().ok_or(Error::NotReady("特征提取模型尚未加载"))
    }

    pub fn saliency(&self) -> Result<&Arc<dyn SaliencyProvider>> {
        self.saliency.get().ok_or(Error::NotReady("解释模型尚未加载"))
    }

    pub fn is_ready(&self) -> bool {
        self.index.get().is_some() && self.embedder.get().is_some() && self.saliency.get().is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// 一条对外的搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SearchResult {
    /// 图片的稳定 ID
    pub id: String,
    /// 与查询图片的平方欧氏距离，越小越相似，没有归一化
    pub score: f64,
    /// 图片元数据，至少包含 `path`、`class`、`filename`
    #[schema(value_type = Object)]
    pub metadata: MetadataRecord,
}

impl From<Hit> for SearchResult {
    fn from(hit: Hit) -> Self {
        let id = hit.metadata.external_id().map(str::to_owned).unwrap_or_else(|| hit.id.to_string());
        Self { id, score: hit.distance, metadata: hit.metadata }
    }
}

/// 解释接口的响应
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExplainResponse {
    pub image_id: String,
    /// base64 编码的 PNG 热力图
    pub heatmap_base64: String,
}

/// 在阻塞线程池中运行并施加超时，超时或崩溃都视为模型调用失败
async fn run_blocking<T, F>(timeout: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::time::timeout(timeout, spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(Error::Provider(format!("任务异常退出: {e}"))),
        Err(_) => Err(Error::Provider(format!("调用超时（{}ms）", timeout.as_millis()))),
    }
}

/// 以图搜图
#[derive(Clone)]
pub struct SearchService {
    ctx: Arc<AppContext>,
}

impl SearchService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// 搜索与图片最相似的 k 条记录
    pub fn search(&self, image: &DynamicImage, k: usize) -> Result<Vec<SearchResult>> {
        let index = self.ctx.index()?;
        let embedder = self.ctx.embedder()?;
        let query = embedder.extract(image)?;
        let hits = index.search(&query, k)?;
        Ok(hits.into_iter().map(SearchResult::from).collect())
    }

    /// 解码上传的图片并搜索，特征提取受超时限制
    pub async fn search_bytes(&self, bytes: Vec<u8>, k: usize) -> Result<Vec<SearchResult>> {
        self.ctx.index()?;
        self.ctx.embedder()?;

        let start = Instant::now();
        let this = self.clone();
        let results = run_blocking(self.ctx.timeout, move || {
            let image = utils::imdecode(&bytes)?;
            this.search(&image, k)
        })
        .await?;

        let elapsed = start.elapsed().as_secs_f64();
        debug!("search time: {:.3}s", elapsed);
        metrics::observe_search(elapsed, results.first().map(|r| r.score));
        Ok(results)
    }
}

/// 生成热力图解释
///
/// 解释是尽力而为的：模型失败或超时时返回未经修改的原图
#[derive(Clone)]
pub struct ExplanationService {
    ctx: Arc<AppContext>,
}

/// 解释结果，`fallback` 表示模型失败后返回了原图
#[derive(Debug, Clone)]
pub struct Explanation {
    pub image: DynamicImage,
    pub fallback: bool,
}

impl ExplanationService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// 根据 ID 查找索引中的图片，也接受图片路径
    pub fn resolve(&self, image_id: &str) -> Result<MetadataRecord> {
        let index = self.ctx.index()?;
        index
            .find_by_key(KEY_ID, image_id)
            .or_else(|| index.find_by_key(KEY_PATH, image_id))
            .map(|(_, record)| record)
            .ok_or_else(|| Error::NotFound(format!("索引中没有图片 {image_id}")))
    }

    /// 为指定位置的图片生成解释，不施加超时
    pub fn explain_path(&self, locator: &Path, target_class: Option<usize>) -> Result<Explanation> {
        let saliency = self.ctx.saliency()?;
        let image = utils::imread(locator)?;
        Ok(match saliency.explain(&image, target_class) {
            Ok(overlay) => Explanation { image: DynamicImage::ImageRgb8(overlay), fallback: false },
            Err(e) => fallback(image, &e),
        })
    }

    /// 为索引中的图片生成解释并编码为 base64 PNG
    pub async fn explain(
        &self,
        image_id: &str,
        target_class: Option<usize>,
    ) -> Result<ExplainResponse> {
        let record = self.resolve(image_id)?;
        let locator = record
            .path()
            .ok_or_else(|| Error::NotFound(format!("图片 {image_id} 没有记录路径")))?
            .to_owned();
        let saliency = self.ctx.saliency()?.clone();

        let image = run_blocking(self.ctx.timeout, move || utils::imread(locator)).await?;

        let input = image.clone();
        let explanation =
            match run_blocking(self.ctx.timeout, move || saliency.explain(&input, target_class))
                .await
            {
                Ok(overlay) => {
                    Explanation { image: DynamicImage::ImageRgb8(overlay), fallback: false }
                }
                Err(e) => fallback(image, &e),
            };

        let png = utils::imencode_png(&explanation.image)?;
        Ok(ExplainResponse { image_id: image_id.to_owned(), heatmap_base64: STANDARD.encode(png) })
    }
}

fn fallback(image: DynamicImage, err: &Error) -> Explanation {
    warn!("生成解释失败，返回原图: {err}");
    metrics::inc_explain_fallback();
    Explanation { image, fallback: true }
}
