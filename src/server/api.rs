use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum_typed_multipart::TypedMultipart;
use log::info;
use tokio::task::block_in_place;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::error::Error;
use crate::index::AddOutcome;
use crate::metadata::{KEY_FILENAME, KEY_HASH};
use crate::metrics;
use crate::utils::hash_bytes;
use crate::service::{ExplainResponse, SearchResult};

/// 上传图片未指定分类时使用的分类名
const DEFAULT_CLASS: &str = "uploads";

/// 服务状态，索引加载完成前为 loading
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = if state.ctx.is_ready() { "healthy" } else { "loading" };
    Json(HealthResponse { status: status.to_owned() })
}

/// 搜索一张图片
#[utoipa::path(
    post,
    path = "/search",
    request_body(content = SearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = Vec<SearchResult>),
        (status = 400, description = "图片无法解码"),
        (status = 503, description = "索引尚未加载"),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(data): TypedMultipart<SearchRequest>,
) -> Result<Json<Vec<SearchResult>>> {
    let k = data.k.unwrap_or(state.k);
    info!("正在搜索上传图片，k = {k}");
    let result = state.search.search_bytes(data.file.to_vec(), k).await?;
    Ok(Json(result))
}

/// 为索引中的图片生成热力图
#[utoipa::path(
    post,
    path = "/explain",
    request_body = ExplainRequest,
    responses(
        (status = 200, body = ExplainResponse),
        (status = 404, description = "索引中没有该图片"),
    )
)]
pub async fn explain_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<ExplainRequest>,
) -> Result<Json<ExplainResponse>> {
    let response = state.explain.explain(&data.image_id, data.target_class).await?;
    Ok(Json(response))
}

/// 添加图片到索引，不会自动保存
#[utoipa::path(
    post,
    path = "/add",
    request_body(content = AddImageForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = AddImageResponse),
    )
)]
pub async fn add_image_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(data): TypedMultipart<AddImageRequest>,
) -> Result<Json<AddImageResponse>> {
    let file_name = data.file.metadata.file_name.as_deref();
    let response = add_upload(&state, file_name, data.class, &data.file.contents).await?;
    Ok(Json(response))
}

/// 上传的图片按内容哈希保存为 `images/<class>/<hash>.<ext>`，原始文件名只记录在元数据中
async fn add_upload(
    state: &AppState,
    file_name: Option<&str>,
    class: Option<String>,
    contents: &[u8],
) -> Result<AddImageResponse> {
    let file_name = file_name
        .and_then(|name| Path::new(name).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| AppError::BadRequest("文件名不能为空".to_owned()))?;
    let class = class.unwrap_or_else(|| DEFAULT_CLASS.to_owned());
    if Path::new(&class).file_name() != Some(OsStr::new(&class)) {
        return Err(AppError::BadRequest(format!("非法的分类名: {class}")));
    }

    let index = state.ctx.index()?.clone();
    let builder = state.builder()?;
    let dir = state.conf_dir.images().join(&class);
    let stored = format!("{}.{}", hash_bytes(contents), upload_extension(&file_name, contents));
    let path = dir.join(stored);

    let (feature, mut record) = block_in_place(|| builder.embed_bytes(&path, contents))?;
    record.insert(KEY_FILENAME, file_name);
    if let Some((id, existing)) =
        record.get_str(KEY_HASH).and_then(|hash| index.find_by_key(KEY_HASH, hash))
    {
        return Ok(AddImageResponse {
            id: existing.external_id().map(str::to_owned).unwrap_or_else(|| id.to_string()),
            index: id,
            duplicate: true,
        });
    }

    tokio::fs::create_dir_all(&dir).await.map_err(|e| Error::io(&dir, e))?;
    tokio::fs::write(&path, contents).await.map_err(|e| Error::io(&path, e))?;

    let external_id = record.external_id().unwrap_or_default().to_owned();
    let (index_id, duplicate) = match builder.add_record(&index, feature, record, false)? {
        AddOutcome::Added(id) => (id, false),
        AddOutcome::Duplicate(id) => (id, true),
    };
    info!("已添加图片 {} -> {}", path.display(), index_id);
    Ok(AddImageResponse { id: external_id, index: index_id, duplicate })
}

/// 优先使用图片内容识别出的格式，识别失败时沿用上传文件的后缀
fn upload_extension(file_name: &str, contents: &[u8]) -> String {
    image::guess_format(contents)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .map(str::to_owned)
        .or_else(|| {
            Path::new(file_name).extension().map(|ext| ext.to_string_lossy().to_lowercase())
        })
        .unwrap_or_else(|| "img".to_owned())
}

/// 将索引写入磁盘
#[utoipa::path(post, path = "/save")]
pub async fn save_handler(State(state): State<Arc<AppState>>) -> Result<()> {
    let index = state.ctx.index()?;
    block_in_place(|| index.save())?;
    Ok(())
}

/// 获取索引统计信息
#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, body = StatsResponse),
    )
)]
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>> {
    let index = state.ctx.index()?;
    Ok(Json(StatsResponse {
        items: index.len(),
        dimension: index.dimension(),
        dirty: index.is_dirty(),
        classes: index.class_counts(),
    }))
}

/// prometheus 指标
#[utoipa::path(get, path = "/metrics")]
pub async fn metrics_handler() -> String {
    metrics::gather_text()
}
