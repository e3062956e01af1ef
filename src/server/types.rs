use std::collections::BTreeMap;

use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 搜索请求参数
#[derive(TryFromMultipart)]
pub struct SearchRequest {
    pub file: Bytes,
    pub k: Option<usize>,
}

/// 搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchForm {
    /// 上传的图片文件
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// 返回的结果数量
    pub k: Option<usize>,
}

/// 解释请求参数
#[derive(Debug, Deserialize, ToSchema)]
pub struct ExplainRequest {
    /// 图片 ID，也可以是索引中记录的图片路径
    pub image_id: String,
    /// 需要解释的类别，不填则使用得分最高的类别
    #[serde(default)]
    pub target_class: Option<usize>,
}

/// 添加图片请求参数
#[derive(TryFromMultipart)]
pub struct AddImageRequest {
    pub file: FieldData<Bytes>,
    pub class: Option<String>,
}

/// 添加图片表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct AddImageForm {
    /// 上传的图片文件，必须带有文件名
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// 图片分类，默认为 uploads
    pub class: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AddImageResponse {
    /// 图片的稳定 ID
    pub id: String,
    /// 插入顺序 ID
    pub index: usize,
    /// 是否与已有图片重复而未添加
    pub duplicate: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// loading 或 healthy
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub items: usize,
    pub dimension: usize,
    /// 是否有尚未保存的图片
    pub dirty: bool,
    /// 每个分类的图片数量
    pub classes: BTreeMap<String, usize>,
}
