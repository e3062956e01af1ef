use std::sync::Arc;

use crate::builder::IndexBuilder;
use crate::config::ConfDir;
use crate::error::Result;
use crate::service::{AppContext, ExplanationService, SearchService};

/// 应用状态
pub struct AppState {
    pub ctx: Arc<AppContext>,
    pub search: SearchService,
    pub explain: ExplanationService,
    /// 上传图片保存在该目录的 images 子目录下
    pub conf_dir: ConfDir,
    /// 默认返回的结果数量
    pub k: usize,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(ctx: Arc<AppContext>, conf_dir: ConfDir, k: usize) -> Arc<Self> {
        Arc::new(AppState {
            search: SearchService::new(ctx.clone()),
            explain: ExplanationService::new(ctx.clone()),
            ctx,
            conf_dir,
            k,
        })
    }

    /// 使用当前的特征提取模型创建构建器
    pub fn builder(&self) -> Result<IndexBuilder> {
        Ok(IndexBuilder::new(self.ctx.embedder()?.clone()))
    }
}
