use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::spawn_blocking;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, ProviderOptions};
use crate::embedding::ThumbnailEmbedder;
use crate::error::Error;
use crate::index::VectorIndex;
use crate::saliency::GradientSaliency;
use crate::service::AppContext;
use crate::server;

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
    /// 未指定 k 时返回的结果数量
    #[arg(short, value_name = "K", default_value_t = 5)]
    pub k: usize,
    #[command(flatten)]
    pub provider: ProviderOptions,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let ctx = Arc::new(AppContext::new(self.provider.timeout()));
        ctx.set_embedder(Arc::new(ThumbnailEmbedder::new(opts.dimension)?));
        ctx.set_saliency(Arc::new(GradientSaliency::default()));

        // 索引在后台加载，加载完成前搜索接口返回 503
        let failed = Arc::new(Notify::new());
        let loader = {
            let ctx = ctx.clone();
            let failed = failed.clone();
            let index = VectorIndex::with_conf_dir(&opts.conf_dir, opts.dimension);
            tokio::spawn(async move {
                let loaded = spawn_blocking(move || index.load().map(|_| index))
                    .await
                    .map_err(|e| Error::Provider(format!("加载任务异常退出: {e}")))
                    .and_then(|r| r);
                match loaded {
                    Ok(index) => {
                        info!("索引加载完成：{} 条记录", index.len());
                        ctx.set_index(Arc::new(index));
                        Ok(())
                    }
                    Err(e) => {
                        error!("加载索引失败: {e}");
                        failed.notify_one();
                        Err(e)
                    }
                }
            })
        };

        let state = server::AppState::new(ctx.clone(), opts.conf_dir.clone(), self.k);
        let app = server::create_app(state);

        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("收到退出信号"),
                    _ = failed.notified() => {}
                }
            })
            .await?;

        loader.await??;

        if let Ok(index) = ctx.index() {
            if index.is_dirty() {
                warn!("存在未保存的图片，正在保存索引");
                let index = index.clone();
                spawn_blocking(move || index.save()).await??;
            }
        }
        Ok(())
    }
}
