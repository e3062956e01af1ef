use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::Parser;
use log::warn;
use tokio::task::block_in_place;

use super::open_index;
use crate::cli::SubCommandExtend;
use crate::config::{Opts, ProviderOptions};
use crate::saliency::GradientSaliency;
use crate::service::{AppContext, ExplanationService};

#[derive(Parser, Debug, Clone)]
pub struct ExplainCommand {
    /// 图片 ID，也可以是索引中记录的图片路径
    pub image_id: String,
    /// 需要解释的类别，不填则使用得分最高的类别
    #[arg(long, value_name = "N")]
    pub target_class: Option<usize>,
    /// 热力图输出路径
    #[arg(short, long, default_value = "explain.png")]
    pub output: PathBuf,
    #[command(flatten)]
    pub provider: ProviderOptions,
}

impl SubCommandExtend for ExplainCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let ctx = AppContext::new(self.provider.timeout());
        ctx.set_index(Arc::new(open_index(opts)?));
        ctx.set_saliency(Arc::new(GradientSaliency::default()));
        let service = ExplanationService::new(Arc::new(ctx));

        let record = service.resolve(&self.image_id)?;
        let locator = record.path().ok_or_else(|| anyhow!("图片 {} 没有记录路径", self.image_id))?;

        let explanation =
            block_in_place(|| service.explain_path(Path::new(locator), self.target_class))?;
        if explanation.fallback {
            warn!("热力图生成失败，输出为原图");
        }
        explanation.image.save(&self.output)?;
        println!("{}", self.output.display());
        Ok(())
    }
}
