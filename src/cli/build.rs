use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use super::embedder;
use crate::builder::{DEFAULT_SUFFIX, IndexBuilder};
use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::index::VectorIndex;

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    /// 图片所在目录，目录结构为 <分类>/<文件名>
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,
}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let index = VectorIndex::with_conf_dir(&opts.conf_dir, opts.dimension);
        let builder = IndexBuilder::new(embedder(opts)?).suffix(&self.suffix).progress(true);

        let summary = block_in_place(|| builder.build(&self.path, &index))?;
        for failure in &summary.failures {
            println!("[ERR] {}: {}", failure.path.display(), failure.reason);
        }
        println!("[OK] indexed {} images, skipped {}", summary.processed, summary.skipped());
        info!("构建索引成功");
        Ok(())
    }
}
