mod add;
mod build;
mod explain;
mod info;
mod search;
pub mod server;

use std::sync::Arc;

pub use add::*;
pub use build::*;
pub use explain::*;
pub use info::*;
pub use search::*;
pub use server::*;
use tokio::task::block_in_place;

use crate::config::Opts;
use crate::embedding::{EmbeddingProvider, ThumbnailEmbedder};
use crate::index::VectorIndex;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 打开配置目录中的索引，文件不存在时为空索引
fn open_index(opts: &Opts) -> anyhow::Result<VectorIndex> {
    let index = VectorIndex::with_conf_dir(&opts.conf_dir, opts.dimension);
    block_in_place(|| index.load())?;
    Ok(index)
}

fn embedder(opts: &Opts) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    Ok(Arc::new(ThumbnailEmbedder::new(opts.dimension)?))
}
