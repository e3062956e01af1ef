use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::task::block_in_place;

use super::{embedder, open_index};
use crate::cli::SubCommandExtend;
use crate::config::{Opts, OutputFormat, ProviderOptions, SearchOptions};
use crate::service::{AppContext, SearchResult, SearchService};
use crate::utils;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub search: SearchOptions,
    #[command(flatten)]
    pub provider: ProviderOptions,
    /// 被搜索的图片路径
    pub image: PathBuf,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let ctx = AppContext::new(self.provider.timeout());
        ctx.set_index(Arc::new(open_index(opts)?));
        ctx.set_embedder(embedder(opts)?);
        let service = SearchService::new(Arc::new(ctx));

        let image = block_in_place(|| utils::imread(&self.image))?;
        let result = block_in_place(|| service.search(&image, self.search.k))?;

        print_result(&result, self.search.output_format)
    }
}

fn print_result(result: &[SearchResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputFormat::Table => {
            for r in result {
                println!("{:.4}\t{}\t{}", r.score, r.id, r.metadata.path().unwrap_or_default());
            }
        }
    }
    Ok(())
}
