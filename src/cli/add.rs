use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::task::block_in_place;

use super::{embedder, open_index};
use crate::builder::{DEFAULT_SUFFIX, IndexBuilder};
use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::index::AddOutcome;

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    /// 图片路径，目录会被递归扫描
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// 扫描目录时的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,
    /// 即使索引中已有相同内容的图片也添加
    #[arg(long)]
    pub allow_duplicates: bool,
}

impl SubCommandExtend for AddCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let index = open_index(opts)?;
        let builder = IndexBuilder::new(embedder(opts)?).suffix(&self.suffix);

        let mut files = vec![];
        for path in &self.paths {
            if path.is_dir() {
                files.extend(builder.scan(path));
            } else {
                files.push(path.clone());
            }
        }

        let added = block_in_place(|| {
            let mut added = 0;
            for file in &files {
                match builder.add_image(&index, file, self.allow_duplicates) {
                    Ok(AddOutcome::Added(id)) => {
                        added += 1;
                        println!("[OK] Add {} -> {}", file.display(), id);
                    }
                    Ok(AddOutcome::Duplicate(id)) => {
                        println!("[SKIP] {} duplicates {}", file.display(), id);
                    }
                    Err(e) => println!("[ERR] {}: {}", file.display(), e),
                }
            }
            added
        });

        // 追加不会自动保存，全部完成后统一写入一次
        if added > 0 {
            block_in_place(|| index.save())?;
        }
        Ok(())
    }
}
