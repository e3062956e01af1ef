use anyhow::Result;
use clap::Parser;

use super::open_index;
use crate::cli::SubCommandExtend;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct InfoCommand {}

impl SubCommandExtend for InfoCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let index = open_index(opts)?;
        println!("vectors   : {}", index.vector_path().display());
        println!("metadata  : {}", index.metadata_path().display());
        println!("dimension : {}", index.dimension());
        println!("items     : {}", index.len());
        for (class, count) in index.class_counts() {
            println!("  {class}\t{count}");
        }
        Ok(())
    }
}
