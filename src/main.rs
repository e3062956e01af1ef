use clap::Parser;
use visearch::Opts;
use visearch::cli::SubCommandExtend;
use visearch::config::SubCommand;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Build(config) => config.run(&opts).await,
        SubCommand::Add(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::Explain(config) => config.run(&opts).await,
        SubCommand::Info(config) => config.run(&opts).await,
        SubCommand::Server(config) => config.run(&opts).await,
    }
}
