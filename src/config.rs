use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;

/// 参考部署中 ResNet50 特征向量的维度
pub const DEFAULT_DIMENSION: usize = 2048;

static CONF_DIR: LazyLock<String> = LazyLock::new(|| {
    ProjectDirs::from("", "visearch", "visearch")
        .map(|dirs| dirs.config_dir().to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_owned())
});

fn default_config_dir() -> &'static str {
    CONF_DIR.as_str()
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 返回的结果数量
    #[arg(short, value_name = "K", default_value_t = 5)]
    pub k: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

#[derive(Parser, Debug, Clone)]
pub struct ProviderOptions {
    /// 单次模型调用的超时时间，单位为毫秒
    #[arg(long, value_name = "MS", default_value_t = 30000)]
    pub provider_timeout_ms: u64,
}

impl ProviderOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "visearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 索引文件所在目录
    #[arg(short, long, global = true, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
    /// 特征向量维度，必须为 32 的倍数
    #[arg(short, long, global = true, default_value_t = DEFAULT_DIMENSION, value_parser = parse_dimension)]
    pub dimension: usize,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 从图片目录重新构建索引
    Build(BuildCommand),
    /// 追加图片到现有索引
    Add(AddCommand),
    /// 从索引中搜索相似图片
    Search(SearchCommand),
    /// 为索引中的图片生成热力图解释
    Explain(ExplainCommand),
    /// 显示索引信息
    Info(InfoCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回向量文件的路径
    pub fn vector_index(&self) -> PathBuf {
        self.path.join("vector_index.bin")
    }

    /// 返回元数据文件的路径
    pub fn metadata(&self) -> PathBuf {
        self.path.join("metadata.json")
    }

    /// 返回上传图片的保存目录
    pub fn images(&self) -> PathBuf {
        self.path.join("images")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

fn parse_dimension(s: &str) -> anyhow::Result<usize> {
    let dimension: usize = s.parse()?;
    if dimension == 0 || dimension % 32 != 0 {
        return Err(anyhow::anyhow!("维度必须为 32 的正整数倍: {}", dimension));
    }
    Ok(dimension)
}
