use clap::{Parser, Subcommand};
use std::error::Error;

#[derive(Parser, Debug)]
#[command(name = "segtool")]
#[command(about = "3D SPECT 肿瘤扫描的阈值分割与对比工具集.")]
#[command(version, long_about = None)]
pub struct Cli {
    /// 子命令.
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    pub fn run_program(&self) -> Result<(), Box<dyn Error>> {
        match self.command {
            Commands::Segment(ref v) => v.run(),
            Commands::Compare(ref v) => v.run(),
            Commands::Inspect(ref v) => v.run(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 对 SPECT 体积运行一种分割方法, 后处理并保存二值掩膜.
    Segment(crate::subcmd_impls::segment::Segment),
    /// 对多个命名掩膜计算量化指标与两两 Dice 相似度.
    Compare(crate::subcmd_impls::compare::Compare),
    /// 在单张水平切片上调试自适应阈值参数.
    Inspect(crate::subcmd_impls::inspect::Inspect),
}
