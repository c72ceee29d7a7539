use clap::{Args, ValueEnum};
use spect_berry::consts;
use spect_berry::post_proc::{clean_mask, CleanupSpec};
use spect_berry::threshold::{LocalThresholdSpec, OtsuRegion, ThresholdMethod};
use spect_berry::walker::{random_walker_mask, WalkerSpec};
use spect_berry::{NiftiHeaderAttr, SpectScan};
use std::error::Error;
use std::ops::Range;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct Segment {
    /// 输入 SPECT 体积 (.nii / .nii.gz).
    #[arg(short, long)]
    input: PathBuf,

    /// 输出掩膜路径. 仅在整条流水线成功后写出.
    #[arg(short, long)]
    output: PathBuf,

    /// 分割方法.
    #[arg(short, long, value_enum)]
    method: MethodKind,

    /// 固定阈值 (method = fixed). 缺省时以中间切片平均强度作为阈值.
    #[arg(long)]
    value: Option<f32>,

    /// 将 Otsu 统计区域限定为中间水平切片 (method = otsu).
    #[arg(long)]
    mid_slice: bool,

    /// 正强度百分位数, 位于 [0, 100] (method = percentile).
    #[arg(long, default_value_t = consts::COMMON_PERCENTILES[1])]
    percentile: f64,

    /// 局部阈值邻域边长, 必须为大于 1 的奇数 (method = adaptive).
    #[arg(long, default_value_t = consts::DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// 局部阈值偏移量 (method = adaptive).
    #[arg(long, default_value_t = consts::DEFAULT_LOCAL_OFFSET)]
    offset: f32,

    /// 高斯平滑 sigma (method = adaptive / walker).
    #[arg(long, default_value_t = consts::DEFAULT_SMOOTH_SIGMA)]
    sigma: f64,

    /// random walker 边权 beta (method = walker).
    #[arg(long, default_value_t = consts::DEFAULT_WALKER_BETA)]
    beta: f64,

    /// 后处理: 小连通分量移除门限 (体素数).
    #[arg(long, default_value_t = consts::DEFAULT_MIN_SIZE)]
    min_size: usize,

    /// 后处理: 闭运算球形结构元半径 (体素).
    #[arg(long, default_value_t = consts::DEFAULT_CLOSING_RADIUS)]
    closing_radius: usize,

    /// 后处理: z 轴半开区间约束, 格式 `z1:z2`.
    #[arg(long, value_parser = parse_z_range)]
    roi: Option<Range<usize>>,

    /// 后处理: 保留全部连通分量, 跳过最大分量选取.
    #[arg(long)]
    keep_all: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MethodKind {
    /// 全局固定阈值.
    Fixed,
    /// Otsu 全局阈值.
    Otsu,
    /// 正强度百分位数阈值.
    Percentile,
    /// 逐切片自适应局部阈值.
    Adaptive,
    /// 种子式 random walker.
    Walker,
}

/// 解析 `z1:z2` 格式的半开区间.
fn parse_z_range(s: &str) -> Result<Range<usize>, String> {
    let (a, b) = s
        .split_once(':')
        .ok_or_else(|| "期望 `z1:z2` 格式".to_string())?;
    let z1: usize = a
        .trim()
        .parse()
        .map_err(|_| format!("无效的切片索引 `{a}`"))?;
    let z2: usize = b
        .trim()
        .parse()
        .map_err(|_| format!("无效的切片索引 `{b}`"))?;
    if z1 >= z2 {
        return Err(format!("空区间 [{z1}, {z2})"));
    }
    Ok(z1..z2)
}

impl Segment {
    pub fn run(&self) -> Result<(), Box<dyn Error>> {
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(format!("百分位数 {} 超出 [0, 100]", self.percentile).into());
        }

        let scan = SpectScan::open(&self.input)?;
        log::info!(
            "loaded {} ({:?}, voxel {:.3} mm^3)",
            self.input.display(),
            scan.shape(),
            scan.voxel_mm3()
        );

        let mut mask = match self.method {
            MethodKind::Fixed => match self.value {
                Some(v) => ThresholdMethod::Fixed(v).run(&scan)?,
                None => ThresholdMethod::MidSliceMean.run(&scan)?,
            },
            MethodKind::Otsu => {
                let region = if self.mid_slice {
                    OtsuRegion::MidSlice
                } else {
                    OtsuRegion::Full
                };
                ThresholdMethod::Otsu(region).run(&scan)?
            }
            MethodKind::Percentile => ThresholdMethod::Percentile(self.percentile).run(&scan)?,
            MethodKind::Adaptive => ThresholdMethod::AdaptiveLocal(LocalThresholdSpec {
                block_size: self.block_size,
                offset: self.offset,
                sigma: self.sigma,
            })
            .run(&scan)?,
            MethodKind::Walker => random_walker_mask(
                &scan,
                &WalkerSpec {
                    sigma: self.sigma,
                    beta: self.beta,
                    ..Default::default()
                },
            )?,
        };

        clean_mask(
            &mut mask,
            &CleanupSpec {
                min_size: self.min_size,
                closing_radius: self.closing_radius,
                z_range: self.roi.clone(),
                largest_only: !self.keep_all,
            },
        );

        // 全部计算成功后才写出文件.
        mask.save(&self.output)?;
        println!(
            "Mask saved to {} ({} foreground voxels)",
            self.output.display(),
            mask.count_foreground()
        );
        Ok(())
    }
}
