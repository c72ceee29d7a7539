//! 阈值引擎.
//!
//! 每种方法从扫描强度出发计算一个全局或逐切片的分割门限,
//! 输出与源扫描形状一致的二值掩膜. 所有强度比较均为 **严格大于**.

use crate::consts::mask::MASK_FOREGROUND;
use crate::{NiftiHeaderAttr, SpectMask, SpectScan};
use ndarray::Zip;
use ordered_float::OrderedFloat;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod local;

pub use local::{local_mean_map, local_threshold_slice};

/// 阈值方法运行时错误.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThresholdError {
    /// 选定统计区域强度单一, 无法构建有效直方图.
    EmptyHistogram,

    /// 体积中不存在严格为正的体素, 百分位数无意义.
    EmptyForeground,

    /// 自适应局部阈值的邻域边长必须为大于 1 的奇数.
    InvalidBlockSize(usize),
}

impl fmt::Display for ThresholdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdError::EmptyHistogram => {
                write!(f, "选定统计区域强度单一, 无法计算 Otsu 阈值")
            }
            ThresholdError::EmptyForeground => {
                write!(f, "体积中不存在严格为正的体素, 无法计算百分位数阈值")
            }
            ThresholdError::InvalidBlockSize(bs) => {
                write!(f, "邻域边长 {bs} 无效, 必须为大于 1 的奇数")
            }
        }
    }
}

impl std::error::Error for ThresholdError {}

/// Otsu 阈值的统计区域.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OtsuRegion {
    /// 整个 3D 体积.
    Full,

    /// 仅中间水平切片.
    MidSlice,
}

/// 逐切片自适应局部阈值参数.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LocalThresholdSpec {
    /// 局部均值邻域边长 (体素). 必须为大于 1 的奇数.
    pub block_size: usize,

    /// 从局部均值中减去的偏移量.
    pub offset: f32,

    /// 阈值计算前的各向同性高斯平滑 sigma. 非正值跳过平滑.
    pub sigma: f64,
}

impl Default for LocalThresholdSpec {
    fn default() -> Self {
        Self {
            block_size: crate::consts::DEFAULT_BLOCK_SIZE,
            offset: crate::consts::DEFAULT_LOCAL_OFFSET,
            sigma: crate::consts::DEFAULT_SMOOTH_SIGMA,
        }
    }
}

/// 阈值方法.
///
/// 同一个引擎覆盖了历史脚本中互相冲突的若干 `fixed_threshold` 变体:
/// 字面常量阈值与中间切片均值阈值分别对应 [`Self::Fixed`] 和
/// [`Self::MidSliceMean`] 两个显式配置, 不做任何隐式推断.
#[derive(Copy, Clone, Debug)]
pub enum ThresholdMethod {
    /// 全局固定阈值.
    Fixed(f32),

    /// 以中间水平切片的平均强度作为全局阈值.
    MidSliceMean,

    /// 在给定区域上以 Otsu 法计算全局阈值.
    Otsu(OtsuRegion),

    /// 以严格正强度的第 p 百分位数作为全局阈值. p 必须位于 \[0, 100\].
    Percentile(f64),

    /// 高斯平滑后逐切片计算局部均值阈值.
    AdaptiveLocal(LocalThresholdSpec),
}

impl ThresholdMethod {
    /// 运行阈值引擎, 生成与 `scan` 形状一致的二值掩膜.
    ///
    /// 全局方法的阈值取值会以 `info` 级别日志输出.
    pub fn run(&self, scan: &SpectScan) -> Result<SpectMask, ThresholdError> {
        match *self {
            ThresholdMethod::Fixed(value) => {
                log::info!("fixed threshold: {value:.2}");
                Ok(global_mask(scan, value))
            }
            ThresholdMethod::MidSliceMean => {
                let mid = scan.len_z() / 2;
                let t = scan.slice_at(mid).mean() as f32;
                log::info!("mid-slice ({mid}) mean threshold: {t:.2}");
                Ok(global_mask(scan, t))
            }
            ThresholdMethod::Otsu(region) => {
                let t = match region {
                    OtsuRegion::Full => otsu_threshold(scan.data().iter().copied())?,
                    OtsuRegion::MidSlice => {
                        let sli = scan.slice_at(scan.len_z() / 2);
                        otsu_threshold(sli.iter().copied())?
                    }
                };
                log::info!("otsu threshold: {t:.2}");
                Ok(global_mask(scan, t))
            }
            ThresholdMethod::Percentile(p) => {
                let t = percentile_threshold(scan, p)?;
                log::info!("{p} percentile threshold: {t:.2}");
                Ok(global_mask(scan, t))
            }
            ThresholdMethod::AdaptiveLocal(ref spec) => local::adaptive_mask(scan, spec),
        }
    }
}

/// 对整个体积应用全局阈值. 前景为强度 **严格大于** `thresh` 的体素.
fn global_mask(scan: &SpectScan, thresh: f32) -> SpectMask {
    let mut mask = SpectMask::from_scan(scan);
    Zip::from(mask.data_mut())
        .and(scan.data())
        .for_each(|m, &v| {
            if v > thresh {
                *m = MASK_FOREGROUND;
            }
        });
    mask
}

/// 在给定强度集合上以 Otsu 法计算最优分割阈值.
///
/// 直方图固定为 256 个 bin, 返回类间方差最大 bin 的中心值;
/// 非有限强度不参与统计. 当集合为空或所有强度相同时返回
/// [`ThresholdError::EmptyHistogram`].
pub fn otsu_threshold<I: IntoIterator<Item = f32>>(it: I) -> Result<f32, ThresholdError> {
    const BINS: usize = 256;

    let data: Vec<f32> = it.into_iter().filter(|v| v.is_finite()).collect();
    let (lo, hi) = data
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !(hi > lo) {
        return Err(ThresholdError::EmptyHistogram);
    }

    let width = (hi - lo) as f64 / BINS as f64;
    let mut hist = [0u64; BINS];
    for &v in data.iter() {
        let bin = (((v - lo) as f64 / width) as usize).min(BINS - 1);
        hist[bin] += 1;
    }

    let total = data.len() as f64;
    let sum_total: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut sum_b = 0.0;
    let mut w_b = 0.0;
    let mut best_var = -1.0;
    let mut best_bin = 0usize;
    for (t, &c) in hist.iter().enumerate() {
        w_b += c as f64;
        if w_b == 0.0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f == 0.0 {
            break;
        }
        sum_b += t as f64 * c as f64;
        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;

        // 类间方差
        let var = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var > best_var {
            best_var = var;
            best_bin = t;
        }
    }
    Ok(lo + ((best_bin as f64 + 0.5) * width) as f32)
}

/// 以严格正强度的第 `p` 百分位数作为阈值. 分位点按线性插值计算.
///
/// `p` 必须位于 \[0, 100\], 否则程序 panic. 当不存在严格为正的体素时返回
/// [`ThresholdError::EmptyForeground`].
pub fn percentile_threshold(scan: &SpectScan, p: f64) -> Result<f32, ThresholdError> {
    assert!((0.0..=100.0).contains(&p), "百分位数必须位于 [0, 100]");

    let view = scan.data();
    let mut positives: Vec<OrderedFloat<f32>> = view
        .iter()
        .filter(|v| **v > 0.0)
        .map(|&v| OrderedFloat(v))
        .collect();
    if positives.is_empty() {
        return Err(ThresholdError::EmptyForeground);
    }
    positives.sort_unstable();

    let rank = p / 100.0 * (positives.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    let val = positives[lo].0 as f64 * (1.0 - frac) + positives[hi].0 as f64 * frac;
    Ok(val as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn zero_scan(dim: crate::Idx3d) -> SpectScan {
        SpectScan::fake(Array3::zeros(dim), [1.0; 3])
    }

    #[test]
    fn test_fixed_threshold_is_strict() {
        // 全零体积上阈值取 0 时, 掩膜必须为全背景 (严格大于).
        let scan = zero_scan((4, 4, 4));
        let mask = ThresholdMethod::Fixed(0.0).run(&scan).unwrap();
        assert_eq!(mask.count_foreground(), 0);
    }

    #[test]
    fn test_fixed_threshold_subset() {
        let mut data = Array3::zeros((2, 3, 3));
        data[(0, 1, 1)] = 5.0;
        data[(1, 2, 2)] = 2.0;
        let scan = SpectScan::fake(data, [1.0; 3]);

        let mask = ThresholdMethod::Fixed(2.0).run(&scan).unwrap();
        assert_eq!(mask.count_foreground(), 1);
        assert_eq!(mask[(0, 1, 1)], MASK_FOREGROUND);
    }

    #[test]
    fn test_mid_slice_mean_threshold() {
        // 中间切片 (z = 1) 均值为 4.0.
        let mut data = Array3::zeros((3, 2, 2));
        data.index_axis_mut(ndarray::Axis(0), 1).fill(4.0);
        data[(2, 0, 0)] = 10.0;
        let scan = SpectScan::fake(data, [1.0; 3]);

        let mask = ThresholdMethod::MidSliceMean.run(&scan).unwrap();
        assert_eq!(mask.count_foreground(), 1);
        assert_eq!(mask[(2, 0, 0)], MASK_FOREGROUND);
    }

    #[test]
    fn test_otsu_single_valued_fails() {
        let scan = zero_scan((3, 3, 3));
        let err = ThresholdMethod::Otsu(OtsuRegion::Full).run(&scan).unwrap_err();
        assert_eq!(err, ThresholdError::EmptyHistogram);

        let err = ThresholdMethod::Otsu(OtsuRegion::MidSlice)
            .run(&scan)
            .unwrap_err();
        assert_eq!(err, ThresholdError::EmptyHistogram);
    }

    #[test]
    fn test_otsu_bimodal() {
        let mut samples = Vec::new();
        for i in 0..100 {
            samples.push(0.1 + 0.2 * (i as f32 / 100.0));
            samples.push(0.7 + 0.2 * (i as f32 / 100.0));
        }
        let t = otsu_threshold(samples).unwrap();
        assert!(t > 0.2 && t < 0.8, "阈值 {t} 应落在两簇之间");
    }

    #[test]
    fn test_otsu_separates_volume() {
        let mut data = Array3::zeros((4, 4, 4));
        for pos in [(1, 1, 1), (1, 1, 2), (2, 2, 2)] {
            data[pos] = 100.0;
        }
        let scan = SpectScan::fake(data, [1.0; 3]);
        let mask = ThresholdMethod::Otsu(OtsuRegion::Full).run(&scan).unwrap();
        assert_eq!(mask.count_foreground(), 3);
    }

    #[test]
    fn test_percentile_threshold_value() {
        // 正强度为 1..=100, 第 90 百分位数的线性插值为 90.1.
        let data = Array3::from_shape_fn((1, 10, 10), |(_, h, w)| (h * 10 + w + 1) as f32);
        let scan = SpectScan::fake(data, [1.0; 3]);

        let t = percentile_threshold(&scan, 90.0).unwrap();
        assert!((t - 90.1).abs() < 1e-4);

        let mask = ThresholdMethod::Percentile(90.0).run(&scan).unwrap();
        // 91..=100 共 10 个体素严格大于阈值.
        assert_eq!(mask.count_foreground(), 10);
    }

    #[test]
    fn test_percentile_requires_positive() {
        let scan = zero_scan((2, 2, 2));
        let err = ThresholdMethod::Percentile(95.0).run(&scan).unwrap_err();
        assert_eq!(err, ThresholdError::EmptyForeground);
    }

    #[test]
    fn test_percentile_extremes() {
        let mut data = Array3::zeros((1, 2, 2));
        data[(0, 0, 0)] = 1.0;
        data[(0, 0, 1)] = 3.0;
        let scan = SpectScan::fake(data, [1.0; 3]);

        assert!((percentile_threshold(&scan, 0.0).unwrap() - 1.0).abs() < 1e-6);
        assert!((percentile_threshold(&scan, 100.0).unwrap() - 3.0).abs() < 1e-6);
        assert!((percentile_threshold(&scan, 50.0).unwrap() - 2.0).abs() < 1e-6);
    }
}
