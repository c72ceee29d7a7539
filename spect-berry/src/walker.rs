//! 种子式 random walker 分割.
//!
//! 流程: 各向同性高斯平滑 -> 以 Otsu 阈值推导前景/背景种子 ->
//! 6-邻域图上概率扩散 -> 概率超过 0.5 的体素构成前景掩膜.

use crate::consts::mask::MASK_FOREGROUND;
use crate::filter;
use crate::threshold::{otsu_threshold, ThresholdError};
use crate::{Idx3d, SpectMask, SpectScan};
use ndarray::Array3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// random walker 分割参数.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WalkerSpec {
    /// 平滑 sigma. 非正值跳过平滑.
    pub sigma: f64,

    /// 边权系数: `w = exp(-beta * (gi - gj)^2)`, 其中 g 为归一化强度.
    pub beta: f64,

    /// 背景种子阈值与 Otsu 阈值的比例.
    pub low_ratio: f64,

    /// 概率扩散的最大迭代轮数.
    pub max_iter: usize,

    /// 收敛容限: 单轮最大概率变化低于该值时提前停止.
    pub tol: f64,
}

impl Default for WalkerSpec {
    fn default() -> Self {
        Self {
            sigma: crate::consts::DEFAULT_SMOOTH_SIGMA,
            beta: crate::consts::DEFAULT_WALKER_BETA,
            low_ratio: 0.3,
            max_iter: 500,
            tol: 1e-3,
        }
    }
}

/// 体素种子标记.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Marker {
    /// 背景种子, 概率固定为 0.
    Background,

    /// 前景种子, 概率固定为 1.
    Object,

    /// 无标记, 概率由扩散决定.
    Unlabeled,
}

/// 运行 random walker 分割, 生成与 `scan` 形状一致的二值掩膜.
///
/// 种子由 Otsu 阈值推导: 平滑强度低于 `low_ratio * otsu` 的体素为背景种子,
/// 严格高于 `otsu` 的体素为前景种子, 其余体素的归属由概率扩散决定.
/// 当强度单一无法运行 Otsu 时返回 [`ThresholdError::EmptyHistogram`].
pub fn random_walker_mask(
    scan: &SpectScan,
    spec: &WalkerSpec,
) -> Result<SpectMask, ThresholdError> {
    let smooth = filter::gaussian_smooth(scan.data(), spec.sigma);
    let t = otsu_threshold(smooth.iter().copied())?;
    let low = t * spec.low_ratio as f32;
    log::info!("walker seeds: background < {low:.2}, object > {t:.2}");

    let marker = smooth.mapv(|v| {
        if v < low {
            Marker::Background
        } else if v > t {
            Marker::Object
        } else {
            Marker::Unlabeled
        }
    });

    // 归一化强度供边权计算使用. Otsu 成功保证 hi > lo.
    let (lo, hi) = smooth
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let norm = smooth.mapv(|v| ((v - lo) / (hi - lo)) as f64);

    let prob = diffuse(&norm, &marker, spec);

    let mut mask = SpectMask::from_scan(scan);
    let fg: Vec<Idx3d> = marker
        .indexed_iter()
        .filter_map(|(pos, &m)| {
            let fg = match m {
                Marker::Object => true,
                Marker::Background => false,
                Marker::Unlabeled => prob[pos] > 0.5,
            };
            fg.then_some(pos)
        })
        .collect();
    mask.fill_batch(fg, MASK_FOREGROUND);
    Ok(mask)
}

/// 在 6-邻域图上对前景概率做 Jacobi 迭代扩散. 种子概率保持固定.
fn diffuse(norm: &Array3<f64>, marker: &Array3<Marker>, spec: &WalkerSpec) -> Array3<f64> {
    let mut prob = marker.mapv(|m| match m {
        Marker::Object => 1.0,
        Marker::Background => 0.0,
        Marker::Unlabeled => 0.5,
    });

    let unlabeled: Vec<Idx3d> = marker
        .indexed_iter()
        .filter_map(|(pos, &m)| (m == Marker::Unlabeled).then_some(pos))
        .collect();
    if unlabeled.is_empty() {
        return prob;
    }

    let dim = norm.dim();
    let mut next = prob.clone();
    for round in 0..spec.max_iter {
        let mut delta = 0.0f64;
        for &pos in unlabeled.iter() {
            let gi = norm[pos];
            let mut num = 0.0;
            let mut den = 0.0;
            for neigh in diamond_neighbours(pos, dim) {
                let gj = norm[neigh];
                let w = (-spec.beta * (gi - gj) * (gi - gj)).exp();
                num += w * prob[neigh];
                den += w;
            }
            let p = num / den;
            delta = delta.max((p - prob[pos]).abs());
            next[pos] = p;
        }
        for &pos in unlabeled.iter() {
            prob[pos] = next[pos];
        }
        if delta < spec.tol {
            log::debug!("walker converged after {} rounds", round + 1);
            break;
        }
    }
    prob
}

/// 获取 `pos` 前后上下左右六个体素的坐标.
///
/// 在数据范围外的坐标会被过滤掉, 不会包含在返回值中.
fn diamond_neighbours((z, h, w): Idx3d, (zl, hl, wl): Idx3d) -> Vec<Idx3d> {
    [
        (z.wrapping_sub(1), h, w),
        (z.saturating_add(1), h, w),
        (z, h.wrapping_sub(1), w),
        (z, h.saturating_add(1), w),
        (z, h, w.wrapping_sub(1)),
        (z, h, w.saturating_add(1)),
    ]
    .into_iter()
    .filter(|&(a, b, c)| a < zl && b < hl && c < wl)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::mask::is_foreground;
    use ndarray::Array3;

    #[test]
    fn test_walker_segments_bright_cube() {
        // 6x6x6 全零体积内嵌一个 2x2x2 的亮立方体.
        let mut data = Array3::zeros((6, 6, 6));
        for z in 2..4 {
            for h in 2..4 {
                for w in 2..4 {
                    data[(z, h, w)] = 100.0f32;
                }
            }
        }
        let scan = SpectScan::fake(data, [1.0; 3]);

        let spec = WalkerSpec {
            sigma: 0.0,
            ..Default::default()
        };
        let mask = random_walker_mask(&scan, &spec).unwrap();

        assert_eq!(mask.count_foreground(), 8);
        assert!(is_foreground(mask[(2, 2, 2)]));
        assert!(is_foreground(mask[(3, 3, 3)]));
        assert!(!is_foreground(mask[(0, 0, 0)]));
    }

    #[test]
    fn test_walker_rejects_flat_volume() {
        let scan = SpectScan::fake(Array3::zeros((3, 3, 3)), [1.0; 3]);
        let err = random_walker_mask(&scan, &WalkerSpec::default()).unwrap_err();
        assert_eq!(err, ThresholdError::EmptyHistogram);
    }

    #[test]
    fn test_diffuse_follows_intensity_edges() {
        // 一条 5 体素的线, 两端分别固定为背景/前景种子.
        // 强度在中间 (0.1 -> 0.5 -> 0.9) 形成两道陡峭的边.
        let norm = Array3::from_shape_vec((1, 1, 5), vec![0.0, 0.1, 0.5, 0.9, 1.0]).unwrap();
        let marker = Array3::from_shape_vec(
            (1, 1, 5),
            vec![
                Marker::Background,
                Marker::Unlabeled,
                Marker::Unlabeled,
                Marker::Unlabeled,
                Marker::Object,
            ],
        )
        .unwrap();

        let spec = WalkerSpec {
            max_iter: 2000,
            tol: 1e-9,
            ..Default::default()
        };
        let prob = diffuse(&norm, &marker, &spec);

        // 种子固定不动.
        assert_eq!(prob[(0, 0, 0)], 0.0);
        assert_eq!(prob[(0, 0, 4)], 1.0);

        // 靠近背景种子的体素概率低, 靠近前景种子的体素概率高,
        // 正中体素按对称性落在 0.5 附近.
        assert!(prob[(0, 0, 1)] < 0.1);
        assert!(prob[(0, 0, 3)] > 0.9);
        assert!((prob[(0, 0, 2)] - 0.5).abs() < 1e-3);
    }
}
