//! 掩膜形态学后处理流程.
//!
//! 流程严格按以下顺序执行:
//!
//! 1. 移除体素数低于门限的 26-连通分量;
//! 2. 球形结构元闭运算 (先膨胀后腐蚀);
//! 3. 可选的 z 轴半开区间约束;
//! 4. 仅保留最大 26-连通分量.

use crate::consts::mask::MASK_BACKGROUND;
use crate::SpectMask;
use std::ops::Range;

mod ball;

pub use ball::{binary_closing, binary_dilation, binary_erosion};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 后处理参数.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CleanupSpec {
    /// 体素数低于该值的 26-连通分量会被移除. 取 0 或 1 时跳过该步骤.
    pub min_size: usize,

    /// 闭运算球形结构元半径 (体素). 取 0 时跳过该步骤.
    pub closing_radius: usize,

    /// 可选的 z 轴半开区间 \[z1, z2) 约束, 区间外的切片清为背景.
    pub z_range: Option<Range<usize>>,

    /// 是否仅保留最大连通分量.
    pub largest_only: bool,
}

impl Default for CleanupSpec {
    fn default() -> Self {
        Self {
            min_size: crate::consts::DEFAULT_MIN_SIZE,
            closing_radius: crate::consts::DEFAULT_CLOSING_RADIUS,
            z_range: None,
            largest_only: true,
        }
    }
}

/// 依次运行后处理流程, 就地修改掩膜.
///
/// 当 ROI 约束后不存在任何前景体素时, 输出为全背景掩膜, 不视为错误.
/// 两个分量体素数完全相等时保留其中任意一个.
pub fn clean_mask(mask: &mut SpectMask, spec: &CleanupSpec) {
    if spec.min_size > 1 {
        remove_small_areas(mask, spec.min_size);
    }
    if spec.closing_radius > 0 {
        binary_closing(mask, spec.closing_radius);
    }
    if let Some(ref range) = spec.z_range {
        mask.clear_outside_z(range.clone());
    }
    if spec.largest_only {
        retain_largest_area(mask);
    }
}

/// 移除体素数低于 `min_size` 的 26-连通分量.
fn remove_small_areas(mask: &mut SpectMask, min_size: usize) {
    let areas = mask.areas_26();
    for area in areas.into_iter().filter(|a| a.len() < min_size) {
        mask.fill_batch(area, MASK_BACKGROUND);
    }
}

/// 仅保留体素数最大的 26-连通分量. 无前景时保持原样.
fn retain_largest_area(mask: &mut SpectMask) {
    let mut areas = mask.areas_26();
    if areas.len() < 2 {
        return;
    }
    let largest = areas
        .iter()
        .enumerate()
        .max_by_key(|(_, a)| a.len())
        .map(|(i, _)| i)
        .unwrap();
    areas.swap_remove(largest);
    for area in areas {
        mask.fill_batch(area, MASK_BACKGROUND);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::mask::MASK_FOREGROUND;
    use ndarray::Array3;

    /// 两个互不相邻的分量: z = 0 上 2x5 = 10 体素, z = 2 上 5x10 = 50 体素.
    fn two_component_mask() -> SpectMask {
        let mut data = Array3::zeros((3, 10, 10));
        for h in 0..2 {
            for w in 0..5 {
                data[(0, h, w)] = MASK_FOREGROUND;
            }
        }
        for h in 0..5 {
            for w in 0..10 {
                data[(2, h, w)] = MASK_FOREGROUND;
            }
        }
        SpectMask::fake(data, [1.0; 3])
    }

    #[test]
    fn test_largest_component_wins() {
        let mut mask = two_component_mask();
        clean_mask(
            &mut mask,
            &CleanupSpec {
                min_size: 5,
                closing_radius: 0,
                z_range: None,
                largest_only: true,
            },
        );
        assert_eq!(mask.count_foreground(), 50);
        assert_eq!(mask[(2, 0, 0)], MASK_FOREGROUND);
        assert_eq!(mask[(0, 0, 0)], MASK_BACKGROUND);
    }

    #[test]
    fn test_min_size_removes_both() {
        let mut mask = two_component_mask();
        clean_mask(
            &mut mask,
            &CleanupSpec {
                min_size: 100,
                closing_radius: 0,
                z_range: None,
                largest_only: true,
            },
        );
        assert_eq!(mask.count_foreground(), 0);
    }

    #[test]
    fn test_roi_then_empty_is_not_an_error() {
        let mut mask = two_component_mask();
        clean_mask(
            &mut mask,
            &CleanupSpec {
                min_size: 0,
                closing_radius: 0,
                z_range: Some(1..2),
                largest_only: true,
            },
        );
        assert_eq!(mask.count_foreground(), 0);
    }

    #[test]
    fn test_roi_keeps_in_range_slices() {
        let mut mask = two_component_mask();
        clean_mask(
            &mut mask,
            &CleanupSpec {
                min_size: 0,
                closing_radius: 0,
                z_range: Some(2..3),
                largest_only: false,
            },
        );
        assert_eq!(mask.count_foreground(), 50);
    }

    #[test]
    fn test_output_has_at_most_one_component() {
        let mut mask = two_component_mask();
        clean_mask(
            &mut mask,
            &CleanupSpec {
                min_size: 0,
                closing_radius: 1,
                z_range: None,
                largest_only: true,
            },
        );
        assert!(mask.areas_26().len() <= 1);
        assert!(mask.count_foreground() > 0);
    }

    #[test]
    fn test_closing_fills_hole() {
        let mut data = Array3::from_elem((5, 5, 5), MASK_FOREGROUND);
        data[(2, 2, 2)] = MASK_BACKGROUND;
        let mut mask = SpectMask::fake(data, [1.0; 3]);

        clean_mask(
            &mut mask,
            &CleanupSpec {
                min_size: 0,
                closing_radius: 1,
                z_range: None,
                largest_only: true,
            },
        );
        assert_eq!(mask[(2, 2, 2)], MASK_FOREGROUND);
        assert_eq!(mask.count_foreground(), 5 * 5 * 5);
    }
}
