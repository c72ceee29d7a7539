//! 逐切片自适应局部均值阈值.

use super::{LocalThresholdSpec, ThresholdError};
use crate::consts::mask::MASK_FOREGROUND;
use crate::filter;
use crate::{MaskSliceMut, SpectMask, SpectScan};
use ndarray::{Array2, ArrayView2, Axis};

/// 运行完整的自适应阈值流程.
///
/// 体积先做各向同性高斯平滑, 然后逐水平切片独立计算局部均值阈值掩膜,
/// 按原切片顺序装配, 切片之间不共享任何状态.
pub(super) fn adaptive_mask(
    scan: &SpectScan,
    spec: &LocalThresholdSpec,
) -> Result<SpectMask, ThresholdError> {
    // 任何计算开始前先行校验邻域参数.
    if spec.block_size < 3 || spec.block_size % 2 == 0 {
        return Err(ThresholdError::InvalidBlockSize(spec.block_size));
    }

    let smooth = filter::gaussian_smooth(scan.data(), spec.sigma);
    let mut mask = SpectMask::from_scan(scan);

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            mask.par_for_each_indexed_slice_mut(|z, sli| {
                fill_slice_mask(smooth.index_axis(Axis(0), z), spec, sli);
            });
        } else {
            for (z, sli) in mask.slice_iter_mut().enumerate() {
                fill_slice_mask(smooth.index_axis(Axis(0), z), spec, sli);
            }
        }
    }
    Ok(mask)
}

/// 将单张切片的局部阈值掩膜写入 `dst`.
fn fill_slice_mask(src: ArrayView2<'_, f32>, spec: &LocalThresholdSpec, mut dst: MaskSliceMut) {
    let sli = local_threshold_slice(src, spec.block_size, spec.offset);
    dst.array_view_mut().assign(&sli);
}

/// 单切片纯函数: 计算局部均值阈值掩膜.
///
/// 阈值图为局部均值减去 `offset`, 掩膜前景为强度 **严格大于**
/// 阈值图的像素 (取值 [`MASK_FOREGROUND`]). `block_size` 必须为大于 1
/// 的奇数, 否则程序 panic (完整流程会在计算前返回错误).
pub fn local_threshold_slice(
    src: ArrayView2<'_, f32>,
    block_size: usize,
    offset: f32,
) -> Array2<u8> {
    assert!(
        block_size >= 3 && block_size % 2 == 1,
        "邻域边长必须为大于 1 的奇数"
    );

    let thresh = local_mean_map(src, block_size);
    let mut out = Array2::zeros(src.raw_dim());
    for ((h, w), &v) in src.indexed_iter() {
        if (v as f64) > thresh[(h, w)] - offset as f64 {
            out[(h, w)] = MASK_FOREGROUND;
        }
    }
    out
}

/// 计算切片的局部均值图.
///
/// 每个像素的值为以其为中心的 `block_size` x `block_size`
/// 邻域内强度的平均值, 邻域在切片边界处按实际覆盖范围截断.
/// 内部以积分图实现, 整体复杂度与邻域边长无关.
pub fn local_mean_map(src: ArrayView2<'_, f32>, block_size: usize) -> Array2<f64> {
    let (hl, wl) = src.dim();

    // 积分图比原图多一行一列.
    let mut integral = Array2::<f64>::zeros((hl + 1, wl + 1));
    for ((h, w), &v) in src.indexed_iter() {
        integral[(h + 1, w + 1)] =
            v as f64 + integral[(h, w + 1)] + integral[(h + 1, w)] - integral[(h, w)];
    }

    let r = block_size / 2;
    Array2::from_shape_fn((hl, wl), |(h, w)| {
        let h0 = h.saturating_sub(r);
        let w0 = w.saturating_sub(r);
        let h1 = (h + r + 1).min(hl);
        let w1 = (w + r + 1).min(wl);
        let sum =
            integral[(h1, w1)] - integral[(h0, w1)] - integral[(h1, w0)] + integral[(h0, w0)];
        sum / ((h1 - h0) * (w1 - w0)) as f64
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::ThresholdMethod;
    use ndarray::Array3;

    #[test]
    fn test_block_size_validation() {
        let scan = SpectScan::fake(Array3::zeros((2, 4, 4)), [1.0; 3]);
        for bs in [0, 1, 2, 4, 50] {
            let err = ThresholdMethod::AdaptiveLocal(LocalThresholdSpec {
                block_size: bs,
                offset: 0.0,
                sigma: 0.0,
            })
            .run(&scan)
            .unwrap_err();
            assert_eq!(err, ThresholdError::InvalidBlockSize(bs));
        }
    }

    #[test]
    fn test_local_mean_map_uniform() {
        let src = Array2::from_elem((6, 6), 3.0f32);
        let mean = local_mean_map(src.view(), 3);
        assert!(mean.iter().all(|&m| (m - 3.0).abs() < 1e-9));
    }

    #[test]
    fn test_local_threshold_slice_uniform_is_empty() {
        // 均匀切片上强度与局部均值处处相等, 严格大于不成立.
        let src = Array2::from_elem((5, 5), 7.0f32);
        let mask = local_threshold_slice(src.view(), 3, 0.0);
        assert!(mask.iter().all(|&p| p == 0));

        // 负偏移使阈值图低于强度, 掩膜变为全前景.
        let mask = local_threshold_slice(src.view(), 3, -1.0);
        assert!(mask.iter().all(|&p| p == MASK_FOREGROUND));
    }

    #[test]
    fn test_local_threshold_slice_bright_pixel() {
        let mut src = Array2::zeros((9, 9));
        src[(4, 4)] = 10.0f32;
        let mask = local_threshold_slice(src.view(), 3, 0.0);

        // 亮点自身超过其邻域均值, 周围像素不超过.
        assert_eq!(mask[(4, 4)], MASK_FOREGROUND);
        assert_eq!(mask.iter().filter(|&&p| p == MASK_FOREGROUND).count(), 1);
    }

    #[test]
    fn test_adaptive_slices_are_independent() {
        // 两张切片各有一个亮点, 结果互不干扰.
        let mut data = Array3::zeros((2, 9, 9));
        data[(0, 2, 2)] = 10.0;
        data[(1, 6, 6)] = 10.0;
        let scan = SpectScan::fake(data, [1.0; 3]);

        let mask = ThresholdMethod::AdaptiveLocal(LocalThresholdSpec {
            block_size: 3,
            offset: 0.0,
            sigma: 0.0,
        })
        .run(&scan)
        .unwrap();

        assert_eq!(mask[(0, 2, 2)], MASK_FOREGROUND);
        assert_eq!(mask[(1, 6, 6)], MASK_FOREGROUND);
        assert_eq!(mask.count_foreground(), 2);
    }
}
