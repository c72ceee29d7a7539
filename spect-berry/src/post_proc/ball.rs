//! 球形结构元与二值形态学基础操作.

use crate::consts::mask::{is_foreground, MASK_BACKGROUND, MASK_FOREGROUND};
use crate::SpectMask;
use ndarray::{Array3, ArrayView3};

/// 半径为 `radius` 的球形结构元偏移量集合:
/// 所有满足 `dz^2 + dh^2 + dw^2 <= r^2` 的整数偏移 (含零偏移).
fn ball_offsets(radius: usize) -> Vec<(isize, isize, isize)> {
    let r = radius as isize;
    let r2 = r * r;
    let mut offs = Vec::new();
    for dz in -r..=r {
        for dh in -r..=r {
            for dw in -r..=r {
                if dz * dz + dh * dh + dw * dw <= r2 {
                    offs.push((dz, dh, dw));
                }
            }
        }
    }
    offs
}

/// 以球形结构元对二值数据做膨胀. 输出前景统一为 [`MASK_FOREGROUND`].
pub fn binary_dilation(data: ArrayView3<'_, u8>, radius: usize) -> Array3<u8> {
    let offs = ball_offsets(radius);
    let (zl, hl, wl) = data.dim();
    let mut out = Array3::from_elem(data.raw_dim(), MASK_BACKGROUND);

    for ((z, h, w), &pix) in data.indexed_iter() {
        if !is_foreground(pix) {
            continue;
        }
        for &(dz, dh, dw) in offs.iter() {
            let (Some(z1), Some(h1), Some(w1)) = (
                z.checked_add_signed(dz),
                h.checked_add_signed(dh),
                w.checked_add_signed(dw),
            ) else {
                continue;
            };
            if z1 < zl && h1 < hl && w1 < wl {
                out[(z1, h1, w1)] = MASK_FOREGROUND;
            }
        }
    }
    out
}

/// 以球形结构元对二值数据做腐蚀. 输出前景统一为 [`MASK_FOREGROUND`].
///
/// 越界邻域视为前景, 因此闭运算不会蚕食体积边界.
pub fn binary_erosion(data: ArrayView3<'_, u8>, radius: usize) -> Array3<u8> {
    let offs = ball_offsets(radius);
    let (zl, hl, wl) = data.dim();
    let mut out = Array3::from_elem(data.raw_dim(), MASK_BACKGROUND);

    for ((z, h, w), &pix) in data.indexed_iter() {
        if !is_foreground(pix) {
            continue;
        }
        let survives = offs.iter().all(|&(dz, dh, dw)| {
            let (Some(z1), Some(h1), Some(w1)) = (
                z.checked_add_signed(dz),
                h.checked_add_signed(dh),
                w.checked_add_signed(dw),
            ) else {
                return true;
            };
            if z1 < zl && h1 < hl && w1 < wl {
                is_foreground(data[(z1, h1, w1)])
            } else {
                true
            }
        });
        if survives {
            out[(z, h, w)] = MASK_FOREGROUND;
        }
    }
    out
}

/// 闭运算: 先膨胀后腐蚀, 就地写回掩膜.
///
/// 用于填补小空洞与弥合窄缝, 对结构良好的区域不产生净增长.
pub fn binary_closing(mask: &mut SpectMask, radius: usize) {
    let dilated = binary_dilation(mask.data(), radius);
    let closed = binary_erosion(dilated.view(), radius);
    mask.data_mut().assign(&closed);
}
