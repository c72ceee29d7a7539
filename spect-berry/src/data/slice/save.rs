//! 切片的持久化存储.

use super::{MaskSlice, MaskSliceMut, ScanSlice};
use crate::consts::mask::{is_foreground, BLACK, WHITE};
use image::ImageResult;
use std::path::Path;

/// 表明一个可以通过 **可视化友好** 模式持久化存储的图像对象.
///
/// `ImgWriteVis` trait 的意图是, 图像将以 "可视化友好"
/// 的方式保存, 而不是 "as is" 的方式. 这意味着, 掩膜切片在保存时会映射到
/// 肉眼较易区分的黑白形式; 扫描切片会按 min-max 归一化到 8-bit 灰度.
pub trait ImgWriteVis {
    /// 按照一定的可视化规则将图片保存到 `path` 路径.
    fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()>;
}

/// 使体素更有利于单通道可视化.
#[inline]
fn pretty(pix: u8) -> u8 {
    if is_foreground(pix) {
        WHITE
    } else {
        BLACK
    }
}

macro_rules! impl_mask_vis {
    ($($slice: ty),+) => {
        $(
            /// 会将背景/前景体素分别映射为黑色/白色.
            impl ImgWriteVis for $slice {
                fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
                    let (height, width) = self.shape();
                    let mut buf = image::GrayImage::new(width as u32, height as u32);
                    for ((h, w), &pix) in self.indexed_iter() {
                        buf.put_pixel(w as u32, h as u32, image::Luma([pretty(pix)]));
                    }
                    buf.save(path)
                }
            }
        )+
    };
}

macro_rules! impl_scan_vis {
    ($($scan: ty),+) => {
        $(
            /// 以 min-max 归一化映射到 8-bit 灰度.
            impl ImgWriteVis for $scan {
                fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
                    let (height, width) = self.shape();
                    let (lo, hi) = self
                        .iter()
                        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                            (lo.min(v), hi.max(v))
                        });
                    let span = if hi > lo { hi - lo } else { 1.0 };
                    let mut buf = image::GrayImage::new(width as u32, height as u32);
                    for ((h, w), &v) in self.indexed_iter() {
                        let gray = ((v - lo) / span * 255.0) as u8;
                        buf.put_pixel(w as u32, h as u32, image::Luma([gray]));
                    }
                    buf.save(path)
                }
            }
        )+
    };
}

impl_mask_vis!(MaskSlice<'_>, MaskSliceMut<'_>);
impl_scan_vis!(ScanSlice<'_>);
