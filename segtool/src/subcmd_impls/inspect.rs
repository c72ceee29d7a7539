use clap::Args;
use image::{GrayImage, Luma};
use ndarray::{Array2, Axis, Zip};
use spect_berry::consts::mask::is_foreground;
use spect_berry::threshold::{local_mean_map, local_threshold_slice};
use spect_berry::{filter, ImgWriteVis, NiftiHeaderAttr, SpectMask, SpectScan};
use std::error::Error;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct Inspect {
    /// 输入 SPECT 体积 (.nii / .nii.gz).
    #[arg(short, long)]
    input: PathBuf,

    /// 输出目录, 不存在时自动创建.
    #[arg(short, long)]
    out_dir: PathBuf,

    /// 水平切片索引, 缺省取中间切片.
    #[arg(long)]
    slice: Option<usize>,

    /// 待扫描的邻域边长列表, 每项必须为大于 1 的奇数.
    #[arg(long, value_delimiter = ',', default_values_t = [31usize, 51, 71])]
    block_sizes: Vec<usize>,

    /// 待扫描的偏移量列表.
    #[arg(long, value_delimiter = ',', default_values_t = [0.0f32, 10.0, 25.0])]
    offsets: Vec<f32>,

    /// 高斯平滑 sigma.
    #[arg(long, default_value_t = spect_berry::consts::DEFAULT_SMOOTH_SIGMA)]
    sigma: f64,

    /// 背景强度水平, 不高于该值的像素不参与掩膜.
    #[arg(long, default_value_t = 0.0)]
    background_level: f32,
}

impl Inspect {
    pub fn run(&self) -> Result<(), Box<dyn Error>> {
        if self.block_sizes.is_empty() || self.offsets.is_empty() {
            return Err("邻域边长与偏移量列表不能为空".into());
        }
        if let Some(&bad) = self
            .block_sizes
            .iter()
            .find(|&&bs| bs < 3 || bs % 2 == 0)
        {
            return Err(format!("邻域边长 {bad} 无效, 必须为大于 1 的奇数").into());
        }

        let scan = SpectScan::open(&self.input)?;
        let z = self.slice.unwrap_or(scan.len_z() / 2);
        if z >= scan.len_z() {
            return Err(format!("切片索引 {z} 超出范围 [0, {})", scan.len_z()).into());
        }
        fs::create_dir_all(&self.out_dir)?;

        let smooth = filter::gaussian_smooth(scan.data(), self.sigma);
        let sli = smooth.index_axis(Axis(0), z);

        // 原始切片.
        scan.slice_at(z)
            .save(self.out_dir.join(format!("slice_{z}.png")))?;

        for &bs in self.block_sizes.iter() {
            for &off in self.offsets.iter() {
                let mut m = local_threshold_slice(sli, bs, off);
                // 背景抑制.
                Zip::from(&mut m).and(sli).for_each(|p, &v| {
                    if v <= self.background_level {
                        *p = 0;
                    }
                });
                let voxels = m.iter().filter(|p| is_foreground(**p)).count();
                println!("block_size={bs}, offset={off}, voxels={voxels}");
                save_mask_png(&m, self.out_dir.join(format!("mask_bs{bs}_off{off}.png")))?;
            }
        }

        // 第一组参数的局部阈值图与整体积调试掩膜.
        let (bs, off) = (self.block_sizes[0], self.offsets[0]);
        save_map_png(
            &local_mean_map(sli, bs),
            self.out_dir.join(format!("thresh_bs{bs}.png")),
        )?;

        let mut debug_mask = SpectMask::from_scan(&scan);
        let chosen = local_threshold_slice(sli, bs, off);
        debug_mask.slice_at_mut(z).array_view_mut().assign(&chosen);
        let nii = self.out_dir.join("debug_mask.nii.gz");
        debug_mask.save(&nii)?;
        debug_mask.slice_at(z).save(self.out_dir.join("debug_mask.png"))?;
        println!("Debug mask saved to {}", nii.display());
        Ok(())
    }
}

/// 将二值掩膜切片保存为黑白 png.
fn save_mask_png<P: AsRef<Path>>(mask: &Array2<u8>, path: P) -> Result<(), Box<dyn Error>> {
    let (h, w) = mask.dim();
    let mut buf = GrayImage::new(w as u32, h as u32);
    for ((hh, ww), &p) in mask.indexed_iter() {
        let gray = if is_foreground(p) { 0xff } else { 0 };
        buf.put_pixel(ww as u32, hh as u32, Luma([gray]));
    }
    buf.save(path)?;
    Ok(())
}

/// 将局部阈值图 min-max 归一化后保存为灰度 png.
fn save_map_png<P: AsRef<Path>>(map: &Array2<f64>, path: P) -> Result<(), Box<dyn Error>> {
    let (h, w) = map.dim();
    let (lo, hi) = map
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = if hi > lo { hi - lo } else { 1.0 };
    let mut buf = GrayImage::new(w as u32, h as u32);
    for ((hh, ww), &v) in map.indexed_iter() {
        buf.put_pixel(ww as u32, hh as u32, Luma([((v - lo) / span * 255.0) as u8]));
    }
    buf.save(path)?;
    Ok(())
}
