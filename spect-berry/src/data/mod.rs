use std::collections::{HashSet, VecDeque};
use std::ops::{Index, IndexMut, Range};
use std::path::Path;

use ndarray::{Array3, ArrayView, ArrayViewMut, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::consts::mask::{is_background, is_foreground, MASK_BACKGROUND};
use crate::{Area3d, Areas3d, Idx2d, Idx3d};

pub mod slice;

pub use slice::{ImgWriteVis, MaskSlice, MaskSliceMut, ScanSlice};

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 3x3 行列式 (取仿射矩阵左上角子块).
#[inline]
fn det3(m: &[[f64; 4]; 4]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// 3D nii 文件 header 的共用属性和部分通用操作.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状大小.
    #[inline]
    fn shape(&self) -> Idx3d {
        get_shape_from_header(self.header())
    }

    /// 获取数据水平切片形状大小.
    #[inline]
    fn slice_shape(&self) -> Idx2d {
        let (_, h, w) = self.shape();
        (h, w)
    }

    /// 获取水平切片个数.
    #[inline]
    fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取单个体素分辨率. 该分辨率以毫米为单位, 分别代表空间 (相邻切片方向),
    /// 高 (自然图像的垂直方向), 宽 (自然图像的水平方向).
    ///
    /// 该值也可以通过 `self.{z_mm, height_mm, width_mm}` 分别获取.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, w, h, z, ..] = self.header().pixdim;
        [z as f64, h as f64, w as f64]
    }

    /// 获取 width 方向 (自然 2D 图像的水平方向) 体素分辨率, 以毫米为单位.
    #[inline]
    fn width_mm(&self) -> f64 {
        self.header().pixdim[1] as f64
    }

    /// 获取 height 方向 (自然 2D 图像的垂直方向) 体素分辨率, 以毫米为单位.
    #[inline]
    fn height_mm(&self) -> f64 {
        self.header().pixdim[2] as f64
    }

    /// 获取空间方向 (相邻 2D 切片的方向) 体素分辨率, 以毫米为单位.
    #[inline]
    fn z_mm(&self) -> f64 {
        self.header().pixdim[3] as f64
    }

    /// 获取体素索引到物理坐标的 4x4 仿射变换.
    ///
    /// 若 header 的 `sform_code` 为正, 则直接取其 srow 三行;
    /// 否则退化为以体素分辨率为对角线的缩放矩阵.
    fn affine(&self) -> [[f64; 4]; 4] {
        let h = self.header();
        if h.sform_code > 0 {
            let row = |r: &[f32; 4]| [r[0] as f64, r[1] as f64, r[2] as f64, r[3] as f64];
            [
                row(&h.srow_x),
                row(&h.srow_y),
                row(&h.srow_z),
                [0.0, 0.0, 0.0, 1.0],
            ]
        } else {
            let [z, hh, w] = self.pix_dim();
            [
                [w, 0.0, 0.0, 0.0],
                [0.0, hh, 0.0, 0.0],
                [0.0, 0.0, z, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ]
        }
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    ///
    /// 该值取仿射变换左上 3x3 子矩阵行列式的绝对值,
    /// 对正交仿射等价于三个方向分辨率的乘积.
    #[inline]
    fn voxel_mm3(&self) -> f64 {
        det3(&self.affine()).abs()
    }
}

/// nii 格式 3D SPECT 扫描, 包括 header 和强度数据. 强度值以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct SpectScan {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl NiftiHeaderAttr for SpectScan {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for SpectScan {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl SpectScan {
    /// 打开 nii 文件格式的 3D SPECT 扫描. `path` 为 nii 文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        // [W, H, z] -> [z, H, W].
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = obj
            .into_volume()
            .into_ndarray::<f32>()?
            .permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        // 该操作不会生成 `Err`, 可直接 unwrap.
        let data =
            Array3::<f32>::from_shape_vec(get_shape_from_header(&header), data.into_raw_vec())
                .unwrap();

        Ok(Self { header, data })
    }

    /// 根据裸强度数据和体素分辨率直接创建 `SpectScan` 实体.
    ///
    /// # 参数
    ///
    /// 1. `data` 直接以内部 (z, H, W) 布局给出.
    /// 2. `pix_dim` 以 \[z, h, w\] 格式给出, 单位毫米, 必须为正.
    ///
    /// # 注意
    ///
    /// 该方法可能会创建不一致的实体, 因此你应仅将其用于实验目的.
    pub fn fake(data: Array3<f32>, pix_dim: [f32; 3]) -> Self {
        Self {
            header: fake_header(data.dim(), pix_dim),
            data,
        }
    }

    /// 判断该结构是否是由 `fake` 方法手动拼接的.
    pub fn is_faked(&self) -> bool {
        self.header.intent_name.starts_with(b"fake")
    }

    /// 计算由 `it` 给出的所有索引对应强度的平均值.
    ///
    /// 空集合返回 0.0. 如果存在越界索引, 则程序 panic.
    pub fn mean_intensity<I: IntoIterator<Item = Idx3d>>(&self, it: I) -> f64 {
        let mut count = 0u64;
        let mut acc = 0.0;
        for pos in it.into_iter() {
            count += 1;
            acc += self[pos] as f64;
        }
        if count == 0 {
            0.0
        } else {
            acc / (count as f64)
        }
    }

    /// 获取 3D 扫描 z 空间的第 `z_index` 层切片视图.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ScanSlice<'_> {
        ScanSlice::new(self.data.index_axis(Axis(0), z_index))
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }
}

/// nii 格式 3D 二值掩膜, 包括 header 和掩膜数据. 体素值以 `u8` 保存,
/// 0 为背景, 非 0 为前景.
#[derive(Debug, Clone)]
pub struct SpectMask {
    header: BoxedHeader,
    data: Array3<u8>,
}

impl NiftiHeaderAttr for SpectMask {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for SpectMask {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for SpectMask {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl SpectMask {
    /// 打开 nii 文件格式的 3D 掩膜. `path` 为 nii 文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        // [W, H, z] -> [z, H, W].
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = obj
            .into_volume()
            .into_ndarray::<u8>()?
            .permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        // 该操作不会生成 `Err`, 可直接 unwrap.
        let data =
            Array3::<u8>::from_shape_vec(get_shape_from_header(&header), data.into_raw_vec())
                .unwrap();

        Ok(Self { header, data })
    }

    /// 以 `scan` 的几何信息创建一个全背景掩膜.
    ///
    /// 新掩膜完整克隆扫描的 header, 因此保存后所有物理计算
    /// (体素体积, 仿射变换) 与来源扫描保持一致.
    pub fn from_scan(scan: &SpectScan) -> Self {
        Self {
            header: scan.header.clone(),
            data: Array3::from_elem(scan.data.dim(), MASK_BACKGROUND),
        }
    }

    /// 根据裸掩膜数据和体素分辨率直接创建 `SpectMask` 实体.
    ///
    /// # 参数
    ///
    /// 1. `data` 直接以内部 (z, H, W) 布局给出, 0 为背景, 非 0 为前景.
    /// 2. `pix_dim` 以 \[z, h, w\] 格式给出, 单位毫米, 必须为正.
    ///
    /// # 注意
    ///
    /// 该方法可能会创建不一致的实体, 因此你应仅将其用于实验目的.
    pub fn fake(data: Array3<u8>, pix_dim: [f32; 3]) -> Self {
        Self {
            header: fake_header(data.dim(), pix_dim),
            data,
        }
    }

    /// 判断该结构是否是由 `fake` 方法手动拼接的.
    pub fn is_faked(&self) -> bool {
        self.header.intent_name.starts_with(b"fake")
    }

    /// 将掩膜保存为 nii 文件. 输出文件以掩膜自身的 header 为参考
    /// (仅数据类型按 `u8` 重写), 因此几何信息与来源扫描保持一致.
    ///
    /// 文件格式由扩展名决定, `.nii.gz` 自动压缩.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> nifti::Result<()> {
        // [z, H, W] -> [W, H, z], 与 `open` 的轴变换互逆.
        let view = self.data.view().permuted_axes([2, 1, 0]);
        WriterOptions::new(path.as_ref())
            .reference_header(&self.header)
            .write_nifti(&view)
    }

    /// 获取 3D 掩膜 z 空间的第 `z_index` 层不可变切片.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> MaskSlice<'_> {
        MaskSlice::new(self.data.index_axis(Axis(0), z_index))
    }

    /// 获取 3D 掩膜 z 空间的第 `z_index` 层可变切片.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at_mut(&mut self, z_index: usize) -> MaskSliceMut<'_> {
        MaskSliceMut::new(self.data.index_axis_mut(Axis(0), z_index))
    }

    /// 获取能按升序迭代 3D 掩膜水平可变切片的迭代器.
    #[inline]
    pub fn slice_iter_mut(&mut self) -> impl ExactSizeIterator<Item = MaskSliceMut> {
        self.data.axis_iter_mut(Axis(0)).map(MaskSliceMut::new)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, u8, Ix3> {
        self.data.view_mut()
    }

    /// 获取掩膜中前景体素的个数.
    #[inline]
    pub fn count_foreground(&self) -> usize {
        self.data.iter().filter(|p| is_foreground(**p)).count()
    }

    /// 前景体素数占总体素数的比例. 取值范围 \[0, 1\].
    #[inline]
    pub fn fraction(&self) -> f64 {
        self.count_foreground() as f64 / self.size() as f64
    }

    /// 收集所有前景体素对应的下标. 结果按行优先存储.
    pub fn foreground_pos(&self) -> Vec<Idx3d> {
        self.data
            .indexed_iter()
            .filter_map(|(pos, &p)| is_foreground(p).then_some(pos))
            .collect()
    }

    /// 将 `it` 给出的所有下标对应的体素设置为 `value`.
    ///
    /// 如果存在越界下标, 则程序 panic.
    pub fn fill_batch<I: IntoIterator<Item = Idx3d>>(&mut self, it: I, value: u8) {
        for pos in it.into_iter() {
            self.data[pos] = value;
        }
    }

    /// 将半开区间 `[range.start, range.end)` 之外的所有水平切片清为背景.
    ///
    /// `range.end` 超过切片总数时按总数截断.
    pub fn clear_outside_z(&mut self, range: Range<usize>) {
        for z in 0..self.len_z() {
            if !range.contains(&z) {
                self.data.index_axis_mut(Axis(0), z).fill(MASK_BACKGROUND);
            }
        }
    }

    /// 按照 26-相邻规则获取所有前景连通分量. 两个前景体素属于同一个分量,
    /// 当且仅当存在一条完全由前景体素构成的 26-相邻路径连接它们.
    ///
    /// 分量按行优先发现顺序排列, 分量内部体素同样按发现顺序排列.
    pub fn areas_26(&self) -> Areas3d {
        let mut ans = Areas3d::with_capacity(1);
        let mut bfs_q = VecDeque::with_capacity(4);
        let mut set = HashSet::with_capacity(16);

        for (pos, &pix) in self.data.indexed_iter() {
            if is_background(pix) || set.contains(&pos) {
                continue;
            }
            bfs_q.push_back(pos);
            let mut this_area = Area3d::with_capacity(1);
            while let Some(cur) = bfs_q.pop_front() {
                if set.contains(&cur) {
                    continue;
                }
                set.insert(cur);
                this_area.push(cur);

                // bfs
                for neigh in self.neighbours_26(cur) {
                    if is_foreground(self[neigh]) && !set.contains(&neigh) {
                        bfs_q.push_back(neigh);
                    }
                }
            }
            ans.push(this_area);
        }
        ans
    }

    /// 获取 `pos` 的 26-邻域体素坐标.
    ///
    /// 在数据范围外的坐标会被过滤掉, 不会包含在返回值中.
    fn neighbours_26(&self, (z, h, w): Idx3d) -> Vec<Idx3d> {
        let mut ans = Vec::with_capacity(26);
        for dz in -1..=1isize {
            for dh in -1..=1isize {
                for dw in -1..=1isize {
                    if dz == 0 && dh == 0 && dw == 0 {
                        continue;
                    }
                    let (Some(z1), Some(h1), Some(w1)) = (
                        z.checked_add_signed(dz),
                        h.checked_add_signed(dh),
                        w.checked_add_signed(dw),
                    ) else {
                        continue;
                    };
                    if self.check(&(z1, h1, w1)) {
                        ans.push((z1, h1, w1));
                    }
                }
            }
        }
        ans
    }
}

/// 为 `fake` 构造器拼装 header. `dim` 以内部 (z, H, W) 布局给出,
/// `pix_dim` 以 \[z, h, w\] 格式给出.
fn fake_header((z, h, w): Idx3d, pix_dim: [f32; 3]) -> BoxedHeader {
    let [pz, ph, pw] = pix_dim;
    assert!(
        pz > 0.0 && ph > 0.0 && pw > 0.0,
        "体素分辨率必须为正: {pix_dim:?}"
    );

    let mut header = Box::<NiftiHeader>::default();
    header.dim[0] = 3;
    header.dim[1] = w as _;
    header.dim[2] = h as _;
    header.dim[3] = z as _;
    for d in header.dim[4..].iter_mut() {
        *d = 1;
    }
    header.pixdim[1] = pw;
    header.pixdim[2] = ph;
    header.pixdim[3] = pz;
    header.intent_name[..4].copy_from_slice(b"fake");
    header
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
    }
}

/// 并发操作部分
#[cfg(feature = "rayon")]
impl SpectMask {
    /// 借助 `rayon`, 并行地对掩膜每个水平可变切片实施 `op` 操作.
    /// 该操作会同时携带 z 方向索引信息.
    pub fn par_for_each_indexed_slice_mut<F>(&mut self, op: F)
    where
        F: Fn(usize, MaskSliceMut) + Sync + Send,
    {
        self.data
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, v)| {
                op(i, MaskSliceMut::new(v));
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::mask::MASK_FOREGROUND;

    fn checkerboard(dim: Idx3d) -> Array3<u8> {
        Array3::from_shape_fn(dim, |(z, h, w)| ((z + h + w) % 2) as u8)
    }

    #[test]
    fn test_fake_scan_attrs() {
        let scan = SpectScan::fake(Array3::zeros((4, 6, 8)), [2.5, 1.0, 1.5]);
        assert!(scan.is_faked());
        assert_eq!(scan.shape(), (4, 6, 8));
        assert_eq!(scan.slice_shape(), (6, 8));
        assert_eq!(scan.len_z(), 4);
        assert_eq!(scan.size(), 4 * 6 * 8);
        assert!(scan.check(&(3, 5, 7)));
        assert!(!scan.check(&(4, 0, 0)));

        let [pz, ph, pw] = scan.pix_dim();
        assert!((pz - 2.5).abs() < 1e-6);
        assert!((ph - 1.0).abs() < 1e-6);
        assert!((pw - 1.5).abs() < 1e-6);
        assert!((scan.z_mm() - 2.5).abs() < 1e-6);
        assert!((scan.height_mm() - 1.0).abs() < 1e-6);
        assert!((scan.width_mm() - 1.5).abs() < 1e-6);
        // 无 sform 时体素体积退化为分辨率乘积.
        assert!((scan.voxel_mm3() - 3.75).abs() < 1e-6);
    }

    #[test]
    fn test_mean_intensity() {
        let mut data = Array3::zeros((2, 2, 2));
        data[(0, 0, 0)] = 3.0;
        data[(1, 1, 1)] = 5.0;
        let scan = SpectScan::fake(data, [1.0; 3]);

        assert_eq!(scan.mean_intensity([(0, 0, 0), (1, 1, 1)]), 4.0);
        assert_eq!(scan.mean_intensity(Vec::new()), 0.0);
    }

    #[test]
    fn test_mask_counts() {
        let mask = SpectMask::fake(checkerboard((2, 2, 2)), [1.0; 3]);
        assert_eq!(mask.count_foreground(), 4);
        assert!((mask.fraction() - 0.5).abs() < 1e-12);
        assert_eq!(mask.foreground_pos().len(), 4);
    }

    #[test]
    fn test_clear_outside_z() {
        let mut mask = SpectMask::fake(Array3::from_elem((4, 3, 3), MASK_FOREGROUND), [1.0; 3]);
        mask.clear_outside_z(1..3);
        assert!(mask.slice_at(0).is_background());
        assert!(!mask.slice_at(1).is_background());
        assert!(!mask.slice_at(2).is_background());
        assert!(mask.slice_at(3).is_background());
        assert_eq!(mask.count_foreground(), 2 * 3 * 3);
    }

    #[test]
    fn test_areas_26() {
        let mut data = Array3::zeros((3, 5, 5));
        // 体对角相邻, 26-连通下为同一个分量.
        data[(0, 0, 0)] = 1;
        data[(1, 1, 1)] = 1;
        // 与上面分量不相邻.
        data[(2, 4, 4)] = 1;
        let mask = SpectMask::fake(data, [1.0; 3]);

        let areas = mask.areas_26();
        assert_eq!(areas.len(), 2);
        assert_eq!(areas[0].len(), 2);
        assert_eq!(areas[1].len(), 1);
    }

    #[test]
    fn test_fill_batch() {
        let mut mask = SpectMask::fake(Array3::zeros((2, 2, 2)), [1.0; 3]);
        mask.fill_batch([(0, 0, 0), (1, 0, 1)], MASK_FOREGROUND);
        assert_eq!(mask.count_foreground(), 2);
        mask.fill_batch([(0, 0, 0)], MASK_BACKGROUND);
        assert_eq!(mask.count_foreground(), 1);
    }

    #[test]
    fn test_mask_nifti_roundtrip() {
        let data = checkerboard((3, 4, 5));
        let mask = SpectMask::fake(data.clone(), [2.0, 1.0, 1.5]);

        let path = std::env::temp_dir().join("spect_berry_mask_roundtrip.nii");
        mask.save(&path).unwrap();
        let loaded = SpectMask::open(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.shape(), (3, 4, 5));
        assert_eq!(loaded.data(), data.view());

        let [pz, ph, pw] = loaded.pix_dim();
        assert!((pz - 2.0).abs() < 1e-6);
        assert!((ph - 1.0).abs() < 1e-6);
        assert!((pw - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_mask_nifti_roundtrip_gz() {
        let data = checkerboard((2, 3, 4));
        let mask = SpectMask::fake(data.clone(), [1.0; 3]);

        let path = std::env::temp_dir().join("spect_berry_mask_roundtrip.nii.gz");
        mask.save(&path).unwrap();
        let loaded = SpectMask::open(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.shape(), (2, 3, 4));
        assert_eq!(loaded.data(), data.view());
    }
}
