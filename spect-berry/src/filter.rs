//! 体积滤波.

use ndarray::{Array3, ArrayView3};

/// 对 3D 体积做各向同性高斯平滑.
///
/// 一维卷积核在 3 sigma 处截断并归一化, 通过三次可分离卷积实现,
/// 边界按反射方式延拓. `sigma` 非正时返回原数据的拷贝.
pub fn gaussian_smooth(data: ArrayView3<'_, f32>, sigma: f64) -> Array3<f32> {
    if sigma <= 0.0 {
        return data.to_owned();
    }
    let kernel = gaussian_kernel(sigma);
    let pass0 = convolve_axis(data, &kernel, 0);
    let pass1 = convolve_axis(pass0.view(), &kernel, 1);
    convolve_axis(pass1.view(), &kernel, 2)
}

/// 截断于 3 sigma 的一维归一化高斯核.
fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (3.0 * sigma).ceil().max(1.0) as usize;
    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let d = i as f64 - radius as f64;
            (-d * d / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total: f64 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= total;
    }
    kernel
}

/// 沿单轴一维卷积, 边界反射.
fn convolve_axis(data: ArrayView3<'_, f32>, kernel: &[f64], axis: usize) -> Array3<f32> {
    let radius = (kernel.len() / 2) as isize;
    let (zl, hl, wl) = data.dim();
    Array3::from_shape_fn((zl, hl, wl), |(z, h, w)| {
        let mut acc = 0.0f64;
        for (i, &k) in kernel.iter().enumerate() {
            let off = i as isize - radius;
            let pos = match axis {
                0 => (reflect(z as isize + off, zl), h, w),
                1 => (z, reflect(h as isize + off, hl), w),
                _ => (z, h, reflect(w as isize + off, wl)),
            };
            acc += k * data[pos] as f64;
        }
        acc as f32
    })
}

/// 反射式下标延拓: (d c b a | a b c d | d c b a).
fn reflect(mut i: isize, len: usize) -> usize {
    let len = len as isize;
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= len {
            i = 2 * len - i - 1;
        } else {
            return i as usize;
        }
    }
}
