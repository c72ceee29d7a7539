#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供 3D SPECT 肿瘤扫描 nifti 文件的结构化信息和阈值分割算法.
//!
//! 该 crate 目前仅提供 `safe` 接口. 将来可能为部分高性能场景关键路径提供 `unsafe` 接口.
//!
//! # 注意
//!
//! 1. 该 crate 假设输入为单通道 3D SPECT 扫描, 没有对 4D (时间序列)
//!   数据进行直接适配 (但 4D 文件的第一个体可以先行抽取后处理).
//! 2. 在非期望情况下, 程序会直接 panic, 而不会导致内存错误. As what Rust promises.
//!
//! # 功能总览
//!
//! ### 扫描与掩膜数据结构 ✅
//!
//! nii 文件加载/保存, header 几何信息, 水平切片视图.
//!
//! 实现位于 `spect-berry/src/data`.
//!
//! ### 阈值引擎 ✅
//!
//! 全局固定阈值, 中间切片均值阈值, Otsu, 正强度百分位数,
//! 以及逐切片自适应局部均值阈值.
//!
//! 实现位于 `spect-berry/src/threshold`.
//!
//! ### 三维形态学后处理 ✅
//!
//! 小连通分量移除, 球形结构元闭运算, z 轴范围约束, 最大连通分量选取.
//!
//! 实现位于 `spect-berry/src/post_proc`.
//!
//! ### 种子式 random walker 分割 ✅
//!
//! 高斯平滑, Otsu 种子标记, 图上概率扩散.
//!
//! 实现位于 `spect-berry/src/walker.rs`.
//!
//! ### 分割结果量化对比 ✅
//!
//! 体素数/物理体积/占比/平均强度统计, 以及任意多个命名掩膜
//! (含可选金标准) 间的两两 Dice 相似度.
//!
//! 实现位于 `spect-berry/src/metrics`.
//!
//! ### 完善代码文档 ✅
//!
//! 给每个 public API 提供文档, 并视情况给 private
//! API 提供文档.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

type Area3d = Vec<Idx3d>;
type Areas3d = Vec<Area3d>;

/// 3D SPECT nii 文件基础数据结构.
mod data;

pub use data::{
    ImgWriteVis, MaskSlice, MaskSliceMut, NiftiHeaderAttr, ScanSlice, SpectMask, SpectScan,
};

pub mod consts;

pub mod filter;

pub mod metrics;
pub mod post_proc;
pub mod threshold;
pub mod walker;

pub mod prelude;
