//! 掩膜量化指标与多方法对比.

use crate::consts::mask::is_foreground;
use crate::{Idx3d, NiftiHeaderAttr, SpectMask, SpectScan};
use itertools::Itertools;
use std::fmt;
use std::io::{self, Write};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 单个掩膜的量化指标.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MaskMetrics {
    /// 前景体素个数.
    pub voxels: usize,

    /// 前景物理体积, 以立方毫米为单位.
    pub volume_mm3: f64,

    /// 前景体素数占总体素数的比例. 取值范围 \[0, 1\].
    pub fraction: f64,

    /// 前景区域上的扫描平均强度. 前景为空时取 0.0.
    pub mean_intensity: f64,
}

impl MaskMetrics {
    /// 对单个掩膜计算量化指标.
    ///
    /// 如果掩膜与扫描形状不一致, 则程序 panic.
    pub fn measure(scan: &SpectScan, mask: &SpectMask) -> Self {
        assert_eq!(scan.shape(), mask.shape(), "掩膜与扫描形状不一致");

        let pos = mask.foreground_pos();
        let voxels = pos.len();
        Self {
            voxels,
            volume_mm3: voxels as f64 * mask.voxel_mm3(),
            fraction: voxels as f64 / mask.size() as f64,
            mean_intensity: scan.mean_intensity(pos),
        }
    }
}

/// 两个掩膜间的 Dice 相似系数: `2|A∩B| / (|A| + |B|)`, 取值范围 \[0, 1\].
///
/// 两掩膜同时为空时约定为 1.0 (避免 0/0). 形状不一致时程序 panic.
pub fn dice(a: &SpectMask, b: &SpectMask) -> f64 {
    assert_eq!(a.shape(), b.shape(), "参与对比的掩膜形状不一致");

    let (va, vb) = (a.data(), b.data());
    let mut inter = 0usize;
    let (mut ca, mut cb) = (0usize, 0usize);
    for (&x, &y) in va.iter().zip(vb.iter()) {
        let (fx, fy) = (is_foreground(x), is_foreground(y));
        ca += fx as usize;
        cb += fy as usize;
        inter += (fx && fy) as usize;
    }
    if ca + cb == 0 {
        1.0
    } else {
        2.0 * inter as f64 / (ca + cb) as f64
    }
}

/// 多方法对比错误.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareError {
    /// 掩膜形状与参考扫描不一致.
    ShapeMismatch {
        /// 掩膜名称.
        name: String,
        /// 期望形状 (来自扫描).
        expect: Idx3d,
        /// 实际形状.
        found: Idx3d,
    },

    /// 指定为金标准的掩膜名称不存在.
    MaskNotFound(String),
}

impl fmt::Display for CompareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareError::ShapeMismatch {
                name,
                expect,
                found,
            } => write!(
                f,
                "掩膜 `{name}` 形状 {found:?} 与参考扫描形状 {expect:?} 不一致"
            ),
            CompareError::MaskNotFound(name) => {
                write!(f, "指定为金标准的掩膜 `{name}` 不存在")
            }
        }
    }
}

impl std::error::Error for CompareError {}

/// 多方法分割结果对比器.
///
/// 持有一组命名掩膜 (保持插入顺序), 其中可指定一个为金标准.
/// 金标准参与指标统计, 但其 Dice 配对会与方法间配对分开报告.
#[derive(Debug, Default)]
pub struct Comparison {
    masks: Vec<(String, SpectMask)>,
    gold: Option<String>,
}

impl Comparison {
    /// 创建空的对比器.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个命名掩膜. 名称重复时后续计算以先出现者为准.
    pub fn push(&mut self, name: impl Into<String>, mask: SpectMask) {
        self.masks.push((name.into(), mask));
    }

    /// 指定金标准掩膜的名称. 名称必须已经或即将通过 [`Self::push`] 加入.
    pub fn set_gold(&mut self, name: impl Into<String>) {
        self.gold = Some(name.into());
    }

    /// 按名称查找掩膜.
    fn mask_of(&self, name: &str) -> Option<&SpectMask> {
        self.masks
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m)
    }

    /// 运行全部对比计算.
    ///
    /// 依次校验每个掩膜与扫描的形状一致性和金标准引用的有效性,
    /// 然后产出每个掩膜的量化指标与两两 Dice 相似度.
    pub fn run(&self, scan: &SpectScan) -> Result<ComparisonReport, CompareError> {
        for (name, mask) in self.masks.iter() {
            if mask.shape() != scan.shape() {
                return Err(CompareError::ShapeMismatch {
                    name: name.clone(),
                    expect: scan.shape(),
                    found: mask.shape(),
                });
            }
        }
        let gold_mask = match self.gold {
            Some(ref g) => Some(
                self.mask_of(g)
                    .ok_or_else(|| CompareError::MaskNotFound(g.clone()))?,
            ),
            None => None,
        };

        let metrics = self
            .masks
            .iter()
            .map(|(name, mask)| (name.clone(), MaskMetrics::measure(scan, mask)))
            .collect();

        let method_names: Vec<&str> = self
            .masks
            .iter()
            .map(|(n, _)| n.as_str())
            .filter(|n| Some(*n) != self.gold.as_deref())
            .collect();

        let mut gold_pairs = Vec::new();
        if let Some(gm) = gold_mask {
            for &name in method_names.iter() {
                gold_pairs.push((name.to_string(), dice(gm, self.mask_of(name).unwrap())));
            }
        }

        let mut method_pairs = Vec::new();
        for (a, b) in method_names.iter().copied().tuple_combinations::<(_, _)>() {
            let d = dice(self.mask_of(a).unwrap(), self.mask_of(b).unwrap());
            method_pairs.push((a.to_string(), b.to_string(), d));
        }

        Ok(ComparisonReport {
            gold: self.gold.clone(),
            metrics,
            gold_pairs,
            method_pairs,
        })
    }
}

/// 多方法对比结果.
#[derive(Debug, Clone)]
pub struct ComparisonReport {
    gold: Option<String>,
    metrics: Vec<(String, MaskMetrics)>,
    gold_pairs: Vec<(String, f64)>,
    method_pairs: Vec<(String, String, f64)>,
}

impl ComparisonReport {
    /// 每个掩膜的量化指标, 按插入顺序排列.
    #[inline]
    pub fn metrics(&self) -> &[(String, MaskMetrics)] {
        &self.metrics
    }

    /// 金标准与每个方法掩膜的 Dice 相似度. 未指定金标准时为空.
    #[inline]
    pub fn gold_pairs(&self) -> &[(String, f64)] {
        &self.gold_pairs
    }

    /// 方法掩膜间的两两 Dice 相似度 (无序配对).
    #[inline]
    pub fn method_pairs(&self) -> &[(String, String, f64)] {
        &self.method_pairs
    }

    /// 将对比结果写进 `w` 中.
    pub fn describe_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        const S4: &str = "    ";

        writeln!(w, "Segmentation metrics:")?;
        writeln!(
            w,
            "{S4}{:<12} {:>10} {:>15} {:>10} {:>15}",
            "Method", "Voxels", "Volume(mm^3)", "Fraction", "MeanIntensity"
        )?;
        for (name, m) in self.metrics.iter() {
            writeln!(
                w,
                "{S4}{:<12} {:>10} {:>15.2} {:>10.4} {:>15.2}",
                name, m.voxels, m.volume_mm3, m.fraction, m.mean_intensity
            )?;
        }

        if let Some(gold) = self.gold.as_deref() {
            writeln!(w, "Dice (gold vs method):")?;
            for (name, d) in self.gold_pairs.iter() {
                writeln!(w, "{S4}Dice({gold} vs {name}): {d:.4}")?;
            }
        }
        if !self.method_pairs.is_empty() {
            writeln!(w, "Dice (method vs method):")?;
            for (a, b, d) in self.method_pairs.iter() {
                writeln!(w, "{S4}Dice({a} vs {b}): {d:.4}")?;
            }
        }
        Ok(())
    }

    /// 将对比结果打印到标准输出.
    pub fn analyze(&self) {
        let mut buf = Vec::with_capacity(512);
        self.describe_into(&mut buf).unwrap();
        print!("{}", std::str::from_utf8(&buf).unwrap());
    }
}
