//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::{
    ImgWriteVis, MaskSlice, MaskSliceMut, NiftiHeaderAttr, ScanSlice, SpectMask, SpectScan,
};

pub use crate::consts::mask::{MASK_BACKGROUND, MASK_FOREGROUND};

pub use crate::metrics::{dice, Comparison, ComparisonReport, MaskMetrics};
pub use crate::post_proc::{clean_mask, CleanupSpec};
pub use crate::threshold::{LocalThresholdSpec, OtsuRegion, ThresholdError, ThresholdMethod};
pub use crate::walker::{random_walker_mask, WalkerSpec};
