use clap::Args;
use spect_berry::metrics::Comparison;
use spect_berry::{SpectMask, SpectScan};
use std::error::Error;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct Compare {
    /// 输入 SPECT 体积 (.nii / .nii.gz).
    #[arg(short, long)]
    input: PathBuf,

    /// `NAME=PATH` 格式的命名掩膜列表, 可逗号分隔或多次给出.
    #[arg(short, long, required = true, value_delimiter = ',', value_parser = parse_named_mask)]
    masks: Vec<(String, PathBuf)>,

    /// 金标准掩膜路径. 给出时会单独报告 gold vs method 的 Dice.
    #[arg(short, long)]
    gold: Option<PathBuf>,
}

/// 解析 `NAME=PATH` 格式的命名掩膜参数.
fn parse_named_mask(s: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = s
        .split_once('=')
        .ok_or_else(|| "期望 `NAME=PATH` 格式".to_string())?;
    if name.trim().is_empty() {
        return Err("掩膜名称不能为空".to_string());
    }
    Ok((name.trim().to_string(), PathBuf::from(path.trim())))
}

impl Compare {
    pub fn run(&self) -> Result<(), Box<dyn Error>> {
        let scan = SpectScan::open(&self.input)?;

        let mut cmp = Comparison::new();
        if let Some(ref gold) = self.gold {
            cmp.push("gold", SpectMask::open(gold)?);
            cmp.set_gold("gold");
        }
        for (name, path) in self.masks.iter() {
            cmp.push(name.clone(), SpectMask::open(path)?);
        }

        let report = cmp.run(&scan)?;
        report.analyze();
        Ok(())
    }
}
