// 该文件是 Luyan （路眼） 项目的一部分。
// src/bin/annotate_image.rs - 单张图像标注
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use luyan::{
  FromUrl,
  annotate::FrameAnnotator,
  frame::decode_image,
  model::{DetectorModel, DetectorModelBuilder, OrtBackend},
};

/// 标注单张图像
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型 URL
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像
  #[arg(long, value_name = "IMAGE")]
  pub input: PathBuf,
  /// 输出图像，格式由扩展名决定
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入图像: {}", args.input.display());
  info!("输出图像: {}", args.output.display());

  let model: DetectorModel<OrtBackend> = DetectorModelBuilder::from_url(&args.model)?.build()?;
  let annotator = FrameAnnotator::new(Arc::new(model));

  let data = std::fs::read(&args.input)
    .with_context(|| format!("无法读取 {}", args.input.display()))?;
  let mut frame = decode_image(&data)?;

  let now = std::time::Instant::now();
  let summary = annotator.annotate(&mut frame)?;
  info!(
    "标注完成，耗时: {:.2?}, {} 条车道线, {} 个目标",
    now.elapsed(),
    summary.lanes,
    summary.detections.len()
  );
  for det in &summary.detections {
    info!(
      "  - {} at ({}, {}, {}x{})",
      det.label(),
      det.bbox.x,
      det.bbox.y,
      det.bbox.width,
      det.bbox.height
    );
  }

  frame
    .save(&args.output)
    .with_context(|| format!("无法保存 {}", args.output.display()))?;
  Ok(())
}
