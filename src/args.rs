// 该文件是 Luyan （路眼） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::{num::NonZeroU32, path::PathBuf};

use clap::{Parser, Subcommand};
use url::Url;

/// Luyan 车道线与目标标注
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 标注整个视频文件
  Batch(BatchArgs),
  /// 从标准输入逐行读取 base64 图像，向标准输出逐行写出标注后的 base64 JPEG
  Stream(StreamArgs),
}

#[derive(clap::Args, Debug)]
pub struct ModelArgs {
  /// 模型 URL，例如
  /// yolo:///models/yolov4.onnx?config=/models/yolov4.cfg&labels=/models/coco.names
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.4", value_name = "THRESHOLD")]
  pub nms_threshold: f32,
}

#[derive(clap::Args, Debug)]
pub struct BatchArgs {
  #[command(flatten)]
  pub model: ModelArgs,

  /// 输入视频文件
  #[arg(long, value_name = "VIDEO")]
  pub input: PathBuf,

  /// 输出目录，输出文件名为 output_<输入文件名>
  #[arg(long, default_value = ".", value_name = "DIR")]
  pub output_dir: PathBuf,

  /// 每 N 帧标注一帧
  #[arg(long, default_value = "2", value_name = "N")]
  pub sample_every: NonZeroU32,

  /// 未采样的帧原样写入输出
  #[arg(long)]
  pub pass_through: bool,
}

#[derive(clap::Args, Debug)]
pub struct StreamArgs {
  #[command(flatten)]
  pub model: ModelArgs,
}
