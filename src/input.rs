// 该文件是 Luyan （路眼） 项目的一部分。
// src/input.rs - 视频输入
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

use std::path::PathBuf;

use thiserror::Error;

use crate::frame::Frame;

#[cfg(feature = "gstreamer_video")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_video")]
pub use self::gstreamer_input::{GStreamerInputError, GStreamerVideoSource};

/// 打开视频源失败，整个任务随之失败
#[derive(Error, Debug)]
pub enum SourceOpenError {
  #[error("视频文件不存在: {}", .0.display())]
  NotFound(PathBuf),
  #[error("无法打开视频源 {}: {source}", path.display())]
  Backend {
    path: PathBuf,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },
}

/// 读取单帧失败，之后的帧不再可信
#[derive(Error, Debug)]
pub enum FrameReadError {
  #[error("解码管道错误: {0}")]
  Pipeline(String),
  #[error("帧缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("不支持的像素格式: {0}")]
  UnsupportedFormat(String),
}

/// 按顺序产出已解码帧的视频源，帧尺寸与帧率在打开时确定
pub trait VideoSource: Iterator<Item = Result<Frame, FrameReadError>> {
  fn width(&self) -> u32;
  fn height(&self) -> u32;
  /// 源文件声明的帧率，可能为 0 或非整数
  fn frame_rate(&self) -> f64;
}

impl<S: VideoSource + ?Sized> VideoSource for Box<S> {
  fn width(&self) -> u32 {
    (**self).width()
  }

  fn height(&self) -> u32 {
    (**self).height()
  }

  fn frame_rate(&self) -> f64 {
    (**self).frame_rate()
  }
}
