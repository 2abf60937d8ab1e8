// 该文件是 Luyan （路眼） 项目的一部分。
// src/output.rs - 视频输出
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

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::frame::Frame;

pub mod draw;

#[cfg(feature = "gstreamer_video")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_video")]
pub use self::gstreamer_video_output::{GStreamerOutputError, GStreamerVideoSink};

/// 输出文件名前缀
pub const OUTPUT_PREFIX: &str = "output_";

#[derive(Error, Debug)]
pub enum SinkError {
  #[error("帧尺寸 {actual:?} 与输出 {expected:?} 不一致")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("输出已结束")]
  Finished,
  #[error("IO 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("编码器错误: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 输出视频参数，帧率至少为 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSpec {
  pub width: u32,
  pub height: u32,
  pub frame_rate: u32,
}

impl SinkSpec {
  pub fn check_frame(&self, frame: &Frame) -> Result<(), SinkError> {
    if frame.dimensions() != (self.width, self.height) {
      return Err(SinkError::FrameSizeMismatch {
        expected: (self.width, self.height),
        actual: frame.dimensions(),
      });
    }
    Ok(())
  }
}

/// 逐帧写入的视频输出
pub trait VideoSink {
  fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError>;

  /// 写完所有帧后调用，确保文件完整落盘
  fn finish(&mut self) -> Result<(), SinkError>;
}

impl<S: VideoSink + ?Sized> VideoSink for Box<S> {
  fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
    (**self).write_frame(frame)
  }

  fn finish(&mut self) -> Result<(), SinkError> {
    (**self).finish()
  }
}

/// `<output_dir>/output_<源文件名>`；源路径没有文件名时返回 `None`
pub fn output_path_for(source: &Path, output_dir: &Path) -> Option<PathBuf> {
  let name = source.file_name()?;
  let mut output_name = std::ffi::OsString::from(OUTPUT_PREFIX);
  output_name.push(name);
  Some(output_dir.join(output_name))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn output_name_is_prefixed() {
    assert_eq!(
      output_path_for(Path::new("/videos/drive.mp4"), Path::new("/out")),
      Some(PathBuf::from("/out/output_drive.mp4"))
    );
  }

  #[test]
  fn source_without_name_is_rejected() {
    assert_eq!(output_path_for(Path::new("/"), Path::new("/out")), None);
  }

  #[test]
  fn frame_size_is_checked() {
    let spec = SinkSpec {
      width: 4,
      height: 2,
      frame_rate: 1,
    };
    assert!(spec.check_frame(&Frame::new(4, 2)).is_ok());
    assert!(matches!(
      spec.check_frame(&Frame::new(2, 4)),
      Err(SinkError::FrameSizeMismatch { .. })
    ));
  }
}
