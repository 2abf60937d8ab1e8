// 该文件是 Luyan （路眼） 项目的一部分。
// src/task.rs - 处理任务
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

use std::path::Path;

use crate::{
  input::{SourceOpenError, VideoSource},
  output::{SinkError, SinkSpec, VideoSink},
};

pub mod batch;
pub mod stream;

pub use self::batch::{
  BatchError, BatchJob, BatchProcessor, BatchReport, BatchState, DroppedFramePolicy,
  SamplingPolicy,
};
pub use self::stream::{
  AnnotatedFrame, FrameOutcome, SkipReason, StreamError, StreamProcessor, StreamSummary,
};

/// 批处理使用的视频解码与编码实现
pub trait VideoBackend {
  type Source: VideoSource;
  type Sink: VideoSink;

  fn open_source(&self, path: &Path) -> Result<Self::Source, SourceOpenError>;

  fn create_sink(&self, path: &Path, spec: SinkSpec) -> Result<Self::Sink, SinkError>;
}

/// GStreamer 解码与 H.264/MP4 编码
#[cfg(feature = "gstreamer_video")]
#[derive(Debug, Clone, Copy, Default)]
pub struct GStreamerBackend;

#[cfg(feature = "gstreamer_video")]
impl VideoBackend for GStreamerBackend {
  type Source = crate::input::GStreamerVideoSource;
  type Sink = crate::output::GStreamerVideoSink;

  fn open_source(&self, path: &Path) -> Result<Self::Source, SourceOpenError> {
    if !path.is_file() {
      return Err(SourceOpenError::NotFound(path.to_path_buf()));
    }
    crate::input::GStreamerVideoSource::open(path).map_err(|e| SourceOpenError::Backend {
      path: path.to_path_buf(),
      source: Box::new(e),
    })
  }

  fn create_sink(&self, path: &Path, spec: SinkSpec) -> Result<Self::Sink, SinkError> {
    Ok(crate::output::GStreamerVideoSink::create(path, spec)?)
  }
}
