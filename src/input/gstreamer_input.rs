// 该文件是 Luyan （路眼） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
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

//! # GStreamer 视频文件输入
//!
//! 用 `filesrc ! decodebin ! videoconvert` 解码任意 GStreamer 支持的视频文件，
//! 在 appsink 处以 RGB 帧取出。打开时先进入 PAUSED 状态完成预滚，
//! 从第一帧的 caps 读出宽、高和帧率，再切换到 PLAYING。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev \
//!   gstreamer1.0-plugins-good gstreamer1.0-libav
//! ```

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::Frame,
  input::{FrameReadError, VideoSource},
};

/// 预滚等待上限
const PREROLL_TIMEOUT_SECS: u64 = 30;

const PIPELINE_DESCRIPTION: &str = "filesrc name=src ! decodebin ! videoconvert ! \
   video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4";

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("管道中找不到元素 {0}")]
  ElementNotFound(&'static str),
  #[error("元素 {0} 类型不符")]
  ElementConversionFailed(&'static str),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("文件中没有可解码的视频流")]
  NoVideoStream,
  #[error("无法从 caps 读取视频信息")]
  VideoInfoError,
}

/// 基于 GStreamer 的视频文件源
pub struct GStreamerVideoSource {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  width: u32,
  height: u32,
  frame_rate: f64,
  finished: bool,
}

impl GStreamerVideoSource {
  pub fn open(path: &Path) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    info!("GStreamer 输入管道: {}", PIPELINE_DESCRIPTION);
    let pipeline = gst::parse::launch(PIPELINE_DESCRIPTION)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    pipeline
      .by_name("src")
      .ok_or(GStreamerInputError::ElementNotFound("src"))?
      .set_property("location", path.to_string_lossy().to_string());

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::ElementNotFound("sink"))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::ElementConversionFailed("sink"))?;

    // 先构造，出错返回时由 Drop 把管道置回 NULL
    let mut source = Self {
      pipeline,
      appsink,
      width: 0,
      height: 0,
      frame_rate: 0.0,
      finished: false,
    };
    source.preroll()?;
    source.pipeline.set_state(gst::State::Playing)?;

    info!(
      "视频源已打开: {} ({}x{} @ {:.3} fps)",
      path.display(),
      source.width,
      source.height,
      source.frame_rate
    );
    Ok(source)
  }

  fn preroll(&mut self) -> Result<(), GStreamerInputError> {
    let timeout = gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS);

    if let Err(e) = self.pipeline.set_state(gst::State::Paused) {
      return Err(self.bus_error().unwrap_or(e.into()));
    }
    match self.pipeline.state(timeout) {
      (Ok(gst::StateChangeSuccess::Success), _, _) => {}
      (Ok(_), _, _) => return Err(GStreamerInputError::NoVideoStream),
      (Err(e), _, _) => return Err(self.bus_error().unwrap_or(e.into())),
    }

    let sample = self
      .appsink
      .try_pull_preroll(timeout)
      .ok_or(GStreamerInputError::NoVideoStream)?;
    let caps = sample.caps().ok_or(GStreamerInputError::VideoInfoError)?;
    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

    let fps = video_info.fps();
    self.width = video_info.width();
    self.height = video_info.height();
    self.frame_rate = if fps.denom() == 0 {
      0.0
    } else {
      fps.numer() as f64 / fps.denom() as f64
    };
    debug!("预滚完成: {:?}", video_info.format());
    Ok(())
  }

  /// 取出总线上积压的第一条错误消息
  fn bus_error(&self) -> Option<GStreamerInputError> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(GStreamerInputError::PipelineError(format!(
        "{} ({})",
        err.error(),
        err.debug().map(|d| d.to_string()).unwrap_or_default()
      ))),
      _ => None,
    }
  }
}

impl Drop for GStreamerVideoSource {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 输入管道: {}", e);
    }
  }
}

impl Iterator for GStreamerVideoSource {
  type Item = Result<Frame, FrameReadError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }
    match self.appsink.pull_sample() {
      Ok(sample) => {
        let frame = convert_sample(&sample);
        if let Err(e) = &frame {
          error!("帧转换失败: {}", e);
          self.finished = true;
        }
        Some(frame)
      }
      Err(_) if self.appsink.is_eos() => {
        debug!("视频流结束");
        self.finished = true;
        None
      }
      Err(e) => {
        self.finished = true;
        let reason = self
          .bus_error()
          .map(|err| err.to_string())
          .unwrap_or_else(|| e.to_string());
        error!("读取帧失败: {}", reason);
        Some(Err(FrameReadError::Pipeline(reason)))
      }
    }
  }
}

impl VideoSource for GStreamerVideoSource {
  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn frame_rate(&self) -> f64 {
    self.frame_rate
  }
}

/// 按行拷贝，去掉每行末尾的对齐填充
fn convert_sample(sample: &gst::Sample) -> Result<Frame, FrameReadError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| FrameReadError::Pipeline("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| FrameReadError::Pipeline("样本中没有 caps".to_string()))?;
  let video_info = gst_video::VideoInfo::from_caps(caps)
    .map_err(|e| FrameReadError::Pipeline(format!("无法解析 caps: {}", e)))?;

  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(FrameReadError::UnsupportedFormat(format!(
      "{:?}",
      video_info.format()
    )));
  }

  let width = video_info.width();
  let height = video_info.height();
  let row_bytes = width as usize * 3;
  let stride = video_info.stride()[0] as usize;

  let map = buffer
    .map_readable()
    .map_err(|e| FrameReadError::Pipeline(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let expected = stride * (height as usize).saturating_sub(1) + row_bytes;
  if height > 0 && data.len() < expected {
    return Err(FrameReadError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row_bytes * height as usize);
  for row in 0..height as usize {
    let start = row * stride;
    pixels.extend_from_slice(&data[start..start + row_bytes]);
  }

  Frame::from_raw(width, height, pixels).ok_or(FrameReadError::BufferSizeMismatch {
    expected: row_bytes * height as usize,
    actual: data.len(),
  })
}
