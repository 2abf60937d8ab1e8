// 该文件是 Luyan （路眼） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出
//!
//! RGB 帧经 appsrc 送入 `x264enc ! h264parse ! mp4mux`，写成 H.264/MP4 文件。
//! 每帧的时间戳按帧序号和整数帧率计算。

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::Frame,
  output::{SinkError, SinkSpec, VideoSink},
};

/// 等待编码器处理完 EOS 的上限
const EOS_TIMEOUT_SECS: u64 = 60;

/// 按输出文件扩展名选择封装格式，未知扩展名使用 MP4
pub fn muxer_for(path: &Path) -> &'static str {
  let ext = path
    .extension()
    .and_then(|e| e.to_str())
    .map(str::to_ascii_lowercase);
  match ext.as_deref() {
    Some("mkv") => "matroskamux",
    Some("avi") => "avimux",
    Some("mov") => "qtmux",
    _ => "mp4mux",
  }
}

fn pipeline_description(muxer: &str) -> String {
  format!(
    "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! \
     x264enc speed-preset=fast ! h264parse ! {muxer} ! filesink name=sink"
  )
}

#[derive(Error, Debug)]
pub enum GStreamerOutputError {
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("推送缓冲区失败: {0}")]
  FlowError(#[from] gst::FlowError),
  #[error("管道中找不到元素 {0}")]
  ElementNotFound(&'static str),
  #[error("元素 {0} 类型不符")]
  ElementConversionFailed(&'static str),
  #[error("管道错误: {0}")]
  PipelineError(String),
}

impl From<GStreamerOutputError> for SinkError {
  fn from(err: GStreamerOutputError) -> Self {
    SinkError::Backend(Box::new(err))
  }
}

/// 基于 GStreamer 的 MP4 视频输出
pub struct GStreamerVideoSink {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  spec: SinkSpec,
  video_info: gst_video::VideoInfo,
  frame_count: u64,
  finished: bool,
}

impl GStreamerVideoSink {
  pub fn create(path: &Path, spec: SinkSpec) -> Result<Self, GStreamerOutputError> {
    gst::init()?;

    let description = pipeline_description(muxer_for(path));
    info!("GStreamer 输出管道: {}", description);
    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerOutputError::PipelineError("无法创建管道".to_string()))?;

    pipeline
      .by_name("sink")
      .ok_or(GStreamerOutputError::ElementNotFound("sink"))?
      .set_property("location", path.to_string_lossy().to_string());

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerOutputError::ElementNotFound("src"))?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerOutputError::ElementConversionFailed("src"))?;

    let video_info =
      gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, spec.width, spec.height)
        .fps(gst::Fraction::new(spec.frame_rate as i32, 1))
        .build()?;
    let caps = video_info.to_caps()?;

    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    let sink = Self {
      pipeline,
      appsrc,
      spec,
      video_info,
      frame_count: 0,
      finished: false,
    };
    sink.pipeline.set_state(gst::State::Playing)?;

    info!(
      "视频输出已创建: {}x{} @ {} fps -> {}",
      spec.width,
      spec.height,
      spec.frame_rate,
      path.display()
    );
    Ok(sink)
  }

  fn push_frame(&mut self, frame: &Frame) -> Result<(), GStreamerOutputError> {
    let row_bytes = self.spec.width as usize * 3;
    let stride = self.video_info.stride()[0] as usize;

    let mut buffer = gst::Buffer::with_size(self.video_info.size())?;
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or_else(|| GStreamerOutputError::PipelineError("缓冲区不可写".to_string()))?;

      let fps = self.spec.frame_rate as u64;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(
        self.frame_count * 1_000_000_000 / fps,
      ));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(1_000_000_000 / fps));

      let mut map = buffer_ref.map_writable()?;
      let data = map.as_mut_slice();
      for (row, pixels) in frame.as_raw().chunks_exact(row_bytes).enumerate() {
        data[row * stride..row * stride + row_bytes].copy_from_slice(pixels);
      }
    }

    self.appsrc.push_buffer(buffer)?;
    self.frame_count += 1;
    Ok(())
  }

  /// 等待 EOS 到达文件端，或管道报错
  fn drain(&self) -> Result<(), GStreamerOutputError> {
    let bus = self
      .pipeline
      .bus()
      .ok_or_else(|| GStreamerOutputError::PipelineError("管道没有总线".to_string()))?;
    let message = bus.timed_pop_filtered(
      gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS),
      &[gst::MessageType::Eos, gst::MessageType::Error],
    );
    match message.as_ref().map(|m| m.view()) {
      Some(gst::MessageView::Eos(_)) => Ok(()),
      Some(gst::MessageView::Error(err)) => Err(GStreamerOutputError::PipelineError(format!(
        "{} ({})",
        err.error(),
        err.debug().map(|d| d.to_string()).unwrap_or_default()
      ))),
      _ => Err(GStreamerOutputError::PipelineError(
        "等待编码结束超时".to_string(),
      )),
    }
  }
}

impl VideoSink for GStreamerVideoSink {
  fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
    if self.finished {
      return Err(SinkError::Finished);
    }
    self.spec.check_frame(frame)?;
    self.push_frame(frame)?;
    debug!("写入第 {} 帧", self.frame_count);
    Ok(())
  }

  fn finish(&mut self) -> Result<(), SinkError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    self
      .appsrc
      .end_of_stream()
      .map_err(GStreamerOutputError::from)?;
    let drained = self.drain();
    self
      .pipeline
      .set_state(gst::State::Null)
      .map_err(GStreamerOutputError::from)?;
    drained?;

    info!("视频输出已关闭，共写入 {} 帧", self.frame_count);
    Ok(())
  }
}

impl Drop for GStreamerVideoSink {
  fn drop(&mut self) {
    if self.finished {
      return;
    }
    warn!("视频输出未正常结束，文件可能不完整");
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 输出管道: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn muxer_follows_the_output_extension() {
    assert_eq!(muxer_for(Path::new("/out/output_drive.mp4")), "mp4mux");
    assert_eq!(muxer_for(Path::new("/out/output_clip.MKV")), "matroskamux");
    assert_eq!(muxer_for(Path::new("output_clip.avi")), "avimux");
    assert_eq!(muxer_for(Path::new("output_clip.mov")), "qtmux");
    assert_eq!(muxer_for(Path::new("output_clip")), "mp4mux");
  }

  #[test]
  fn pipeline_uses_the_chosen_muxer() {
    let description = pipeline_description(muxer_for(Path::new("output_clip.mkv")));
    assert!(description.contains("h264parse ! matroskamux ! filesink"));
    assert!(!description.contains("mp4mux"));
  }
}
