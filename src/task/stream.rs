// 该文件是 Luyan （路眼） 项目的一部分。
// src/task/stream.rs - 逐帧交互处理
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

use std::io::{self, BufRead, Write};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  annotate::FrameAnnotator,
  detector::Detection,
  frame::{decode_image, encode_jpeg},
  model::{InferenceBackend, InferenceError},
};

#[derive(Error, Debug)]
pub enum StreamError {
  #[error("负载不是有效的 UTF-8 文本: {0}")]
  Text(#[from] std::str::Utf8Error),
  #[error("负载不是有效的 base64: {0}")]
  Payload(#[from] base64::DecodeError),
  #[error("无法解码图像: {0}")]
  Decode(#[source] image::ImageError),
  #[error("推理失败: {0}")]
  Inference(#[from] InferenceError),
  #[error("无法编码 JPEG: {0}")]
  Encode(#[source] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  EmptyPayload,
}

#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
  pub jpeg: Vec<u8>,
  pub width: u32,
  pub height: u32,
  pub lanes: usize,
  pub detections: Vec<Detection>,
}

/// 单帧处理结果
#[derive(Debug)]
pub enum FrameOutcome {
  Annotated(AnnotatedFrame),
  Skipped(SkipReason),
  Failed(StreamError),
}

impl FrameOutcome {
  /// 只有标注成功才有回应；失败在这里记录
  pub fn into_response(self) -> Option<Vec<u8>> {
    match self {
      FrameOutcome::Annotated(frame) => Some(frame.jpeg),
      FrameOutcome::Skipped(reason) => {
        debug!("跳过: {:?}", reason);
        None
      }
      FrameOutcome::Failed(e) => {
        error!("处理帧失败: {}", e);
        None
      }
    }
  }

  pub fn is_annotated(&self) -> bool {
    matches!(self, FrameOutcome::Annotated(_))
  }
}

/// 解码文本负载，可带 `data:<mime>;base64,` 前缀
pub fn decode_payload(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
  let text = text.trim();
  let body = match text.strip_prefix("data:") {
    Some(rest) => rest.split_once(',').map_or(rest, |(_, body)| body),
    None => text,
  };
  STANDARD.decode(body)
}

/// 一次会话的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
  pub lines: usize,
  pub responses: usize,
}

/// 逐帧处理器：解码、标注、编码为 JPEG
pub struct StreamProcessor<B> {
  annotator: FrameAnnotator<B>,
}

impl<B: InferenceBackend> StreamProcessor<B> {
  pub fn new(annotator: FrameAnnotator<B>) -> Self {
    Self { annotator }
  }

  /// `payload` 为任意可识别格式的编码图像
  pub fn process(&self, payload: &[u8]) -> FrameOutcome {
    if payload.is_empty() {
      return FrameOutcome::Skipped(SkipReason::EmptyPayload);
    }
    match self.try_process(payload) {
      Ok(frame) => FrameOutcome::Annotated(frame),
      Err(e) => FrameOutcome::Failed(e),
    }
  }

  /// 处理一行 base64 文本负载
  pub fn process_base64(&self, text: &str) -> FrameOutcome {
    if text.trim().is_empty() {
      return FrameOutcome::Skipped(SkipReason::EmptyPayload);
    }
    match decode_payload(text) {
      Ok(payload) => self.process(&payload),
      Err(e) => FrameOutcome::Failed(e.into()),
    }
  }

  /// 处理一行原始字节，非 UTF-8 的行视为该帧失败
  pub fn process_line(&self, line: &[u8]) -> FrameOutcome {
    match std::str::from_utf8(line) {
      Ok(text) => self.process_base64(text),
      Err(e) => FrameOutcome::Failed(e.into()),
    }
  }

  /// 逐行读取 base64 负载，每个标注成功的帧写出一行 base64 JPEG
  ///
  /// 单帧失败只记录日志，读到 EOF 或发生 I/O 错误才结束。
  pub fn serve<R: BufRead, W: Write>(
    &self,
    mut input: R,
    mut output: W,
  ) -> io::Result<StreamSummary> {
    let mut summary = StreamSummary::default();
    let mut buf = Vec::new();
    loop {
      buf.clear();
      if input.read_until(b'\n', &mut buf)? == 0 {
        break;
      }
      summary.lines += 1;
      if let Some(jpeg) = self.process_line(&buf).into_response() {
        writeln!(output, "{}", STANDARD.encode(jpeg))?;
        output.flush()?;
        summary.responses += 1;
      }
    }
    Ok(summary)
  }

  fn try_process(&self, payload: &[u8]) -> Result<AnnotatedFrame, StreamError> {
    let mut frame = decode_image(payload).map_err(StreamError::Decode)?;
    let summary = self.annotator.annotate(&mut frame)?;
    let jpeg = encode_jpeg(&frame).map_err(StreamError::Encode)?;
    info!(
      "帧 {}x{}: {} 条车道线, {} 个目标",
      frame.width(),
      frame.height(),
      summary.lanes,
      summary.detections.len()
    );
    Ok(AnnotatedFrame {
      jpeg,
      width: frame.width(),
      height: frame.height(),
      lanes: summary.lanes,
      detections: summary.detections,
    })
  }
}
