// 该文件是 Luyan （路眼） 项目的一部分。
// src/task/batch.rs - 视频文件批处理
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

//! 读取整个视频文件，按采样间隔标注帧，写出 `output_<原文件名>`。
//!
//! 任务状态依次为 `Opening → Streaming → Finalizing → Done`；
//! 打开视频源或创建输出失败时直接进入 `Failed`，不留下输出文件。

use std::{
  fs,
  num::NonZeroU32,
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  annotate::FrameAnnotator,
  input::{SourceOpenError, VideoSource},
  model::InferenceBackend,
  output::{SinkError, SinkSpec, VideoSink, output_path_for},
  task::VideoBackend,
};

/// 默认每两帧标注一帧
pub const DEFAULT_SAMPLE_EVERY_NTH_FRAME: NonZeroU32 = NonZeroU32::MIN.saturating_add(1);

#[derive(Error, Debug)]
pub enum BatchError {
  #[error("无法从 {} 得到输出文件名", .0.display())]
  InvalidSourceName(PathBuf),
  #[error(transparent)]
  SourceOpen(#[from] SourceOpenError),
  #[error("无法创建输出目录 {}: {source}", path.display())]
  OutputDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("视频输出失败: {0}")]
  Sink(#[from] SinkError),
}

/// 未被采样的帧如何处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DroppedFramePolicy {
  /// 不写入输出
  #[default]
  Drop,
  /// 原样写入输出
  PassThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPolicy {
  pub sample_every_nth_frame: NonZeroU32,
  pub dropped: DroppedFramePolicy,
}

impl Default for SamplingPolicy {
  fn default() -> Self {
    Self {
      sample_every_nth_frame: DEFAULT_SAMPLE_EVERY_NTH_FRAME,
      dropped: DroppedFramePolicy::default(),
    }
  }
}

impl SamplingPolicy {
  /// `frame_index` 从 1 开始计数
  pub fn is_sampled(&self, frame_index: u64) -> bool {
    frame_index % self.sample_every_nth_frame.get() as u64 == 0
  }
}

/// 输出帧率：向下取整，至少为 1
pub fn output_frame_rate(source_fps: f64) -> u32 {
  (source_fps as u32).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
  Opening,
  Streaming,
  Finalizing,
  Done,
  Failed,
}

/// 一次批处理任务的上下文
#[derive(Debug, Clone)]
pub struct BatchJob {
  pub source: PathBuf,
  pub output: PathBuf,
  pub width: u32,
  pub height: u32,
  pub frame_rate: u32,
  /// 已读取的帧数，也是最近一帧的序号（从 1 开始）
  pub frame_index: u64,
  pub state: BatchState,
}

impl BatchJob {
  fn transition(&mut self, next: BatchState) {
    info!("{}: {:?} -> {:?}", self.source.display(), self.state, next);
    self.state = next;
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
  pub output: PathBuf,
  pub width: u32,
  pub height: u32,
  pub frame_rate: u32,
  pub frames_read: u64,
  pub frames_annotated: u64,
  /// 推理失败而跳过的采样帧
  pub frames_failed: u64,
  pub frames_written: u64,
  /// 读取中途出错，之后的帧被放弃
  pub truncated: bool,
  /// 收到停止请求而提前结束
  pub interrupted: bool,
  pub elapsed: Duration,
}

/// 视频文件批处理器
pub struct BatchProcessor<B> {
  annotator: FrameAnnotator<B>,
  sampling: SamplingPolicy,
  stop: Option<Arc<AtomicBool>>,
}

impl<B: InferenceBackend> BatchProcessor<B> {
  pub fn new(annotator: FrameAnnotator<B>) -> Self {
    Self {
      annotator,
      sampling: SamplingPolicy::default(),
      stop: None,
    }
  }

  pub fn with_sampling(mut self, sampling: SamplingPolicy) -> Self {
    self.sampling = sampling;
    self
  }

  /// 每帧之间检查该标志，置位后结束读取并正常收尾
  pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop = Some(stop);
    self
  }

  pub fn sampling(&self) -> &SamplingPolicy {
    &self.sampling
  }

  pub fn run<V: VideoBackend>(
    &self,
    backend: &V,
    source: &Path,
    output_dir: &Path,
  ) -> Result<BatchReport, BatchError> {
    let started = Instant::now();
    let mut job = BatchJob {
      source: source.to_path_buf(),
      output: PathBuf::new(),
      width: 0,
      height: 0,
      frame_rate: 0,
      frame_index: 0,
      state: BatchState::Opening,
    };
    info!("开始批处理: {}", source.display());

    let (input, mut sink) = match self.open(backend, &mut job, output_dir) {
      Ok(opened) => opened,
      Err(e) => {
        error!("批处理失败: {}", e);
        job.transition(BatchState::Failed);
        return Err(e);
      }
    };

    job.transition(BatchState::Streaming);
    let mut report = BatchReport {
      output: job.output.clone(),
      width: job.width,
      height: job.height,
      frame_rate: job.frame_rate,
      frames_read: 0,
      frames_annotated: 0,
      frames_failed: 0,
      frames_written: 0,
      truncated: false,
      interrupted: false,
      elapsed: Duration::ZERO,
    };

    if let Err(e) = self.stream(input, &mut sink, &mut job, &mut report) {
      error!("写入输出失败，放弃任务: {}", e);
      drop(sink);
      remove_partial_output(&job.output);
      job.transition(BatchState::Failed);
      return Err(e.into());
    }

    job.transition(BatchState::Finalizing);
    if let Err(e) = sink.finish() {
      error!("关闭输出失败: {}", e);
      drop(sink);
      remove_partial_output(&job.output);
      job.transition(BatchState::Failed);
      return Err(e.into());
    }

    report.elapsed = started.elapsed();
    job.transition(BatchState::Done);
    info!(
      "批处理完成，耗时 {:.2?}: 读取 {} 帧, 标注 {} 帧, 写入 {} 帧 -> {}",
      report.elapsed,
      report.frames_read,
      report.frames_annotated,
      report.frames_written,
      report.output.display()
    );
    Ok(report)
  }

  fn open<V: VideoBackend>(
    &self,
    backend: &V,
    job: &mut BatchJob,
    output_dir: &Path,
  ) -> Result<(V::Source, V::Sink), BatchError> {
    job.output = output_path_for(&job.source, output_dir)
      .ok_or_else(|| BatchError::InvalidSourceName(job.source.clone()))?;

    let input = backend.open_source(&job.source)?;
    job.width = input.width();
    job.height = input.height();
    job.frame_rate = output_frame_rate(input.frame_rate());
    info!(
      "视频源 {}x{}, 帧率 {:.3} -> 输出帧率 {}",
      job.width,
      job.height,
      input.frame_rate(),
      job.frame_rate
    );

    fs::create_dir_all(output_dir).map_err(|source| BatchError::OutputDir {
      path: output_dir.to_path_buf(),
      source,
    })?;

    let spec = SinkSpec {
      width: job.width,
      height: job.height,
      frame_rate: job.frame_rate,
    };
    let sink = backend.create_sink(&job.output, spec).inspect_err(|_| {
      remove_partial_output(&job.output);
    })?;
    Ok((input, sink))
  }

  /// 只有写入输出失败才返回错误，读取和推理错误在这里消化
  fn stream<S: VideoSource, K: VideoSink>(
    &self,
    input: S,
    sink: &mut K,
    job: &mut BatchJob,
    report: &mut BatchReport,
  ) -> Result<(), SinkError> {
    let mut last = Instant::now();

    for item in input {
      if self.stop.as_ref().is_some_and(|s| s.load(Ordering::Relaxed)) {
        warn!("收到停止请求，结束读取");
        report.interrupted = true;
        break;
      }

      let mut frame = match item {
        Ok(frame) => frame,
        Err(e) => {
          warn!("读取第 {} 帧失败，提前结束: {}", job.frame_index + 1, e);
          report.truncated = true;
          break;
        }
      };
      job.frame_index += 1;
      report.frames_read += 1;

      if !self.sampling.is_sampled(job.frame_index) {
        if self.sampling.dropped == DroppedFramePolicy::PassThrough {
          sink.write_frame(&frame)?;
          report.frames_written += 1;
        }
        continue;
      }

      match self.annotator.annotate(&mut frame) {
        Ok(summary) => {
          report.frames_annotated += 1;
          debug!(
            "第 {} 帧: {} 条车道线, {} 个目标",
            job.frame_index,
            summary.lanes,
            summary.detections.len()
          );
        }
        Err(e) => {
          warn!("第 {} 帧推理失败，跳过: {}", job.frame_index, e);
          report.frames_failed += 1;
          continue;
        }
      }

      sink.write_frame(&frame)?;
      report.frames_written += 1;
      info!("处理第 {} 帧，耗时: {:.2?}", job.frame_index, last.elapsed());
      last = Instant::now();
    }

    Ok(())
  }
}

fn remove_partial_output(path: &Path) {
  match fs::remove_file(path) {
    Ok(()) => info!("已删除不完整的输出: {}", path.display()),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => warn!("无法删除不完整的输出 {}: {}", path.display(), e),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_sampling_takes_even_frames() {
    let policy = SamplingPolicy::default();
    let sampled: Vec<u64> = (1..=9).filter(|&i| policy.is_sampled(i)).collect();
    assert_eq!(sampled, [2, 4, 6, 8]);
    assert_eq!(policy.dropped, DroppedFramePolicy::Drop);
  }

  #[test]
  fn sampling_every_frame() {
    let policy = SamplingPolicy {
      sample_every_nth_frame: NonZeroU32::MIN,
      ..Default::default()
    };
    assert!((1..=5).all(|i| policy.is_sampled(i)));
  }

  #[test]
  fn frame_rate_is_floored_to_at_least_one() {
    assert_eq!(output_frame_rate(29.97), 29);
    assert_eq!(output_frame_rate(30.0), 30);
    assert_eq!(output_frame_rate(0.0), 1);
    assert_eq!(output_frame_rate(0.5), 1);
    assert_eq!(output_frame_rate(f64::NAN), 1);
    assert_eq!(output_frame_rate(-3.0), 1);
  }
}
