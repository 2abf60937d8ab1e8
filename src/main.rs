// 该文件是 Luyan （路眼） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use args::{Args, BatchArgs, Command, ModelArgs, StreamArgs};
use luyan::{
  FromUrl,
  annotate::FrameAnnotator,
  detector::DetectionThresholds,
  lane::LaneParams,
  model::{DetectorModel, DetectorModelBuilder, OrtBackend},
  task::{BatchProcessor, DroppedFramePolicy, GStreamerBackend, SamplingPolicy, StreamProcessor},
};

fn load_annotator(args: &ModelArgs) -> Result<FrameAnnotator<OrtBackend>> {
  info!("模型: {}", args.model);
  let model: DetectorModel<OrtBackend> = DetectorModelBuilder::from_url(&args.model)?.build()?;
  Ok(FrameAnnotator::with_params(
    Arc::new(model),
    LaneParams::default(),
    DetectionThresholds {
      confidence: args.confidence,
      nms: args.nms_threshold,
    },
  ))
}

fn run_batch(args: BatchArgs) -> Result<()> {
  let annotator = load_annotator(&args.model)?;

  let stop = Arc::new(AtomicBool::new(false));
  let flag = stop.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    flag.store(true, Ordering::Relaxed);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理函数")?;

  let sampling = SamplingPolicy {
    sample_every_nth_frame: args.sample_every,
    dropped: if args.pass_through {
      DroppedFramePolicy::PassThrough
    } else {
      DroppedFramePolicy::Drop
    },
  };
  let processor = BatchProcessor::new(annotator)
    .with_sampling(sampling)
    .with_stop_flag(stop);

  let report = processor.run(&GStreamerBackend, &args.input, &args.output_dir)?;
  info!(
    "完成: {} ({} 帧, 耗时 {:.2} 秒)",
    report.output.display(),
    report.frames_written,
    report.elapsed.as_secs_f64()
  );
  Ok(())
}

fn run_stream(args: StreamArgs) -> Result<()> {
  let processor = StreamProcessor::new(load_annotator(&args.model)?);
  info!("等待标准输入中的图像...");

  let summary = processor
    .serve(std::io::stdin().lock(), std::io::stdout().lock())
    .context("读写标准输入输出失败")?;

  info!("输入结束，退出: 共 {} 行, {} 帧已标注", summary.lines, summary.responses);
  Ok(())
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  match Args::parse().command {
    Command::Batch(args) => run_batch(args),
    Command::Stream(args) => run_stream(args),
  }
}
