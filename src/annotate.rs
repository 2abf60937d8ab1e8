// 该文件是 Luyan （路眼） 项目的一部分。
// src/annotate.rs - 单帧标注
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

use std::sync::Arc;

use tracing::debug;

use crate::{
  detector::{Detection, DetectionThresholds, ObjectDetector},
  frame::Frame,
  lane::{LaneDetector, LaneParams},
  model::{DetectorModel, InferenceBackend, InferenceError},
};

/// 一帧的标注结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationSummary {
  pub lanes: usize,
  pub detections: Vec<Detection>,
}

/// 先画车道线，再画检测框
pub struct FrameAnnotator<B> {
  lanes: LaneDetector,
  objects: ObjectDetector<B>,
}

impl<B: InferenceBackend> FrameAnnotator<B> {
  pub fn new(model: Arc<DetectorModel<B>>) -> Self {
    Self::with_params(model, LaneParams::default(), DetectionThresholds::default())
  }

  pub fn with_params(
    model: Arc<DetectorModel<B>>,
    lane: LaneParams,
    thresholds: DetectionThresholds,
  ) -> Self {
    Self {
      lanes: LaneDetector::new(lane),
      objects: ObjectDetector::with_thresholds(model, thresholds),
    }
  }

  pub fn model(&self) -> &Arc<DetectorModel<B>> {
    self.objects.model()
  }

  /// 就地标注一帧。推理失败时帧上可能已有车道线。
  pub fn annotate(&self, frame: &mut Frame) -> Result<AnnotationSummary, InferenceError> {
    let lanes = self.lanes.annotate(frame);
    let detections = self.objects.annotate(frame)?;
    debug!("标注完成: {} 条车道线, {} 个目标", lanes, detections.len());
    Ok(AnnotationSummary { lanes, detections })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::Blob,
    model::{ClassLabels, OutputArray},
  };
  use image::{Rgb, RgbImage};

  #[derive(Debug, thiserror::Error)]
  #[error("backend down")]
  struct Down;

  struct Scripted {
    names: Vec<String>,
    rows: Vec<f32>,
    fail: bool,
  }

  impl InferenceBackend for Scripted {
    type Error = Down;

    fn output_layer_names(&self) -> &[String] {
      &self.names
    }

    fn forward(&mut self, _blob: &Blob) -> Result<Vec<OutputArray>, Self::Error> {
      if self.fail {
        return Err(Down);
      }
      Ok(vec![OutputArray::from_dims(
        "out",
        &[1, (self.rows.len() / 7) as i64, 7],
        self.rows.clone(),
      )])
    }
  }

  fn annotator(rows: Vec<f32>, fail: bool) -> FrameAnnotator<Scripted> {
    let labels: ClassLabels = ["person", "car"].into_iter().collect();
    let backend = Scripted {
      names: vec!["out".into()],
      rows,
      fail,
    };
    FrameAnnotator::new(Arc::new(DetectorModel::from_parts(labels, vec![backend]).unwrap()))
  }

  #[test]
  fn empty_scene_is_pixel_identical() {
    let mut frame = RgbImage::from_pixel(320, 240, Rgb([90, 90, 90]));
    let before = frame.clone();
    let summary = annotator(vec![0.5, 0.5, 0.1, 0.1, 0.9, 0.1, 0.2], false)
      .annotate(&mut frame)
      .unwrap();
    assert_eq!(summary, AnnotationSummary::default());
    assert_eq!(frame, before);
  }

  #[test]
  fn detected_object_is_drawn() {
    let mut frame = RgbImage::from_pixel(320, 240, Rgb([90, 90, 90]));
    let before = frame.clone();
    let summary = annotator(vec![0.5, 0.5, 0.25, 0.25, 0.95, 0.05, 0.9], false)
      .annotate(&mut frame)
      .unwrap();
    assert_eq!(summary.lanes, 0);
    assert_eq!(summary.detections.len(), 1);
    assert_eq!(summary.detections[0].label(), "car: 0.90");
    assert_ne!(frame, before);
  }

  #[test]
  fn oversized_box_is_drawn_without_overflow() {
    let mut frame = RgbImage::from_pixel(640, 480, Rgb([90, 90, 90]));
    let summary = annotator(vec![0.5, 0.5, 1.0e7, 0.5, 0.9, 0.1, 0.9], false)
      .annotate(&mut frame)
      .unwrap();
    assert_eq!(summary.detections.len(), 1);
    let b = summary.detections[0].bbox;
    assert_eq!((b.x, b.y, b.width), (-320, 120, 1280));
    // 上边缘横贯整帧
    assert_ne!(*frame.get_pixel(320, 120), Rgb([90, 90, 90]));
  }

  #[test]
  fn inference_failure_is_reported() {
    let mut frame = RgbImage::new(64, 64);
    assert!(matches!(
      annotator(Vec::new(), true).annotate(&mut frame),
      Err(InferenceError::Backend(_))
    ));
  }
}
