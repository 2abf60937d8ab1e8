// 该文件是 Luyan （路眼） 项目的一部分。
// src/detector.rs - 目标检测
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
  frame::{Blob, Frame},
  model::{ClassLabels, DetectorModel, InferenceBackend, InferenceError, OutputArray},
  output::draw::{LabelFont, draw_detections},
};

pub mod nms;

pub use self::nms::non_max_suppression;

/// 像素坐标下的检测框，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxRect {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

impl BoxRect {
  pub fn area(&self) -> f32 {
    self.width.max(0) as f32 * self.height.max(0) as f32
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub bbox: BoxRect,
  pub confidence: f32,
  pub class_id: usize,
  pub class_name: String,
}

impl Detection {
  /// 画在框上方的标签文本
  pub fn label(&self) -> String {
    format!("{}: {:.2}", self.class_name, self.confidence)
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionThresholds {
  /// 置信度下限，严格大于才保留
  pub confidence: f32,
  /// IoU 大于该值的框被抑制
  pub nms: f32,
}

impl Default for DetectionThresholds {
  fn default() -> Self {
    Self {
      confidence: 0.5,
      nms: 0.4,
    }
  }
}

/// 类别分数在行内的起始位置：带 objectness 为 5，不带为 4
fn class_offset(layer: &OutputArray, classes: usize) -> Result<usize, InferenceError> {
  if layer.cols == classes + 5 {
    Ok(5)
  } else if layer.cols == classes + 4 {
    Ok(4)
  } else {
    Err(InferenceError::UnexpectedLayout {
      layer: layer.name.clone(),
      cols: layer.cols,
      classes,
    })
  }
}

/// 还原到像素坐标，并限制在帧尺寸的两倍以内，越界或非有限的网络输出不会溢出后续的整数运算
fn to_pixels(value: f32, scale: f32, limit: f32) -> i32 {
  (value * scale).clamp(-limit, limit) as i32
}

/// 把所有输出层的行解码为候选框，坐标按原始帧尺寸还原
///
/// 只保留最高类别分数严格大于 `confidence_threshold` 的行，结果尚未做抑制。
pub fn decode_outputs(
  outputs: &[OutputArray],
  labels: &ClassLabels,
  frame_width: u32,
  frame_height: u32,
  confidence_threshold: f32,
) -> Result<Vec<Detection>, InferenceError> {
  let (fw, fh) = (frame_width as f32, frame_height as f32);
  let limit = 2.0 * fw.max(fh);
  let mut candidates = Vec::new();

  for layer in outputs {
    if layer.rows == 0 {
      continue;
    }
    let offset = class_offset(layer, labels.len())?;

    for row in layer.iter_rows() {
      let Some((class_id, confidence)) = row[offset..]
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, s)| match best {
          Some((_, b)) if b >= s => best,
          _ => Some((i, s)),
        })
      else {
        continue;
      };
      if confidence <= confidence_threshold {
        continue;
      }

      let cx = to_pixels(row[0], fw, limit);
      let cy = to_pixels(row[1], fh, limit);
      let w = to_pixels(row[2], fw, limit);
      let h = to_pixels(row[3], fh, limit);

      candidates.push(Detection {
        bbox: BoxRect {
          x: (cx as f32 - w as f32 / 2.0) as i32,
          y: (cy as f32 - h as f32 / 2.0) as i32,
          width: w,
          height: h,
        },
        confidence,
        class_id,
        class_name: labels.name(class_id).unwrap_or_default().to_string(),
      });
    }
  }

  Ok(candidates)
}

/// 基于共享检测模型的目标检测器
pub struct ObjectDetector<B> {
  model: Arc<DetectorModel<B>>,
  thresholds: DetectionThresholds,
  font: LabelFont,
}

impl<B: InferenceBackend> ObjectDetector<B> {
  pub fn new(model: Arc<DetectorModel<B>>) -> Self {
    Self::with_thresholds(model, DetectionThresholds::default())
  }

  pub fn with_thresholds(model: Arc<DetectorModel<B>>, thresholds: DetectionThresholds) -> Self {
    Self {
      model,
      thresholds,
      font: LabelFont::default(),
    }
  }

  pub fn model(&self) -> &Arc<DetectorModel<B>> {
    &self.model
  }

  pub fn thresholds(&self) -> &DetectionThresholds {
    &self.thresholds
  }

  /// 推理并返回抑制后的检测结果，不修改帧
  pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
    let blob = Blob::from_frame(frame, self.model.input_size());
    let outputs = self.model.forward(&blob)?;

    let candidates = decode_outputs(
      &outputs,
      self.model.labels(),
      frame.width(),
      frame.height(),
      self.thresholds.confidence,
    )?;
    let total = candidates.len();
    let kept = non_max_suppression(candidates, self.thresholds.confidence, self.thresholds.nms);
    debug!("候选框 {} 个，抑制后保留 {} 个", total, kept.len());
    Ok(kept)
  }

  /// 检测并把框和标签画到帧上；没有检测结果时帧保持不变
  pub fn annotate(&self, frame: &mut Frame) -> Result<Vec<Detection>, InferenceError> {
    let detections = self.detect(frame)?;
    draw_detections(frame, &detections, self.model.palette(), &self.font);
    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn labels() -> ClassLabels {
    ["person", "car", "truck"].into_iter().collect()
  }

  fn layer(cols: usize, rows: Vec<Vec<f32>>) -> OutputArray {
    let n = rows.len() as i64;
    OutputArray::from_dims("yolo", &[n, cols as i64], rows.into_iter().flatten().collect())
  }

  #[test]
  fn label_has_two_decimals() {
    let d = Detection {
      bbox: BoxRect {
        x: 0,
        y: 0,
        width: 1,
        height: 1,
      },
      confidence: 0.9,
      class_id: 0,
      class_name: "car".into(),
    };
    assert_eq!(d.label(), "car: 0.90");
  }

  #[test]
  fn rows_are_denormalized_to_frame_pixels() {
    let out = layer(8, vec![vec![0.5, 0.5, 0.25, 0.5, 0.99, 0.1, 0.9, 0.2]]);
    let dets = decode_outputs(&[out], &labels(), 640, 480, 0.5).unwrap();
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].class_id, 1);
    assert_eq!(dets[0].class_name, "car");
    assert_eq!(
      dets[0].bbox,
      BoxRect {
        x: 240,
        y: 120,
        width: 160,
        height: 240
      }
    );
  }

  #[test]
  fn confidence_must_exceed_the_floor() {
    let out = layer(
      8,
      vec![
        vec![0.2, 0.2, 0.1, 0.1, 1.0, 0.5, 0.0, 0.0],
        vec![0.7, 0.7, 0.1, 0.1, 1.0, 0.50001, 0.0, 0.0],
      ],
    );
    let dets = decode_outputs(&[out], &labels(), 100, 100, 0.5).unwrap();
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].bbox.x, 65);
  }

  #[test]
  fn oversized_geometry_is_clamped_to_the_frame_scale() {
    let out = layer(
      8,
      vec![
        vec![0.5, 0.5, 1.0e7, 0.5, 0.9, 0.1, 0.9, 0.0],
        vec![f32::NAN, f32::INFINITY, 0.1, f32::NEG_INFINITY, 0.9, 0.0, 0.0, 0.9],
      ],
    );
    let dets = decode_outputs(&[out], &labels(), 640, 480, 0.5).unwrap();
    assert_eq!(dets.len(), 2);
    assert_eq!(dets[0].bbox.width, 1280);
    assert_eq!(dets[0].bbox.x, 320 - 640);
    assert_eq!(dets[1].bbox.height, -1280);
    for d in &dets {
      let b = d.bbox;
      for v in [b.x, b.y, b.width, b.height] {
        assert!(v.abs() <= 1280 + 640, "{:?}", b);
      }
    }
  }

  #[test]
  fn rows_without_objectness_are_accepted() {
    let out = layer(7, vec![vec![0.5, 0.5, 0.2, 0.2, 0.0, 0.0, 0.8]]);
    let dets = decode_outputs(&[out], &labels(), 100, 100, 0.5).unwrap();
    assert_eq!(dets[0].class_name, "truck");
  }

  #[test]
  fn mismatched_row_width_is_an_error() {
    let out = layer(6, vec![vec![0.5; 6]]);
    assert!(matches!(
      decode_outputs(&[out], &labels(), 100, 100, 0.5),
      Err(InferenceError::UnexpectedLayout { cols: 6, classes: 3, .. })
    ));
  }

  #[test]
  fn candidates_from_every_layer_are_collected() {
    let a = layer(8, vec![vec![0.1, 0.1, 0.1, 0.1, 1.0, 0.9, 0.0, 0.0]]);
    let b = layer(8, vec![vec![0.8, 0.8, 0.1, 0.1, 1.0, 0.0, 0.0, 0.7]]);
    let dets = decode_outputs(&[a, b], &labels(), 200, 200, 0.5).unwrap();
    assert_eq!(dets.len(), 2);
  }
}
