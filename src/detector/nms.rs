// 该文件是 Luyan （路眼） 项目的一部分。
// src/detector/nms.rs - 非极大值抑制
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

use super::{BoxRect, Detection};

/// 两个框的交并比，面积按整数像素计
pub fn iou(a: &BoxRect, b: &BoxRect) -> f32 {
  let (ax, ay, aw, ah) = (a.x as i64, a.y as i64, a.width as i64, a.height as i64);
  let (bx, by, bw, bh) = (b.x as i64, b.y as i64, b.width as i64, b.height as i64);
  let left = ax.max(bx);
  let top = ay.max(by);
  let right = (ax + aw).min(bx + bw);
  let bottom = (ay + ah).min(by + bh);

  let inter = if right > left && bottom > top {
    (right - left) as f32 * (bottom - top) as f32
  } else {
    0.0
  };
  let union = a.area() + b.area() - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 贪心、不区分类别的非极大值抑制
///
/// 置信度严格大于 `score_threshold` 的候选按置信度从高到低（同分保持原顺序）依次考察，
/// 与任一已保留框的 IoU 大于 `iou_threshold` 即被抑制。
pub fn non_max_suppression(
  candidates: Vec<Detection>,
  score_threshold: f32,
  iou_threshold: f32,
) -> Vec<Detection> {
  let mut ranked: Vec<Detection> = candidates
    .into_iter()
    .filter(|d| d.confidence > score_threshold)
    .collect();
  ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept: Vec<Detection> = Vec::with_capacity(ranked.len());
  for candidate in ranked {
    if kept
      .iter()
      .all(|k| iou(&k.bbox, &candidate.bbox) <= iou_threshold)
    {
      kept.push(candidate);
    }
  }
  kept
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(x: i32, y: i32, w: i32, h: i32, confidence: f32, class_id: usize) -> Detection {
    Detection {
      bbox: BoxRect {
        x,
        y,
        width: w,
        height: h,
      },
      confidence,
      class_id,
      class_name: format!("c{class_id}"),
    }
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let b = BoxRect {
      x: 10,
      y: 10,
      width: 20,
      height: 20,
    };
    assert_eq!(iou(&b, &b), 1.0);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    let a = BoxRect {
      x: 0,
      y: 0,
      width: 10,
      height: 10,
    };
    let b = BoxRect {
      x: 20,
      y: 20,
      width: 10,
      height: 10,
    };
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn iou_handles_extreme_coordinates() {
    let huge = BoxRect {
      x: i32::MAX - 5,
      y: i32::MAX - 5,
      width: i32::MAX,
      height: i32::MAX,
    };
    let small = BoxRect {
      x: 0,
      y: 0,
      width: 10,
      height: 10,
    };
    assert_eq!(iou(&huge, &small), 0.0);
    let v = iou(&huge, &huge);
    assert!(v.is_finite());
  }

  #[test]
  fn heavy_overlap_keeps_only_the_stronger() {
    // IoU = 80 / 120
    let kept = non_max_suppression(
      vec![det(0, 0, 10, 10, 0.7, 0), det(2, 0, 10, 10, 0.9, 1)],
      0.5,
      0.4,
    );
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].confidence, 0.9);
    assert_eq!(kept[0].class_id, 1);
  }

  #[test]
  fn light_overlap_keeps_both() {
    // IoU = 40 / 160 = 0.25
    let kept = non_max_suppression(
      vec![det(0, 0, 10, 10, 0.9, 0), det(6, 0, 10, 10, 0.8, 0)],
      0.5,
      0.4,
    );
    assert_eq!(kept.len(), 2);
    assert!(kept[0].confidence > kept[1].confidence);
  }

  #[test]
  fn overlap_exactly_at_threshold_is_kept() {
    // 交集 40，并集 100：IoU 恰为 0.4
    let a = det(0, 0, 10, 7, 0.9, 0);
    let b = det(0, 3, 10, 7, 0.8, 0);
    assert!((iou(&a.bbox, &b.bbox) - 0.4).abs() < 1e-6);
    assert_eq!(non_max_suppression(vec![a, b], 0.5, 0.4).len(), 2);
  }

  #[test]
  fn scores_at_the_floor_are_dropped() {
    let kept = non_max_suppression(
      vec![det(0, 0, 10, 10, 0.5, 0), det(50, 50, 10, 10, 0.50001, 0)],
      0.5,
      0.4,
    );
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].bbox.x, 50);
  }

  #[test]
  fn suppression_ignores_class() {
    let kept = non_max_suppression(
      vec![det(0, 0, 10, 10, 0.9, 0), det(0, 0, 10, 10, 0.8, 3)],
      0.5,
      0.4,
    );
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].class_id, 0);
  }
}
