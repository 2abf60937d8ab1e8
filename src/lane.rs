// 该文件是 Luyan （路眼） 项目的一部分。
// src/lane.rs - 车道线检测
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

use image::{GrayImage, Luma};
use imageproc::{drawing::draw_polygon_mut, edges::canny, filter::separable_filter_equal, point::Point};
use tracing::debug;

use crate::{frame::Frame, output::draw::draw_lane_segments};

pub mod hough;

pub use self::hough::{HoughParams, probabilistic_hough};

/// 5×5 二项式平滑核（可分离）
const SMOOTHING_KERNEL: [f32; 5] = [0.0625, 0.25, 0.375, 0.25, 0.0625];

/// 车道线颜色，检测框颜色的每个通道都小于 255，因此不会与之重合
pub const LANE_COLOR: [u8; 3] = [255, 255, 0];

/// 像素坐标下的一条线段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSegment {
  pub start: (i32, i32),
  pub end: (i32, i32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneParams {
  pub canny_low: f32,
  pub canny_high: f32,
  /// 梯形底边两端距图像左右边缘的距离
  pub roi_bottom_inset: i32,
  /// 梯形顶边（图像半高处）的半宽
  pub roi_top_half_width: i32,
  pub hough: HoughParams,
  pub color: [u8; 3],
  pub thickness: u32,
}

impl Default for LaneParams {
  fn default() -> Self {
    Self {
      canny_low: 50.0,
      canny_high: 150.0,
      roi_bottom_inset: 50,
      roi_top_half_width: 50,
      hough: HoughParams::default(),
      color: LANE_COLOR,
      thickness: 3,
    }
  }
}

/// 以图像底边和半高处为锚点的梯形感兴趣区域
pub fn region_of_interest(width: u32, height: u32, params: &LaneParams) -> Vec<Point<i32>> {
  let (w, h) = (width as i32, height as i32);
  let mut polygon = vec![
    Point::new(params.roi_bottom_inset, h),
    Point::new(w / 2 - params.roi_top_half_width, h / 2),
    Point::new(w / 2 + params.roi_top_half_width, h / 2),
    Point::new(w - params.roi_bottom_inset, h),
  ];
  // 窄图像上底边两端可能重合
  if polygon.first() == polygon.last() {
    polygon.pop();
  }
  polygon
}

/// 无状态的车道线检测器
#[derive(Debug, Clone, Default)]
pub struct LaneDetector {
  params: LaneParams,
}

impl LaneDetector {
  pub fn new(params: LaneParams) -> Self {
    Self { params }
  }

  pub fn params(&self) -> &LaneParams {
    &self.params
  }

  /// 感兴趣区域内的边缘图
  pub fn masked_edges(&self, frame: &Frame) -> GrayImage {
    let gray = image::imageops::grayscale(frame);
    let smoothed: GrayImage = separable_filter_equal(&gray, &SMOOTHING_KERNEL);
    let mut edges = canny(&smoothed, self.params.canny_low, self.params.canny_high);

    let mut mask = GrayImage::new(frame.width(), frame.height());
    draw_polygon_mut(
      &mut mask,
      &region_of_interest(frame.width(), frame.height(), &self.params),
      Luma([255u8]),
    );

    for (edge, keep) in edges.pixels_mut().zip(mask.pixels()) {
      edge[0] &= keep[0];
    }
    edges
  }

  pub fn detect(&self, frame: &Frame) -> Vec<LineSegment> {
    if frame.width() == 0 || frame.height() == 0 {
      return Vec::new();
    }
    let edges = self.masked_edges(frame);
    let lines = probabilistic_hough(&edges, &self.params.hough);
    debug!("检测到 {} 条车道线段", lines.len());
    lines
  }

  /// 检测并把线段画到帧上，返回线段数；没有线段时帧保持不变
  pub fn annotate(&self, frame: &mut Frame) -> usize {
    let lines = self.detect(frame);
    draw_lane_segments(frame, &lines, self.params.color, self.params.thickness);
    lines.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn stripe(frame: &mut RgbImage, from: (i32, i32), to: (i32, i32), half_width: i32) {
    let poly = [
      Point::new(from.0 - half_width, from.1),
      Point::new(from.0 + half_width, from.1),
      Point::new(to.0 + half_width, to.1),
      Point::new(to.0 - half_width, to.1),
    ];
    draw_polygon_mut(frame, &poly, Rgb([255, 255, 255]));
  }

  fn has_lane_pixel(frame: &RgbImage) -> bool {
    frame.pixels().any(|p| p.0 == LANE_COLOR)
  }

  #[test]
  fn roi_matches_frame_geometry() {
    let roi = region_of_interest(640, 480, &LaneParams::default());
    assert_eq!(
      roi,
      vec![
        Point::new(50, 480),
        Point::new(270, 240),
        Point::new(370, 240),
        Point::new(590, 480)
      ]
    );
  }

  #[test]
  fn roi_on_narrow_frame_has_no_repeated_vertex() {
    let roi = region_of_interest(100, 80, &LaneParams::default());
    assert_eq!(roi.len(), 3);
  }

  #[test]
  fn blank_frame_is_untouched() {
    let mut frame = RgbImage::from_pixel(640, 480, Rgb([40, 40, 40]));
    let before = frame.clone();
    assert_eq!(LaneDetector::default().annotate(&mut frame), 0);
    assert_eq!(frame, before);
  }

  #[test]
  fn edges_outside_roi_are_ignored() {
    let mut frame = RgbImage::from_pixel(640, 480, Rgb([0, 0, 0]));
    // 天际线区域的强边缘
    for y in (10..100).step_by(12) {
      imageproc::drawing::draw_filled_rect_mut(
        &mut frame,
        imageproc::rect::Rect::at(20, y).of_size(600, 4),
        Rgb([255, 255, 255]),
      );
    }
    let before = frame.clone();

    assert_eq!(LaneDetector::default().annotate(&mut frame), 0);
    assert_eq!(frame, before);
  }

  #[test]
  fn lane_marking_inside_roi_is_drawn() {
    let mut frame = RgbImage::from_pixel(640, 480, Rgb([0, 0, 0]));
    stripe(&mut frame, (120, 470), (300, 260), 4);

    let detector = LaneDetector::default();
    let count = detector.annotate(&mut frame);
    assert!(count > 0);
    assert!(has_lane_pixel(&frame));
  }
}
