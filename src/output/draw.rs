// 该文件是 Luyan （路眼） 项目的一部分。
// src/output/draw.rs - 检测结果与车道线可视化
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

use ab_glyph::{FontRef, PxScale};
use image::Rgb;
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size},
  rect::Rect,
};

use crate::{detector::Detection, frame::Frame, lane::LineSegment, model::Palette};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
/// 标签基线在框上边缘之上的距离
const LABEL_BASELINE_OFFSET: i32 = 10;
const BOX_THICKNESS: i32 = 2;

/// 标签字体
pub struct LabelFont {
  font: FontRef<'static>,
  scale: PxScale,
}

impl Default for LabelFont {
  fn default() -> Self {
    let font_data = include_bytes!("../../assets/font.ttf");
    let font = FontRef::try_from_slice(font_data).expect("无法加载嵌入的字体文件");

    Self {
      font,
      scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }
}

impl LabelFont {
  pub fn with_size(mut self, size: f32) -> Self {
    self.scale = PxScale::from(size);
    self
  }

  /// 文本完全落在图像外时不画
  fn draw(&self, image: &mut Frame, x: i32, baseline: i32, text: &str, color: [u8; 3]) {
    let (text_width, text_height) = text_size(self.scale, &self.font, text);
    let (left, bottom) = (x as i64, baseline as i64);
    let top = bottom - text_height as i64;
    if left >= image.width() as i64
      || left + text_width as i64 <= 0
      || bottom <= 0
      || top >= image.height() as i64
    {
      return;
    }
    draw_text_mut(
      image,
      Rgb(color),
      left as i32,
      top as i32,
      self.scale,
      &self.font,
      text,
    );
  }
}

/// 以 `color` 画出所有车道线段，`thickness` 为线宽（像素）
pub fn draw_lane_segments(image: &mut Frame, lines: &[LineSegment], color: [u8; 3], thickness: u32) {
  let reach = (thickness.max(1) as i32 - 1) / 2;
  for line in lines {
    for dx in -reach..=reach {
      for dy in -reach..=reach {
        draw_line_segment_mut(
          image,
          ((line.start.0 + dx) as f32, (line.start.1 + dy) as f32),
          ((line.end.0 + dx) as f32, (line.end.1 + dy) as f32),
          Rgb(color),
        );
      }
    }
  }
}

/// 画出检测框（线宽 2）和框上方的标签，颜色由类别决定
pub fn draw_detections(
  image: &mut Frame,
  detections: &[Detection],
  palette: &Palette,
  font: &LabelFont,
) {
  for det in detections {
    let color = palette.color(det.class_id);
    let b = det.bbox;
    if b.width <= 0 || b.height <= 0 {
      continue;
    }

    let (left, top) = (b.x as i64, b.y as i64);
    let (right, bottom) = (left + b.width as i64, top + b.height as i64);
    let (max_x, max_y) = (image.width() as i64, image.height() as i64);
    // 从外向内逐层加粗
    for t in 0..BOX_THICKNESS as i64 {
      let (l, tp, r, bt) = (left + t, top + t, right - t, bottom - t);
      if r < l || bt < tp {
        break;
      }
      // 裁到图像外一像素处，可见的边不变
      let (l, tp, r, bt) = (l.max(-1), tp.max(-1), r.min(max_x), bt.min(max_y));
      if r < l || bt < tp {
        continue;
      }
      draw_hollow_rect_mut(
        image,
        Rect::at(l as i32, tp as i32).of_size((r - l + 1) as u32, (bt - tp + 1) as u32),
        Rgb(color),
      );
    }

    font.draw(
      image,
      b.x,
      b.y.saturating_sub(LABEL_BASELINE_OFFSET),
      &det.label(),
      color,
    );
  }
}
