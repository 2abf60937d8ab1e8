// 该文件是 Luyan （路眼） 项目的一部分。
// src/lane/hough.rs - 渐进式概率霍夫直线检测
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

//! 渐进式概率霍夫变换（PPHT）。
//!
//! 以固定种子的随机顺序逐个取出边缘点投票；某个 (rho, theta) 的票数达到阈值后，
//! 从该点沿直线方向双向行走，允许不超过 `max_line_gap` 的空隙，得到线段两端。
//! 线段足够长时输出，并撤回线段上所有点的投票。无论长短，行走经过的边缘点都不再参与投票。

use std::f32::consts::PI;

use image::GrayImage;
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::LineSegment;

const HOUGH_SEED: u64 = 0xffff_ffff;
const FIXED_SHIFT: i64 = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoughParams {
  /// 距离分辨率（像素）
  pub rho: f32,
  /// 角度分辨率（弧度）
  pub theta: f32,
  /// 最少票数
  pub threshold: i32,
  /// 线段最短长度（任一坐标轴方向上的跨度）
  pub min_line_length: i32,
  /// 同一线段内允许的最大空隙
  pub max_line_gap: i32,
}

impl Default for HoughParams {
  fn default() -> Self {
    Self {
      rho: 1.0,
      theta: PI / 180.0,
      threshold: 50,
      min_line_length: 100,
      max_line_gap: 50,
    }
  }
}

struct Accumulator {
  trig: Vec<(f32, f32)>,
  numrho: usize,
  votes: Vec<i32>,
}

impl Accumulator {
  fn new(width: i32, height: i32, params: &HoughParams) -> Self {
    let irho = 1.0 / params.rho;
    let numangle = (PI / params.theta).round().max(1.0) as usize;
    let numrho = (((width + height) * 2 + 1) as f32 / params.rho).round() as usize;
    let trig = (0..numangle)
      .map(|n| {
        let angle = n as f32 * params.theta;
        (angle.cos() * irho, angle.sin() * irho)
      })
      .collect();
    Self {
      trig,
      numrho,
      votes: vec![0; numangle * numrho],
    }
  }

  fn index(&self, n: usize, x: i64, y: i64) -> usize {
    let (cos, sin) = self.trig[n];
    let r = (x as f32 * cos + y as f32 * sin).round() as i64 + (self.numrho as i64 - 1) / 2;
    n * self.numrho + r as usize
  }

  /// 投票并返回票数最高的角度下标及票数
  fn vote(&mut self, x: i64, y: i64) -> (usize, i32) {
    let mut best = (0, i32::MIN);
    for n in 0..self.trig.len() {
      let idx = self.index(n, x, y);
      self.votes[idx] += 1;
      if self.votes[idx] > best.1 {
        best = (n, self.votes[idx]);
      }
    }
    best
  }

  fn retract(&mut self, x: i64, y: i64) {
    for n in 0..self.trig.len() {
      let idx = self.index(n, x, y);
      self.votes[idx] -= 1;
    }
  }
}

/// 沿直线行走的定点数步进器
#[derive(Clone, Copy)]
struct Walker {
  x0: i64,
  y0: i64,
  dx: i64,
  dy: i64,
  x_major: bool,
}

impl Walker {
  fn new(x: i64, y: i64, cos: f32, sin: f32) -> Self {
    let (a, b) = (-sin, cos);
    let one = (1i64 << FIXED_SHIFT) as f32;
    let half = 1i64 << (FIXED_SHIFT - 1);
    if a.abs() > b.abs() {
      Self {
        x0: x,
        y0: (y << FIXED_SHIFT) + half,
        dx: if a > 0.0 { 1 } else { -1 },
        dy: (b * one / a.abs()).round() as i64,
        x_major: true,
      }
    } else {
      Self {
        x0: (x << FIXED_SHIFT) + half,
        y0: y,
        dx: (a * one / b.abs()).round() as i64,
        dy: if b > 0.0 { 1 } else { -1 },
        x_major: false,
      }
    }
  }

  fn points(&self, backwards: bool) -> impl Iterator<Item = (i64, i64)> {
    let (dx, dy) = if backwards {
      (-self.dx, -self.dy)
    } else {
      (self.dx, self.dy)
    };
    let x_major = self.x_major;
    let mut cursor = (self.x0, self.y0);
    std::iter::from_fn(move || {
      let (x, y) = cursor;
      cursor = (x + dx, y + dy);
      Some(if x_major {
        (x, y >> FIXED_SHIFT)
      } else {
        (x >> FIXED_SHIFT, y)
      })
    })
  }
}

/// 在二值边缘图（非零即边缘）上检测线段
pub fn probabilistic_hough(edges: &GrayImage, params: &HoughParams) -> Vec<LineSegment> {
  let (width, height) = (edges.width() as i32, edges.height() as i32);
  if width == 0 || height == 0 {
    return Vec::new();
  }

  let mut accum = Accumulator::new(width, height, params);
  let stride = width as i64;
  let in_bounds = |x: i64, y: i64| x >= 0 && x < width as i64 && y >= 0 && y < height as i64;

  let mut mask = vec![false; (width as usize) * (height as usize)];
  let mut points = Vec::new();
  for (x, y, pixel) in edges.enumerate_pixels() {
    if pixel[0] != 0 {
      mask[(y as usize) * (width as usize) + x as usize] = true;
      points.push((x as i64, y as i64));
    }
  }

  let mut rng = StdRng::seed_from_u64(HOUGH_SEED);
  let mut lines = Vec::new();
  let mut remaining = points.len();

  while remaining > 0 {
    let pick = rng.gen_range(0..remaining);
    let (x, y) = points[pick];
    points[pick] = points[remaining - 1];
    remaining -= 1;

    if !mask[(y * stride + x) as usize] {
      continue;
    }

    let (best_n, best_votes) = accum.vote(x, y);
    if best_votes < params.threshold {
      continue;
    }

    let (cos, sin) = accum.trig[best_n];
    let walker = Walker::new(x, y, cos, sin);

    let mut line_end = [(x, y); 2];
    for (k, end) in line_end.iter_mut().enumerate() {
      let mut gap = 0;
      for (px, py) in walker.points(k == 1) {
        if !in_bounds(px, py) {
          break;
        }
        if mask[(py * stride + px) as usize] {
          gap = 0;
          *end = (px, py);
        } else {
          gap += 1;
          if gap > params.max_line_gap {
            break;
          }
        }
      }
    }

    let good_line = (line_end[1].0 - line_end[0].0).abs() >= params.min_line_length as i64
      || (line_end[1].1 - line_end[0].1).abs() >= params.min_line_length as i64;

    for (k, &end) in line_end.iter().enumerate() {
      for (px, py) in walker.points(k == 1) {
        let m = (py * stride + px) as usize;
        if mask[m] {
          if good_line {
            accum.retract(px, py);
          }
          mask[m] = false;
        }
        if (px, py) == end {
          break;
        }
      }
    }

    if good_line {
      lines.push(LineSegment {
        start: (line_end[0].0 as i32, line_end[0].1 as i32),
        end: (line_end[1].0 as i32, line_end[1].1 as i32),
      });
    }
  }

  lines
}
