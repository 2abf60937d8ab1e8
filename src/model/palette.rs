// 该文件是 Luyan （路眼） 项目的一部分。
// src/model/palette.rs - 类别颜色表
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

use rand::{Rng, SeedableRng, rngs::StdRng};

pub const PALETTE_SEED: u64 = 42;

/// 每个类别一种颜色，仅由种子和类别数量决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
  colors: Box<[[u8; 3]]>,
}

impl Palette {
  pub fn seeded(class_count: usize) -> Self {
    let mut rng = StdRng::seed_from_u64(PALETTE_SEED);
    let colors = (0..class_count)
      .map(|_| {
        [
          rng.gen_range(0..255u8),
          rng.gen_range(0..255u8),
          rng.gen_range(0..255u8),
        ]
      })
      .collect();
    Self { colors }
  }

  /// 类别 id 必须来自同一份标签表
  pub fn color(&self, class_id: usize) -> [u8; 3] {
    self.colors[class_id]
  }

  pub fn len(&self) -> usize {
    self.colors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.colors.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn same_class_same_color_across_instances() {
    let a = Palette::seeded(80);
    let b = Palette::seeded(80);
    assert_eq!(a, b);
    assert_eq!(a.color(17), b.color(17));
  }

  #[test]
  fn lookup_order_does_not_matter() {
    let palette = Palette::seeded(10);
    let forward: Vec<_> = (0..10).map(|i| palette.color(i)).collect();
    let backward: Vec<_> = (0..10).rev().map(|i| palette.color(i)).collect();
    assert_eq!(forward, backward.into_iter().rev().collect::<Vec<_>>());
  }

  #[test]
  fn channels_stay_below_255() {
    let palette = Palette::seeded(200);
    for i in 0..palette.len() {
      assert!(palette.color(i).iter().all(|&c| c < 255));
    }
  }
}
