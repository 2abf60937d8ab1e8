// 该文件是 Luyan （路眼） 项目的一部分。
// src/model/labels.rs - 类别标签文件
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

use std::path::Path;

/// 有序类别标签，下标即类别 id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabels {
  names: Vec<String>,
}

impl ClassLabels {
  pub fn from_file(path: &Path) -> Result<Self, std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    Ok(Self::parse(&content))
  }

  /// 每行一个标签；行内首尾空白去除，中间空行保留下标，末尾空行忽略
  pub fn parse(content: &str) -> Self {
    let mut names: Vec<String> = content.lines().map(|l| l.trim().to_string()).collect();
    while names.last().is_some_and(|n| n.is_empty()) {
      names.pop();
    }
    Self { names }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn name(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}

impl<S: Into<String>> FromIterator<S> for ClassLabels {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self {
      names: iter.into_iter().map(Into::into).collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn trims_and_drops_trailing_blank_lines() {
    let labels = ClassLabels::parse("person\r\n bicycle \ncar\n\n\n");
    assert_eq!(labels.len(), 3);
    assert_eq!(labels.name(1), Some("bicycle"));
    assert_eq!(labels.name(3), None);
  }

  #[test]
  fn interior_blank_line_keeps_index() {
    let labels = ClassLabels::parse("a\n\nc\n");
    assert_eq!(labels.len(), 3);
    assert_eq!(labels.name(1), Some(""));
    assert_eq!(labels.name(2), Some("c"));
  }
}
