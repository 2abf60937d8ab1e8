// 该文件是 Luyan （路眼） 项目的一部分。
// src/model/darknet_cfg.rs - Darknet 网络结构配置解析
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

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DarknetConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("第 {line} 行: 无法解析 `{key}` 的值 `{value}`")]
  InvalidValue {
    line: usize,
    key: String,
    value: String,
  },
  #[error("缺少 [net] 段")]
  MissingNetSection,
}

/// 从 `.cfg` 中提取的结构信息，只保留标注流程关心的字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DarknetConfig {
  pub width: u32,
  pub height: u32,
  pub channels: u32,
  /// 每个 [yolo] 检测头声明的类别数
  pub yolo_classes: Vec<usize>,
}

impl DarknetConfig {
  pub fn from_file(path: &Path) -> Result<Self, DarknetConfigError> {
    let content = std::fs::read_to_string(path)?;
    Self::parse(&content)
  }

  pub fn parse(content: &str) -> Result<Self, DarknetConfigError> {
    let mut section = String::new();
    let mut seen_net = false;
    let mut width = 416;
    let mut height = 416;
    let mut channels = 3;
    let mut yolo_classes = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
      let line = raw.split(['#', ';']).next().unwrap_or("").trim();
      if line.is_empty() {
        continue;
      }

      if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
        section = name.trim().to_ascii_lowercase();
        match section.as_str() {
          "net" | "network" => seen_net = true,
          "yolo" | "region" => yolo_classes.push(0),
          _ => {}
        }
        continue;
      }

      let Some((key, value)) = line.split_once('=') else {
        continue;
      };
      let (key, value) = (key.trim(), value.trim());
      let parse = |v: &str| {
        v.parse::<u32>().map_err(|_| DarknetConfigError::InvalidValue {
          line: idx + 1,
          key: key.to_string(),
          value: v.to_string(),
        })
      };

      match (section.as_str(), key) {
        ("net" | "network", "width") => width = parse(value)?,
        ("net" | "network", "height") => height = parse(value)?,
        ("net" | "network", "channels") => channels = parse(value)?,
        ("yolo" | "region", "classes") => {
          let classes = parse(value)? as usize;
          if let Some(last) = yolo_classes.last_mut() {
            *last = classes;
          }
        }
        _ => {}
      }
    }

    if !seen_net {
      return Err(DarknetConfigError::MissingNetSection);
    }

    Ok(Self {
      width,
      height,
      channels,
      yolo_classes,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = "
[net]
# Testing
batch=1
width=608
height=608
channels=3

[convolutional]
filters=255

[yolo]
mask = 0,1,2
classes=80

[yolo]
classes = 80 ; trailing comment
";

  #[test]
  fn reads_net_and_heads() {
    let cfg = DarknetConfig::parse(SAMPLE).unwrap();
    assert_eq!((cfg.width, cfg.height, cfg.channels), (608, 608, 3));
    assert_eq!(cfg.yolo_classes, vec![80, 80]);
  }

  #[test]
  fn net_section_is_required() {
    let err = DarknetConfig::parse("[yolo]\nclasses=80\n").unwrap_err();
    assert!(matches!(err, DarknetConfigError::MissingNetSection));
  }

  #[test]
  fn bad_number_reports_line() {
    let err = DarknetConfig::parse("[net]\nwidth=wide\n").unwrap_err();
    match err {
      DarknetConfigError::InvalidValue { line, key, .. } => {
        assert_eq!(line, 2);
        assert_eq!(key, "width");
      }
      other => panic!("unexpected error: {other}"),
    }
  }
}
