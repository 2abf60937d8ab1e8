// 该文件是 Luyan （路眼） 项目的一部分。
// src/frame.rs - 帧与 NCHW 输入张量定义
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

use std::io::Cursor;

use image::{RgbImage, codecs::jpeg::JpegEncoder, imageops::FilterType};

const RGB_CHANNELS: usize = 3;

/// JPEG 编码质量，与常见 imencode 默认值一致
pub const JPEG_QUALITY: u8 = 95;

/// 一帧图像：HWC 排列的 RGB 像素，标注阶段直接在上面绘制
pub type Frame = RgbImage;

/// 检测网络的输入张量，形状为 `[1, 3, size, size]`，数值范围 [0, 1]
#[derive(Debug, Clone)]
pub struct Blob {
  size: u32,
  data: Box<[f32]>,
}

impl Blob {
  /// 将帧缩放到 `size`×`size` 并转换为平面 RGB 浮点张量，不修改原帧。
  ///
  /// 帧在内存中已是 RGB 顺序，与网络训练时的通道顺序一致，因此无需交换通道。
  pub fn from_frame(frame: &Frame, size: u32) -> Self {
    let resized = image::imageops::resize(frame, size, size, FilterType::Triangle);
    let plane = (size as usize) * (size as usize);
    let mut data = vec![0f32; RGB_CHANNELS * plane];

    for (idx, pixel) in resized.pixels().enumerate() {
      for c in 0..RGB_CHANNELS {
        data[c * plane + idx] = pixel[c] as f32 / 255.0;
      }
    }

    Self {
      size,
      data: data.into_boxed_slice(),
    }
  }

  pub fn size(&self) -> u32 {
    self.size
  }

  pub fn shape(&self) -> [usize; 4] {
    [1, RGB_CHANNELS, self.size as usize, self.size as usize]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

/// 将帧编码为 JPEG
pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>, image::ImageError> {
  let mut buffer = Cursor::new(Vec::new());
  JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY).encode_image(frame)?;
  Ok(buffer.into_inner())
}

/// 将任意可识别格式的图像数据解码为帧
pub fn decode_image(data: &[u8]) -> Result<Frame, image::ImageError> {
  Ok(image::load_from_memory(data)?.to_rgb8())
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn blob_is_planar_and_normalized() {
    let frame = RgbImage::from_pixel(32, 16, Rgb([255, 0, 51]));
    let blob = Blob::from_frame(&frame, 8);

    assert_eq!(blob.shape(), [1, 3, 8, 8]);
    assert_eq!(blob.as_slice().len(), 3 * 64);
    let plane = 64;
    assert!((blob.as_slice()[0] - 1.0).abs() < 1e-6);
    assert!(blob.as_slice()[plane].abs() < 1e-6);
    assert!((blob.as_slice()[2 * plane] - 0.2).abs() < 1e-3);
  }

  #[test]
  fn blob_does_not_touch_frame() {
    let frame = RgbImage::from_pixel(20, 10, Rgb([10, 20, 30]));
    let before = frame.clone();
    let _ = Blob::from_frame(&frame, 416);
    assert_eq!(frame, before);
  }

  #[test]
  fn jpeg_round_trip_keeps_dimensions() {
    let mut frame = RgbImage::from_pixel(64, 48, Rgb([0, 128, 255]));
    frame.put_pixel(3, 4, Rgb([255, 255, 0]));

    let encoded = encode_jpeg(&frame).unwrap();
    let decoded = decode_image(&encoded).unwrap();
    assert_eq!(decoded.dimensions(), (64, 48));
  }

  #[test]
  fn decode_rejects_garbage() {
    assert!(decode_image(b"definitely not an image").is_err());
  }
}
