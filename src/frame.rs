// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/frame.rs - 视频帧快照定义
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

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::RgbImage;
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("视频流已停止")]
  StreamStopped,
  #[error("帧尺寸无效: {0}x{1}")]
  EmptyFrame(u32, u32),
  #[error("采集失败: {0}")]
  Capture(String),
}

/// 以原始分辨率保存的静态帧
#[derive(Debug, Clone)]
pub struct Frame {
  image: RgbImage,
  index: u64,
  captured_at: DateTime<Utc>,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64) -> Result<Self, FrameError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(FrameError::EmptyFrame(width, height));
    }
    Ok(Self {
      image,
      index,
      captured_at: Utc::now(),
    })
  }

  /// 由交错排列的 RGB24 (NHWC) 数据构造帧
  pub fn from_rgb_bytes(width: u32, height: u32, data: Vec<u8>, index: u64) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    let image = RgbImage::from_raw(width, height, data).ok_or(FrameError::LengthMismatch {
      expected,
      actual: 0,
    })?;
    Self::new(image, index)
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn dimensions(&self) -> (u32, u32) {
    self.image.dimensions()
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn captured_at(&self) -> DateTime<Utc> {
    self.captured_at
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn as_nhwc(&self) -> &[u8] {
    self.image.as_raw()
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}

/// 可以截取当前画面的帧来源
#[async_trait]
pub trait FrameSource: Send + Sync {
  async fn snapshot(&self) -> Result<Frame, FrameError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rgb_bytes_must_match_dimensions() {
    let frame = Frame::from_rgb_bytes(2, 2, vec![0u8; 12], 7).unwrap();
    assert_eq!(frame.dimensions(), (2, 2));
    assert_eq!(frame.index(), 7);
    assert_eq!(frame.as_nhwc().len(), 12);

    let err = Frame::from_rgb_bytes(2, 2, vec![0u8; 10], 0).unwrap_err();
    assert_eq!(err, FrameError::LengthMismatch { expected: 12, actual: 10 });
  }

  #[test]
  fn zero_sized_frame_is_rejected() {
    let err = Frame::new(RgbImage::new(0, 4), 0).unwrap_err();
    assert_eq!(err, FrameError::EmptyFrame(0, 4));
  }
}
