// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/capture/v4l_camera.rs - V4L2 摄像头
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
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::{
  FromUrl, FromUrlWithScheme,
  capture::{
    CameraCapability, CameraStream, CaptureError, CaptureErrorKind, DeviceInfo, StreamConstraints,
    StreamHandle, next_stream_id,
  },
  frame::{Frame, FrameError, FrameSource},
};

const DEFAULT_DEVICE: &str = "/dev/video0";
const BUFFER_COUNT: u32 = 4;

const RGB3: &[u8; 4] = b"RGB3";
const YUYV: &[u8; 4] = b"YUYV";
const MJPG: &[u8; 4] = b"MJPG";

#[derive(Error, Debug)]
pub enum V4lCameraError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// V4L2 摄像头。URL 中的路径为默认设备，如 `v4l:///dev/video0`
pub struct V4lCamera {
  default_device: String,
}

impl FromUrlWithScheme for V4lCamera {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lCamera {
  type Error = V4lCameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lCameraError::SchemeMismatch);
    }

    let default_device = if url.path().is_empty() || url.path() == "/" {
      DEFAULT_DEVICE.to_string()
    } else {
      url.path().to_string()
    };
    Ok(V4lCamera { default_device })
  }
}

/// 协商后的采集格式
#[derive(Debug, Clone, Copy)]
struct Negotiated {
  width: u32,
  height: u32,
  fourcc: FourCC,
}

fn negotiate(path: &str, width: u32, height: u32) -> Result<Negotiated, CaptureError> {
  let device = Device::with_path(path).map_err(|e| CaptureError::from_io(&e, path))?;

  let mut format = device.format().map_err(|e| CaptureError::from_io(&e, path))?;
  format.width = width;
  format.height = height;
  format.fourcc = FourCC::new(RGB3);
  let mut format = device
    .set_format(&format)
    .map_err(|e| CaptureError::from_io(&e, path))?;

  // 驱动不支持 RGB24 时依次尝试 YUYV 与 MJPEG
  for fallback in [YUYV, MJPG] {
    if is_supported(&format.fourcc) {
      break;
    }
    format.fourcc = FourCC::new(fallback);
    format = device
      .set_format(&format)
      .map_err(|e| CaptureError::from_io(&e, path))?;
  }

  if !is_supported(&format.fourcc) {
    return Err(CaptureError::new(
      CaptureErrorKind::ConstraintUnsatisfiable,
      format!("{} 不支持的像素格式 {}", path, format.fourcc),
    ));
  }
  Ok(Negotiated {
    width: format.width,
    height: format.height,
    fourcc: format.fourcc,
  })
}

fn is_supported(fourcc: &FourCC) -> bool {
  [RGB3, YUYV, MJPG].iter().any(|code| fourcc.repr == **code)
}

fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Option<RgbImage> {
  let pixels = width as usize * height as usize;
  if data.len() < pixels * 2 {
    return None;
  }
  let clamp = |v: f32| v.round().clamp(0.0, 255.0) as u8;
  let mut rgb = Vec::with_capacity(pixels * 3);
  for chunk in data[..pixels * 2].chunks_exact(4) {
    let (y0, u, y1, v) = (chunk[0] as f32, chunk[1] as f32 - 128.0, chunk[2] as f32, chunk[3] as f32 - 128.0);
    for y in [y0, y1] {
      rgb.push(clamp(y + 1.402 * v));
      rgb.push(clamp(y - 0.344 * u - 0.714 * v));
      rgb.push(clamp(y + 1.772 * u));
    }
  }
  RgbImage::from_raw(width, height, rgb)
}

fn capture_frame(path: &str, format: Negotiated) -> Result<RgbImage, FrameError> {
  let capture_error = |e: std::io::Error| FrameError::Capture(format!("{}: {}", path, e));

  let mut device = Device::with_path(path).map_err(capture_error)?;
  let mut stream = v4l::io::mmap::Stream::with_buffers(&mut device, v4l::buffer::Type::VideoCapture, BUFFER_COUNT)
    .map_err(capture_error)?;
  let (buf, meta) = stream.next().map_err(capture_error)?;
  let data = match meta.bytesused as usize {
    0 => buf,
    used => &buf[..used.min(buf.len())],
  };

  let (width, height) = (format.width, format.height);
  let image = match &format.fourcc.repr {
    RGB3 => {
      let expected = width as usize * height as usize * 3;
      if data.len() < expected {
        return Err(FrameError::LengthMismatch {
          expected,
          actual: data.len(),
        });
      }
      RgbImage::from_raw(width, height, data[..expected].to_vec())
    }
    YUYV => yuyv_to_rgb(data, width, height),
    MJPG => image::load_from_memory_with_format(data, ImageFormat::Jpeg)
      .map(|image| image.into_rgb8())
      .ok(),
    _ => None,
  };
  image.ok_or_else(|| FrameError::Capture(format!("{} 返回的 {} 缓冲区无法解码", path, format.fourcc)))
}

#[async_trait]
impl CameraCapability for V4lCamera {
  async fn get_stream(&self, constraints: &StreamConstraints) -> Result<StreamHandle, CaptureError> {
    let path = constraints
      .device_id
      .clone()
      .unwrap_or_else(|| self.default_device.clone());
    if let Some(facing) = constraints.facing_mode {
      debug!("V4L2 设备不区分朝向, 忽略 {:?}", facing);
    }

    let (width, height) = (constraints.ideal_width, constraints.ideal_height);
    let probe_path = path.clone();
    let format = tokio::task::spawn_blocking(move || negotiate(&probe_path, width, height))
      .await
      .map_err(|e| CaptureError::new(CaptureErrorKind::Unknown, e.to_string()))??;

    info!(
      "V4L2 设备 {} 协商格式 {}x{} {}",
      path, format.width, format.height, format.fourcc
    );
    Ok(Arc::new(V4lStream {
      id: next_stream_id("v4l"),
      path,
      format,
      active: AtomicBool::new(true),
      next_index: AtomicU64::new(0),
    }))
  }

  async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
    let devices = tokio::task::spawn_blocking(|| {
      v4l::context::enum_devices()
        .into_iter()
        .map(|node| {
          let device_id = node.path().display().to_string();
          let label = node.name().unwrap_or_else(|| format!("video{}", node.index()));
          DeviceInfo { device_id, label }
        })
        .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| CaptureError::new(CaptureErrorKind::Unknown, e.to_string()))?;
    Ok(devices)
  }
}

struct V4lStream {
  id: String,
  path: String,
  format: Negotiated,
  active: AtomicBool,
  next_index: AtomicU64,
}

#[async_trait]
impl FrameSource for V4lStream {
  async fn snapshot(&self) -> Result<Frame, FrameError> {
    if !self.is_active() {
      return Err(FrameError::StreamStopped);
    }
    let path = self.path.clone();
    let format = self.format;
    let image = tokio::task::spawn_blocking(move || capture_frame(&path, format))
      .await
      .map_err(|e| FrameError::Capture(e.to_string()))??;
    Frame::new(image, self.next_index.fetch_add(1, Ordering::Relaxed))
  }
}

impl CameraStream for V4lStream {
  fn id(&self) -> &str {
    &self.id
  }

  fn device_id(&self) -> &str {
    &self.path
  }

  fn stop_tracks(&self) {
    self.active.store(false, Ordering::Release);
  }

  fn is_active(&self) -> bool {
    self.active.load(Ordering::Acquire)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_device_path() {
    let camera = V4lCamera::from_url(&Url::parse("v4l://").unwrap()).unwrap();
    assert_eq!(camera.default_device, DEFAULT_DEVICE);
    let camera = V4lCamera::from_url(&Url::parse("v4l:///dev/video2").unwrap()).unwrap();
    assert_eq!(camera.default_device, "/dev/video2");
  }

  #[test]
  fn yuyv_gray_converts_to_gray() {
    let data = [128u8, 128, 128, 128];
    let image = yuyv_to_rgb(&data, 2, 1).unwrap();
    assert_eq!(image.get_pixel(0, 0).0, [128, 128, 128]);
    assert_eq!(image.get_pixel(1, 0).0, [128, 128, 128]);
    assert!(yuyv_to_rgb(&data, 4, 1).is_none());
  }
}
