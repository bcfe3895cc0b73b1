// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/capture/image_file_camera.rs - 以静态图像模拟的摄像头
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

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use image::{ImageError, ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  capture::{
    CameraCapability, CameraStream, CaptureError, CaptureErrorKind, DeviceInfo, StreamConstraints,
    StreamHandle, next_stream_id,
  },
  frame::{Frame, FrameError, FrameSource},
};

#[derive(Error, Debug)]
pub enum ImageFileCameraError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像路径为空")]
  EmptyPath,
}

/// 把一张图像当作只有一个设备的摄像头，每次截取都返回同一画面
pub struct ImageFileCamera {
  path: PathBuf,
}

impl FromUrlWithScheme for ImageFileCamera {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileCamera {
  type Error = ImageFileCameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileCameraError::SchemeMismatch);
    }
    if url.path().is_empty() || url.path() == "/" {
      return Err(ImageFileCameraError::EmptyPath);
    }
    Ok(Self::new(url.path()))
  }
}

impl ImageFileCamera {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  fn device_id(&self) -> String {
    self.path.display().to_string()
  }
}

fn decode_error(err: ImageError, path: &str) -> CaptureError {
  match err {
    ImageError::IoError(e) => CaptureError::from_io(&e, path),
    other => CaptureError::new(CaptureErrorKind::Unknown, format!("{}: {}", path, other)),
  }
}

#[async_trait]
impl CameraCapability for ImageFileCamera {
  async fn get_stream(&self, constraints: &StreamConstraints) -> Result<StreamHandle, CaptureError> {
    let device_id = self.device_id();
    if let Some(requested) = constraints.device_id.as_deref() {
      if requested != device_id {
        return Err(CaptureError::new(
          CaptureErrorKind::NoDevice,
          format!("设备 {} 不存在", requested),
        ));
      }
    }

    let path = self.path.clone();
    let image = tokio::task::spawn_blocking(move || -> Result<RgbImage, ImageError> {
      Ok(ImageReader::open(&path)?.decode()?.into_rgb8())
    })
    .await
    .map_err(|e| CaptureError::new(CaptureErrorKind::Unknown, e.to_string()))?
    .map_err(|e| decode_error(e, &device_id))?;

    debug!("图像摄像头 {} 就绪, {}x{}", device_id, image.width(), image.height());
    Ok(Arc::new(ImageFileStream {
      id: next_stream_id("image"),
      device_id,
      image,
      active: AtomicBool::new(true),
      next_index: AtomicU64::new(0),
    }))
  }

  async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
    let label = self
      .path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| self.device_id());
    Ok(vec![DeviceInfo {
      device_id: self.device_id(),
      label,
    }])
  }
}

struct ImageFileStream {
  id: String,
  device_id: String,
  image: RgbImage,
  active: AtomicBool,
  next_index: AtomicU64,
}

#[async_trait]
impl FrameSource for ImageFileStream {
  async fn snapshot(&self) -> Result<Frame, FrameError> {
    if !self.is_active() {
      return Err(FrameError::StreamStopped);
    }
    let index = self.next_index.fetch_add(1, Ordering::Relaxed);
    Frame::new(self.image.clone(), index)
  }
}

impl CameraStream for ImageFileStream {
  fn id(&self) -> &str {
    &self.id
  }

  fn device_id(&self) -> &str {
    &self.device_id
  }

  fn stop_tracks(&self) {
    self.active.store(false, Ordering::Release);
  }

  fn is_active(&self) -> bool {
    self.active.load(Ordering::Acquire)
  }
}
