// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/capture.rs - 摄像头采集管理
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

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, frame::FrameSource};

#[cfg(feature = "read_image_file")]
mod image_file_camera;
#[cfg(feature = "read_image_file")]
pub use self::image_file_camera::{ImageFileCamera, ImageFileCameraError};

#[cfg(feature = "v4l_camera")]
mod v4l_camera;
#[cfg(feature = "v4l_camera")]
pub use self::v4l_camera::{V4lCamera, V4lCameraError};

// Linux errno
const EPERM: i32 = 1;
const ENOENT: i32 = 2;
const ENXIO: i32 = 6;
const EACCES: i32 = 13;
const EBUSY: i32 = 16;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const ERANGE: i32 = 34;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureErrorKind {
  PermissionDenied,
  NoDevice,
  DeviceBusy,
  ConstraintUnsatisfiable,
  SecurityBlocked,
  Unknown,
}

impl CaptureErrorKind {
  /// 按操作系统错误码分类，没有错误码时退回到 [`io::ErrorKind`]
  pub fn from_io_error(err: &io::Error) -> Self {
    match err.raw_os_error() {
      Some(EACCES | EPERM) => CaptureErrorKind::PermissionDenied,
      Some(ENOENT | ENODEV | ENXIO) => CaptureErrorKind::NoDevice,
      Some(EBUSY) => CaptureErrorKind::DeviceBusy,
      Some(EINVAL | ERANGE) => CaptureErrorKind::ConstraintUnsatisfiable,
      Some(_) => CaptureErrorKind::Unknown,
      None => match err.kind() {
        io::ErrorKind::PermissionDenied => CaptureErrorKind::PermissionDenied,
        io::ErrorKind::NotFound => CaptureErrorKind::NoDevice,
        io::ErrorKind::ResourceBusy => CaptureErrorKind::DeviceBusy,
        io::ErrorKind::InvalidInput => CaptureErrorKind::ConstraintUnsatisfiable,
        _ => CaptureErrorKind::Unknown,
      },
    }
  }

  /// 面向用户的提示
  pub fn hint(&self) -> &'static str {
    match self {
      CaptureErrorKind::PermissionDenied => "摄像头访问被拒绝, 请检查设备权限",
      CaptureErrorKind::NoDevice => "未找到摄像头",
      CaptureErrorKind::DeviceBusy => "摄像头正被其他程序占用",
      CaptureErrorKind::ConstraintUnsatisfiable => "摄像头不支持请求的参数",
      CaptureErrorKind::SecurityBlocked => "当前环境禁止访问摄像头",
      CaptureErrorKind::Unknown => "无法访问摄像头",
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}: {message}", .kind.hint())]
pub struct CaptureError {
  pub kind: CaptureErrorKind,
  pub message: String,
}

impl CaptureError {
  pub fn new(kind: CaptureErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }

  pub fn from_io(err: &io::Error, context: impl fmt::Display) -> Self {
    Self::new(CaptureErrorKind::from_io_error(err), format!("{}: {}", context, err))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
  User,
  Environment,
}

/// 默认分辨率提示
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureHints {
  pub ideal_width: u32,
  pub ideal_height: u32,
}

impl Default for CaptureHints {
  fn default() -> Self {
    Self {
      ideal_width: 640,
      ideal_height: 480,
    }
  }
}

/// 打开视频流时的约束。分辨率只是提示，设备可以给出其它尺寸
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConstraints {
  pub device_id: Option<String>,
  pub ideal_width: u32,
  pub ideal_height: u32,
  pub facing_mode: Option<FacingMode>,
}

impl StreamConstraints {
  pub fn new(device_id: Option<&str>, hints: &CaptureHints) -> Self {
    Self {
      device_id: device_id.map(str::to_string),
      ideal_width: hints.ideal_width,
      ideal_height: hints.ideal_height,
      // 未指定设备时优先后置摄像头
      facing_mode: match device_id {
        Some(_) => None,
        None => Some(FacingMode::Environment),
      },
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
  pub device_id: String,
  pub label: String,
}

/// 活动中的视频流，同时也是推理所用的画面来源
pub trait CameraStream: FrameSource {
  fn id(&self) -> &str;
  fn device_id(&self) -> &str;
  /// 停止所有轨道。可重复调用
  fn stop_tracks(&self);
  fn is_active(&self) -> bool;
}

pub type StreamHandle = Arc<dyn CameraStream>;

#[async_trait]
pub trait CameraCapability: Send + Sync {
  async fn get_stream(&self, constraints: &StreamConstraints) -> Result<StreamHandle, CaptureError>;

  async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError>;
}

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_stream_id(prefix: &str) -> String {
  format!("{}-{}", prefix, NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
}

#[derive(Clone, Default)]
pub struct CaptureState {
  pub active: bool,
  pub stream: Option<StreamHandle>,
  pub error: Option<String>,
  pub selected_device: Option<String>,
  pub devices: Vec<DeviceInfo>,
}

impl fmt::Debug for CaptureState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CaptureState")
      .field("active", &self.active)
      .field("stream", &self.stream.as_ref().map(|s| s.id().to_string()))
      .field("error", &self.error)
      .field("selected_device", &self.selected_device)
      .field("devices", &self.devices)
      .finish()
  }
}

/// 管理唯一的活动视频流。start/stop/switch 在同一把锁下串行执行，
/// 任何时刻最多只有一个活动流
pub struct CaptureManager {
  camera: Arc<dyn CameraCapability>,
  hints: CaptureHints,
  lock: Mutex<()>,
  state: watch::Sender<CaptureState>,
}

impl CaptureManager {
  pub fn new(camera: Arc<dyn CameraCapability>) -> Self {
    let (state, _) = watch::channel(CaptureState::default());
    Self {
      camera,
      hints: CaptureHints::default(),
      lock: Mutex::new(()),
      state,
    }
  }

  pub fn with_hints(mut self, hints: CaptureHints) -> Self {
    self.hints = hints;
    self
  }

  pub fn subscribe(&self) -> watch::Receiver<CaptureState> {
    self.state.subscribe()
  }

  pub fn state(&self) -> CaptureState {
    self.state.borrow().clone()
  }

  pub fn current_stream(&self) -> Option<StreamHandle> {
    self.state.borrow().stream.clone()
  }

  pub async fn start(&self, device_id: Option<&str>) -> Result<StreamHandle, CaptureError> {
    let _guard = self.lock.lock().await;
    self.stop_locked();
    self.start_locked(device_id).await
  }

  pub async fn stop(&self) {
    let _guard = self.lock.lock().await;
    self.stop_locked();
  }

  pub async fn switch(&self, device_id: &str) -> Result<StreamHandle, CaptureError> {
    let _guard = self.lock.lock().await;
    info!("切换摄像头: {}", device_id);
    self.stop_locked();
    self.start_locked(Some(device_id)).await
  }

  /// 列出视频输入设备。失败时记录日志并返回空列表
  pub async fn enumerate_devices(&self) -> Vec<DeviceInfo> {
    match self.camera.enumerate_devices().await {
      Ok(devices) => {
        debug!("发现 {} 个视频设备", devices.len());
        self.state.send_modify(|state| state.devices = devices.clone());
        devices
      }
      Err(e) => {
        warn!("枚举视频设备失败: {}", e);
        Vec::new()
      }
    }
  }

  fn stop_locked(&self) {
    let mut stopped = None;
    self.state.send_if_modified(|state| {
      stopped = state.stream.take();
      state.active = false;
      stopped.is_some()
    });
    if let Some(stream) = stopped {
      stream.stop_tracks();
      info!("已停止视频流 {} ({})", stream.id(), stream.device_id());
    }
  }

  async fn start_locked(&self, device_id: Option<&str>) -> Result<StreamHandle, CaptureError> {
    let constraints = StreamConstraints::new(device_id, &self.hints);
    debug!("请求视频流: {:?}", constraints);

    match self.camera.get_stream(&constraints).await {
      Ok(stream) => {
        info!("已打开视频流 {} ({})", stream.id(), stream.device_id());
        self.state.send_modify(|state| {
          state.active = true;
          state.stream = Some(stream.clone());
          state.error = None;
          state.selected_device = Some(stream.device_id().to_string());
        });
        Ok(stream)
      }
      Err(e) => {
        warn!("打开视频流失败: {}", e);
        self.state.send_modify(|state| {
          state.active = false;
          state.stream = None;
          state.error = Some(e.to_string());
        });
        Err(e)
      }
    }
  }
}

#[derive(Error, Debug)]
pub enum CaptureWrapperError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件摄像头错误: {0}")]
  ImageFileCameraError(#[from] ImageFileCameraError),
  #[cfg(feature = "v4l_camera")]
  #[error("V4L 摄像头错误: {0}")]
  V4lCameraError(#[from] V4lCameraError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum CaptureWrapper {
  #[cfg(feature = "read_image_file")]
  ImageFile(ImageFileCamera),
  #[cfg(feature = "v4l_camera")]
  V4l(V4lCamera),
  /// 未配置摄像头，只能运行不需要画面的命令
  Unconfigured,
}

impl FromUrl for CaptureWrapper {
  type Error = CaptureWrapperError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileCamera::SCHEME {
        return Ok(CaptureWrapper::ImageFile(ImageFileCamera::from_url(url)?));
      }
    }
    #[cfg(feature = "v4l_camera")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lCamera::SCHEME {
        return Ok(CaptureWrapper::V4l(V4lCamera::from_url(url)?));
      }
    }
    let _ = url;
    Err(CaptureWrapperError::SchemeMismatch)
  }
}

#[async_trait]
impl CameraCapability for CaptureWrapper {
  async fn get_stream(&self, constraints: &StreamConstraints) -> Result<StreamHandle, CaptureError> {
    match self {
      #[cfg(feature = "read_image_file")]
      CaptureWrapper::ImageFile(camera) => camera.get_stream(constraints).await,
      #[cfg(feature = "v4l_camera")]
      CaptureWrapper::V4l(camera) => camera.get_stream(constraints).await,
      CaptureWrapper::Unconfigured => {
        let _ = constraints;
        Err(CaptureError::new(CaptureErrorKind::NoDevice, "未配置摄像头"))
      }
    }
  }

  async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
    match self {
      #[cfg(feature = "read_image_file")]
      CaptureWrapper::ImageFile(camera) => camera.enumerate_devices().await,
      #[cfg(feature = "v4l_camera")]
      CaptureWrapper::V4l(camera) => camera.enumerate_devices().await,
      CaptureWrapper::Unconfigured => Ok(Vec::new()),
    }
  }
}
