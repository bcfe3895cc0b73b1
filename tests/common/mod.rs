// 该文件是 Jinghu （镜湖） 项目的一部分。
// tests/common/mod.rs - 集成测试共用的模拟实现
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

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use serde_json::{Value, json};

use jinghu::{
  capture::{
    CameraCapability, CameraStream, CaptureError, CaptureErrorKind, DeviceInfo, StreamConstraints, StreamHandle,
  },
  config::HarnessConfig,
  frame::{Frame, FrameError, FrameSource},
  model::{DeviceConfig, MemoryStore, ModelDefinition, Task},
  orchestrator::Orchestrator,
  probe::{AdapterInfo, CapabilityProber, GpuCapability, GpuError},
  runtime::{InferenceRuntime, InvokeArgs, LoadOptions, Pipeline, RuntimeError},
};

pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

/// 每个任务类型的默认输出
pub fn default_output(task: Task) -> Value {
  match task {
    Task::ImageClassification => json!([
      {"label": "tabby cat", "score": 0.82},
      {"label": "tiger cat", "score": 0.11},
    ]),
    Task::ZeroShotImageClassification => json!([[
      {"label": "a photo of a cat", "score": 0.9},
      {"label": "a photo of a dog", "score": 0.1},
    ]]),
    Task::ObjectDetection => json!([
      {"label": "cat", "score": 0.97, "box": {"xmin": 10, "ymin": 20, "xmax": 110, "ymax": 220}},
    ]),
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvokeRecord {
  pub task: Task,
  pub model_ref: String,
  pub args: InvokeArgs,
  pub frame_index: u64,
}

/// 可控的推理运行时
#[derive(Default)]
pub struct MockRuntime {
  pub instantiations: AtomicUsize,
  pub devices: Mutex<Vec<DeviceConfig>>,
  pub invocations: Arc<Mutex<Vec<InvokeRecord>>>,
  pub disposed: Arc<AtomicUsize>,
  pub delay: Mutex<Duration>,
  pub fail_accelerated: AtomicBool,
  pub fail_cpu: AtomicBool,
  pub fail_refs: Mutex<BTreeSet<String>>,
  pub outputs: Mutex<Vec<(String, Value)>>,
  pub invoke_delay: Arc<Mutex<Duration>>,
  /// 为真时已加载的管线每次调用都失败
  pub fail_invoke: Arc<AtomicBool>,
}

impl MockRuntime {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn with_delay(self: &Arc<Self>, delay: Duration) -> Arc<Self> {
    *self.delay.lock().unwrap() = delay;
    self.clone()
  }

  pub fn set_invoke_delay(&self, delay: Duration) {
    *self.invoke_delay.lock().unwrap() = delay;
  }

  pub fn fail_ref(&self, model_ref: &str) {
    self.fail_refs.lock().unwrap().insert(model_ref.to_string());
  }

  /// 指定某个模型路径的输出，未指定时使用任务的默认输出
  pub fn set_output(&self, model_ref: &str, value: Value) {
    self.outputs.lock().unwrap().push((model_ref.to_string(), value));
  }

  pub fn instantiation_count(&self) -> usize {
    self.instantiations.load(Ordering::SeqCst)
  }

  pub fn devices(&self) -> Vec<DeviceConfig> {
    self.devices.lock().unwrap().clone()
  }

  pub fn invocations(&self) -> Vec<InvokeRecord> {
    self.invocations.lock().unwrap().clone()
  }
}

#[async_trait]
impl InferenceRuntime for MockRuntime {
  async fn instantiate(
    &self,
    task: Task,
    model_ref: &str,
    options: LoadOptions,
  ) -> Result<Box<dyn Pipeline>, RuntimeError> {
    self.instantiations.fetch_add(1, Ordering::SeqCst);
    self.devices.lock().unwrap().push(options.device);

    let delay = *self.delay.lock().unwrap();
    options.report(10.0);
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    options.report(100.0);

    if self.fail_refs.lock().unwrap().contains(model_ref) {
      return Err(RuntimeError::Load(format!("{} 不存在", model_ref)));
    }
    if options.device.accelerated && self.fail_accelerated.load(Ordering::SeqCst) {
      return Err(RuntimeError::Load("GPU 着色器编译失败".to_string()));
    }
    if !options.device.accelerated && self.fail_cpu.load(Ordering::SeqCst) {
      return Err(RuntimeError::Load("CPU 后端内存不足".to_string()));
    }

    let output = self
      .outputs
      .lock()
      .unwrap()
      .iter()
      .rev()
      .find(|(r, _)| r == model_ref)
      .map(|(_, v)| v.clone())
      .unwrap_or_else(|| default_output(task));

    Ok(Box::new(MockPipeline {
      task,
      model_ref: model_ref.to_string(),
      output,
      invocations: self.invocations.clone(),
      disposed: self.disposed.clone(),
      invoke_delay: self.invoke_delay.clone(),
      fail_invoke: self.fail_invoke.clone(),
    }))
  }
}

pub struct MockPipeline {
  task: Task,
  model_ref: String,
  output: Value,
  invocations: Arc<Mutex<Vec<InvokeRecord>>>,
  disposed: Arc<AtomicUsize>,
  invoke_delay: Arc<Mutex<Duration>>,
  fail_invoke: Arc<AtomicBool>,
}

#[async_trait]
impl Pipeline for MockPipeline {
  async fn invoke(&self, image: &Frame, args: &InvokeArgs) -> Result<Value, RuntimeError> {
    self.invocations.lock().unwrap().push(InvokeRecord {
      task: self.task,
      model_ref: self.model_ref.clone(),
      args: args.clone(),
      frame_index: image.index(),
    });
    let delay = *self.invoke_delay.lock().unwrap();
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    if self.fail_invoke.load(Ordering::SeqCst) {
      return Err(RuntimeError::Invoke("显存不足".to_string()));
    }
    Ok(self.output.clone())
  }

  async fn dispose(&self) -> Result<(), RuntimeError> {
    self.disposed.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

/// 记录所有已打开视频流的摄像头
pub struct MockCamera {
  pub devices: Vec<DeviceInfo>,
  pub streams: Mutex<Vec<Arc<MockStream>>>,
  pub deny: AtomicBool,
}

impl MockCamera {
  pub fn new(ids: &[&str]) -> Arc<Self> {
    Arc::new(Self {
      devices: ids
        .iter()
        .map(|id| DeviceInfo {
          device_id: id.to_string(),
          label: format!("Camera {}", id),
        })
        .collect(),
      streams: Mutex::new(Vec::new()),
      deny: AtomicBool::new(false),
    })
  }

  pub fn streams(&self) -> Vec<Arc<MockStream>> {
    self.streams.lock().unwrap().clone()
  }

  pub fn active_streams(&self) -> Vec<Arc<MockStream>> {
    self.streams().into_iter().filter(|s| s.is_active()).collect()
  }
}

#[async_trait]
impl CameraCapability for MockCamera {
  async fn get_stream(&self, constraints: &StreamConstraints) -> Result<StreamHandle, CaptureError> {
    if self.deny.load(Ordering::SeqCst) {
      return Err(CaptureError::new(CaptureErrorKind::PermissionDenied, "用户拒绝"));
    }
    let device = match &constraints.device_id {
      Some(id) => self
        .devices
        .iter()
        .find(|d| &d.device_id == id)
        .ok_or_else(|| CaptureError::new(CaptureErrorKind::NoDevice, id.clone()))?,
      None => self
        .devices
        .first()
        .ok_or_else(|| CaptureError::new(CaptureErrorKind::NoDevice, "没有摄像头"))?,
    };

    let index = self.streams.lock().unwrap().len();
    let stream = Arc::new(MockStream {
      id: format!("mock-{}", index),
      device_id: device.device_id.clone(),
      active: AtomicBool::new(true),
      frames: AtomicU64::new(0),
    });
    self.streams.lock().unwrap().push(stream.clone());
    Ok(stream)
  }

  async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
    Ok(self.devices.clone())
  }
}

pub struct MockStream {
  pub id: String,
  pub device_id: String,
  pub active: AtomicBool,
  pub frames: AtomicU64,
}

#[async_trait]
impl FrameSource for MockStream {
  async fn snapshot(&self) -> Result<Frame, FrameError> {
    if !self.is_active() {
      return Err(FrameError::StreamStopped);
    }
    let index = self.frames.fetch_add(1, Ordering::SeqCst);
    Frame::new(RgbImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, Rgb([40, 40, 40])), index)
  }
}

impl CameraStream for MockStream {
  fn id(&self) -> &str {
    &self.id
  }

  fn device_id(&self) -> &str {
    &self.device_id
  }

  fn stop_tracks(&self) {
    self.active.store(false, Ordering::SeqCst);
  }

  fn is_active(&self) -> bool {
    self.active.load(Ordering::SeqCst)
  }
}

pub struct MockGpu(pub Option<AdapterInfo>);

impl MockGpu {
  pub fn available(features: &[&str]) -> Arc<Self> {
    Arc::new(Self(Some(AdapterInfo {
      name: "Mock Adapter".to_string(),
      features: features.iter().map(|f| f.to_string()).collect(),
    })))
  }

  pub fn missing() -> Arc<Self> {
    Arc::new(Self(None))
  }
}

#[async_trait]
impl GpuCapability for MockGpu {
  async fn query_adapter(&self) -> Result<Option<AdapterInfo>, GpuError> {
    Ok(self.0.clone())
  }
}

pub struct Harness {
  pub runtime: Arc<MockRuntime>,
  pub camera: Arc<MockCamera>,
  pub store: Arc<MemoryStore>,
  pub orchestrator: Arc<Orchestrator>,
}

pub fn harness_with(gpu: Arc<MockGpu>, user: Vec<ModelDefinition>) -> Harness {
  let runtime = MockRuntime::new();
  let camera = MockCamera::new(&["cam-a", "cam-b"]);
  let store = Arc::new(MemoryStore::with_models(user));
  let orchestrator = Orchestrator::new(
    runtime.clone(),
    camera.clone(),
    store.clone(),
    CapabilityProber::new(gpu),
    &HarnessConfig::default(),
  );
  Harness {
    runtime,
    camera,
    store,
    orchestrator: Arc::new(orchestrator),
  }
}

pub fn harness() -> Harness {
  harness_with(MockGpu::missing(), Vec::new())
}
