// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/pipeline.rs - 推理管线缓存
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

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
  frame::Frame,
  model::{DeviceConfig, ModelDefinition, Task},
  probe::CapabilityReport,
  runtime::{InferenceRuntime, InvokeArgs, LoadOptions, Pipeline, ProgressFn, RuntimeError},
};

const EVENT_CAPACITY: usize = 64;

#[derive(Error, Debug, Clone, PartialEq)]
#[error(
  "模型 {model_id} 加载失败: {primary}{}",
  .fallback.as_ref().map(|f| format!("; CPU 回退同样失败: {}", f)).unwrap_or_default()
)]
pub struct ModelLoadError {
  pub model_id: String,
  pub primary: RuntimeError,
  pub fallback: Option<RuntimeError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
  /// 探测到 GPU 时是否使用加速路径
  pub prefer_accelerated: bool,
  /// 加速路径加载失败时是否改用 CPU 重试一次
  pub fallback_to_cpu: bool,
}

impl Default for LoaderConfig {
  fn default() -> Self {
    Self {
      prefer_accelerated: true,
      fallback_to_cpu: true,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadEvent {
  Started { model_id: String, device: DeviceConfig },
  Progress { model_id: String, progress: f32 },
  FallingBack { model_id: String, reason: String },
  Loaded { model_id: String, device: DeviceConfig },
  Failed { model_id: String, reason: String },
}

/// 缓存中的可调用管线，创建后不可变
pub struct PipelineHandle {
  model_id: String,
  task: Task,
  device: DeviceConfig,
  pipeline: Box<dyn Pipeline>,
}

impl PipelineHandle {
  pub fn new(model_id: impl Into<String>, task: Task, device: DeviceConfig, pipeline: Box<dyn Pipeline>) -> Self {
    Self {
      model_id: model_id.into(),
      task,
      device,
      pipeline,
    }
  }

  pub fn model_id(&self) -> &str {
    &self.model_id
  }

  pub fn task(&self) -> Task {
    self.task
  }

  pub fn device(&self) -> DeviceConfig {
    self.device
  }

  pub async fn invoke(&self, image: &Frame, args: &InvokeArgs) -> Result<Value, RuntimeError> {
    self.pipeline.invoke(image, args).await
  }

  async fn dispose(&self) -> Result<(), RuntimeError> {
    self.pipeline.dispose().await
  }
}

impl fmt::Debug for PipelineHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PipelineHandle")
      .field("model_id", &self.model_id)
      .field("task", &self.task)
      .field("device", &self.device)
      .finish_non_exhaustive()
  }
}

type LoadResult = Result<Arc<PipelineHandle>, ModelLoadError>;
type LoadFuture = Shared<BoxFuture<'static, LoadResult>>;

enum Slot {
  Ready(Arc<PipelineHandle>),
  Loading { generation: u64, future: LoadFuture },
}

#[derive(Default)]
struct CacheState {
  slots: HashMap<String, Slot>,
  progress: HashMap<String, f32>,
  next_generation: u64,
}

/// 加载任务与缓存之间共享的部分
#[derive(Clone)]
struct LoadContext {
  runtime: Arc<dyn InferenceRuntime>,
  state: Arc<Mutex<CacheState>>,
  events: broadcast::Sender<LoadEvent>,
  fallback_to_cpu: bool,
}

impl LoadContext {
  fn lock(&self) -> MutexGuard<'_, CacheState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn emit(&self, event: LoadEvent) {
    // 没有订阅者时发送失败，忽略即可
    let _ = self.events.send(event);
  }

  fn progress_fn(&self, model_id: &str) -> ProgressFn {
    let ctx = self.clone();
    let model_id = model_id.to_string();
    Arc::new(move |progress: f32| {
      let progress = if progress.is_finite() {
        progress.clamp(0.0, 100.0)
      } else {
        return;
      };
      let updated = {
        let mut state = ctx.lock();
        match state.progress.get_mut(&model_id) {
          // 同一模型的进度只增不减，回退重试时也不会倒退
          Some(current) if progress > *current => {
            *current = progress;
            Some(progress)
          }
          _ => None,
        }
      };
      if let Some(progress) = updated {
        ctx.emit(LoadEvent::Progress {
          model_id: model_id.clone(),
          progress,
        });
      }
    })
  }

  async fn instantiate(&self, def: &ModelDefinition, device: DeviceConfig) -> Result<Box<dyn Pipeline>, RuntimeError> {
    info!("加载模型 {} ({}), 设备 {}, 路径 {}", def.id, def.task, device, def.model_ref);
    let options = LoadOptions::new(device).with_progress(self.progress_fn(&def.id));
    self.runtime.instantiate(def.task, &def.model_ref, options).await
  }

  async fn load(self, def: ModelDefinition, device: DeviceConfig, generation: u64) -> LoadResult {
    self.emit(LoadEvent::Started {
      model_id: def.id.clone(),
      device,
    });

    let outcome = match self.instantiate(&def, device).await {
      Ok(pipeline) => Ok((pipeline, device)),
      Err(primary) if device.accelerated && self.fallback_to_cpu => {
        warn!("模型 {} 在 {} 上加载失败: {}, 改用 CPU 重试", def.id, device, primary);
        self.emit(LoadEvent::FallingBack {
          model_id: def.id.clone(),
          reason: primary.to_string(),
        });
        let cpu = DeviceConfig::cpu();
        match self.instantiate(&def, cpu).await {
          Ok(pipeline) => Ok((pipeline, cpu)),
          Err(fallback) => Err(ModelLoadError {
            model_id: def.id.clone(),
            primary,
            fallback: Some(fallback),
          }),
        }
      }
      Err(primary) => Err(ModelLoadError {
        model_id: def.id.clone(),
        primary,
        fallback: None,
      }),
    };

    self.finish(def, generation, outcome)
  }

  fn finish(
    &self,
    def: ModelDefinition,
    generation: u64,
    outcome: Result<(Box<dyn Pipeline>, DeviceConfig), ModelLoadError>,
  ) -> LoadResult {
    let mut state = self.lock();
    state.progress.remove(&def.id);
    let current = matches!(
      state.slots.get(&def.id),
      Some(Slot::Loading { generation: g, .. }) if *g == generation
    );

    match outcome {
      Ok((pipeline, device)) => {
        let handle = Arc::new(PipelineHandle::new(def.id.clone(), def.task, device, pipeline));
        if current {
          state.slots.insert(def.id.clone(), Slot::Ready(handle.clone()));
        } else {
          debug!("模型 {} 在加载期间被释放, 结果不缓存", def.id);
        }
        drop(state);
        info!("模型 {} 加载完成, 设备 {}", def.id, device);
        self.emit(LoadEvent::Loaded {
          model_id: def.id,
          device,
        });
        Ok(handle)
      }
      Err(e) => {
        if current {
          state.slots.remove(&def.id);
        }
        drop(state);
        error!("{}", e);
        self.emit(LoadEvent::Failed {
          model_id: def.id,
          reason: e.to_string(),
        });
        Err(e)
      }
    }
  }
}

/// 按模型 ID 缓存推理管线，同一 ID 同时最多只有一次实例化
pub struct PipelineCache {
  ctx: LoadContext,
  capability: RwLock<CapabilityReport>,
  prefer_accelerated: bool,
}

impl PipelineCache {
  pub fn new(runtime: Arc<dyn InferenceRuntime>) -> Self {
    Self::with_config(runtime, LoaderConfig::default())
  }

  pub fn with_config(runtime: Arc<dyn InferenceRuntime>, config: LoaderConfig) -> Self {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    Self {
      ctx: LoadContext {
        runtime,
        state: Arc::new(Mutex::new(CacheState::default())),
        events,
        fallback_to_cpu: config.fallback_to_cpu,
      },
      capability: RwLock::new(CapabilityReport::default()),
      prefer_accelerated: config.prefer_accelerated,
    }
  }

  /// 记录最新的能力探测结果，之后的加载据此选择设备
  pub fn update_capability(&self, report: CapabilityReport) {
    let mut capability = self.capability.write().unwrap_or_else(PoisonError::into_inner);
    *capability = report;
  }

  pub fn device_config(&self) -> DeviceConfig {
    self
      .capability
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .device_config(self.prefer_accelerated)
  }

  pub fn subscribe(&self) -> broadcast::Receiver<LoadEvent> {
    self.ctx.events.subscribe()
  }

  pub async fn get(&self, def: &ModelDefinition) -> LoadResult {
    let future = {
      let mut state = self.ctx.lock();
      match state.slots.get(&def.id) {
        Some(Slot::Ready(handle)) => {
          debug!("模型 {} 从缓存中取得", def.id);
          return Ok(handle.clone());
        }
        Some(Slot::Loading { future, .. }) => {
          debug!("模型 {} 正在加载, 等待同一次加载完成", def.id);
          future.clone()
        }
        None => {
          let generation = state.next_generation;
          state.next_generation += 1;
          let device = self.device_config();
          let future = self.ctx.clone().load(def.clone(), device, generation).boxed().shared();
          state.slots.insert(
            def.id.clone(),
            Slot::Loading {
              generation,
              future: future.clone(),
            },
          );
          state.progress.insert(def.id.clone(), 0.0);
          future
        }
      }
    };
    future.await
  }

  pub fn cached(&self, model_id: &str) -> Option<Arc<PipelineHandle>> {
    match self.ctx.lock().slots.get(model_id) {
      Some(Slot::Ready(handle)) => Some(handle.clone()),
      _ => None,
    }
  }

  pub fn is_loaded(&self, model_id: &str) -> bool {
    self.cached(model_id).is_some()
  }

  pub fn is_loading(&self, model_id: &str) -> bool {
    matches!(self.ctx.lock().slots.get(model_id), Some(Slot::Loading { .. }))
  }

  /// 正在加载的模型的当前进度
  pub fn progress(&self, model_id: &str) -> Option<f32> {
    self.ctx.lock().progress.get(model_id).copied()
  }

  pub fn loaded_ids(&self) -> Vec<String> {
    let state = self.ctx.lock();
    let mut ids: Vec<String> = state
      .slots
      .iter()
      .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
      .map(|(id, _)| id.clone())
      .collect();
    ids.sort();
    ids
  }

  /// 从缓存移除并释放管线。未知 ID 不做任何事
  pub async fn release(&self, model_id: &str) {
    let slot = {
      let mut state = self.ctx.lock();
      state.progress.remove(model_id);
      state.slots.remove(model_id)
    };

    match slot {
      Some(Slot::Ready(handle)) => {
        if let Err(e) = handle.dispose().await {
          warn!("释放模型 {} 失败: {}", model_id, e);
        }
        info!("模型 {} 已释放", model_id);
      }
      Some(Slot::Loading { .. }) => {
        debug!("模型 {} 仍在加载, 取消缓存占位", model_id);
      }
      None => {}
    }
  }

  pub async fn clear(&self) {
    let handles: Vec<Arc<PipelineHandle>> = {
      let mut state = self.ctx.lock();
      state.progress.clear();
      state
        .slots
        .drain()
        .filter_map(|(_, slot)| match slot {
          Slot::Ready(handle) => Some(handle),
          Slot::Loading { .. } => None,
        })
        .collect()
    };

    for handle in handles {
      if let Err(e) = handle.dispose().await {
        warn!("释放模型 {} 失败: {}", handle.model_id(), e);
      }
    }
    info!("模型缓存已清空");
  }
}
