// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/orchestrator.rs - 会话编排
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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, broadcast, watch};
use tracing::{debug, info, warn};

use crate::{
  capture::{CameraCapability, CaptureError, CaptureManager, CaptureState, DeviceInfo, StreamHandle},
  config::HarnessConfig,
  model::{
    CombinedRegistry, ModelDefinition, ModelStore, RegistryError, StoreError, Task, builtin_models,
    resolve, validate,
  },
  output::{Presentation, Presenter, ResultPanel},
  pipeline::{LoadEvent, ModelLoadError, PipelineCache, PipelineHandle},
  probe::{CapabilityProber, CapabilityReport},
  runner::{InferenceRunner, RunError, RunOutcome, TaskOptions},
  runtime::InferenceRuntime,
};

#[derive(Error, Debug)]
pub enum OrchestratorError {
  #[error(transparent)]
  Registry(#[from] RegistryError),
  #[error("自定义模型存储错误: {0}")]
  Store(#[from] StoreError),
  #[error(transparent)]
  Load(#[from] ModelLoadError),
  #[error(transparent)]
  Run(#[from] RunError),
  #[error(transparent)]
  Capture(#[from] CaptureError),
  #[error("尚未选择模型")]
  NoModelSelected,
  #[error("摄像头未启动")]
  CameraInactive,
  #[error("上一次推理尚未完成")]
  Busy,
  #[error("模型 {0} 的加载结果已被更新的选择取代")]
  Superseded(String),
}

/// 一次成功推理的完整结果
#[derive(Debug, Clone)]
pub struct RunReport {
  pub outcome: RunOutcome,
  pub presentation: Presentation,
}

#[derive(Debug, Default)]
struct Selection {
  latest: u64,
  model_id: Option<String>,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// 会话上下文，持有探测结果、模型注册表、管线缓存、摄像头与结果面板
pub struct Orchestrator {
  prober: CapabilityProber,
  store: Arc<dyn ModelStore>,
  cache: PipelineCache,
  capture: CaptureManager,
  runner: InferenceRunner,
  presenter: Presenter,
  panel: Mutex<ResultPanel>,
  registry: RwLock<CombinedRegistry>,
  // 增删自定义模型时需要跨越存储写入，因此使用异步锁
  user_models: AsyncMutex<Vec<ModelDefinition>>,
  selection: Mutex<Selection>,
  running: AtomicBool,
  capability: RwLock<CapabilityReport>,
}

impl Orchestrator {
  pub fn new(
    runtime: Arc<dyn InferenceRuntime>,
    camera: Arc<dyn CameraCapability>,
    store: Arc<dyn ModelStore>,
    prober: CapabilityProber,
    config: &HarnessConfig,
  ) -> Self {
    Self {
      prober,
      store,
      cache: PipelineCache::with_config(runtime, config.loader),
      capture: CaptureManager::new(camera).with_hints(config.capture),
      runner: InferenceRunner::default().with_default_threshold(config.default_threshold),
      presenter: Presenter::default().with_max_results(config.max_results),
      panel: Mutex::new(ResultPanel::default()),
      registry: RwLock::new(resolve(&builtin_models(), &[])),
      user_models: AsyncMutex::new(Vec::new()),
      selection: Mutex::new(Selection::default()),
      running: AtomicBool::new(false),
      capability: RwLock::new(CapabilityReport::default()),
    }
  }

  /// 探测 GPU 能力并读取自定义模型
  pub async fn initialize(&self) -> Result<CapabilityReport, OrchestratorError> {
    let report = self.prober.probe().await;
    match &report.reason {
      None => info!("GPU 可用: {}", report.adapter_name.as_deref().unwrap_or("未知适配器")),
      Some(reason) => info!("使用 CPU: {}", reason),
    }
    self.cache.update_capability(report.clone());
    *self.capability.write().unwrap_or_else(PoisonError::into_inner) = report.clone();

    let user = self.store.load().await?;
    debug!("读取 {} 个自定义模型", user.len());
    let mut user_models = self.user_models.lock().await;
    *user_models = user;
    self.rebuild_registry(&user_models);

    Ok(report)
  }

  pub fn capability(&self) -> CapabilityReport {
    self.capability.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  pub fn models(&self) -> Vec<ModelDefinition> {
    self.registry().iter().cloned().collect()
  }

  pub fn model(&self, id: &str) -> Option<ModelDefinition> {
    self.registry().get(id).cloned()
  }

  pub async fn user_models(&self) -> Vec<ModelDefinition> {
    self.user_models.lock().await.clone()
  }

  pub fn pipeline_cache(&self) -> &PipelineCache {
    &self.cache
  }

  pub fn load_events(&self) -> broadcast::Receiver<LoadEvent> {
    self.cache.subscribe()
  }

  /// 调用方未指定参数时使用的默认值
  pub fn default_options(&self, def: &ModelDefinition) -> TaskOptions {
    match def.task {
      Task::ZeroShotImageClassification if !def.default_labels.is_empty() => {
        TaskOptions::default().with_labels(def.default_labels.iter().cloned())
      }
      Task::ObjectDetection => TaskOptions::default().with_threshold(self.runner.default_threshold()),
      _ => TaskOptions::default(),
    }
  }

  /// 选择并加载模型。加载期间若有更新的选择，本次结果不会生效
  pub async fn select_model(&self, id: &str) -> Result<Arc<PipelineHandle>, OrchestratorError> {
    let def = self
      .model(id)
      .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

    let ticket = {
      let mut selection = self.lock_selection();
      selection.latest += 1;
      selection.latest
    };

    let result = self.cache.get(&def).await;

    let mut selection = self.lock_selection();
    if selection.latest != ticket {
      info!("模型 {} 加载完成, 但已有更新的选择", def.id);
      return Err(OrchestratorError::Superseded(def.id));
    }

    match result {
      Ok(handle) => {
        info!("已选择模型 {} ({})", def.id, handle.device());
        selection.model_id = Some(def.id);
        Ok(handle)
      }
      Err(e) => {
        drop(selection);
        warn!("{}", e);
        self.lock_panel().show_error(e.to_string());
        Err(e.into())
      }
    }
  }

  pub fn selected_model(&self) -> Option<ModelDefinition> {
    let id = self.lock_selection().model_id.clone()?;
    self.model(&id)
  }

  /// 用当前选中的模型对当前画面执行一次推理。同一时刻只允许一次推理
  pub async fn run_selected(&self, options: Option<TaskOptions>) -> Result<RunReport, OrchestratorError> {
    if self.running.swap(true, Ordering::AcqRel) {
      return Err(OrchestratorError::Busy);
    }
    let _running = RunningGuard(&self.running);

    let def = self.selected_model().ok_or(OrchestratorError::NoModelSelected)?;
    let stream = self.capture.current_stream().ok_or(OrchestratorError::CameraInactive)?;
    let handle = self.cache.get(&def).await?;
    let options = options.unwrap_or_else(|| self.default_options(&def));

    match self.runner.run(&handle, &*stream, &options).await {
      Ok(outcome) => {
        let presentation = self.presenter.present_outcome(&outcome, None);
        self.lock_panel().show(presentation.clone());
        Ok(RunReport { outcome, presentation })
      }
      Err(e) => {
        self.lock_panel().show_error(e.to_string());
        Err(e.into())
      }
    }
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  pub fn panel(&self) -> ResultPanel {
    self.lock_panel().clone()
  }

  pub async fn start_camera(&self, device_id: Option<&str>) -> Result<StreamHandle, OrchestratorError> {
    Ok(self.capture.start(device_id).await?)
  }

  pub async fn stop_camera(&self) {
    self.capture.stop().await
  }

  pub async fn switch_camera(&self, device_id: &str) -> Result<StreamHandle, OrchestratorError> {
    Ok(self.capture.switch(device_id).await?)
  }

  pub async fn devices(&self) -> Vec<DeviceInfo> {
    self.capture.enumerate_devices().await
  }

  pub fn capture_state(&self) -> CaptureState {
    self.capture.state()
  }

  pub fn subscribe_capture(&self) -> watch::Receiver<CaptureState> {
    self.capture.subscribe()
  }

  /// 添加自定义模型并持久化。与内置模型同 ID 时覆盖内置模型
  pub async fn add_user_model(&self, def: ModelDefinition) -> Result<(), OrchestratorError> {
    let mut user_models = self.user_models.lock().await;
    validate(&def, &user_models)?;

    let def = def.user_defined();
    let id = def.id.clone();
    let mut next = user_models.clone();
    next.push(def);
    self.store.save(&next).await?;

    *user_models = next;
    self.rebuild_registry(&user_models);
    drop(user_models);

    // 被覆盖的内置模型可能已加载
    self.cache.release(&id).await;
    info!("已添加自定义模型 {}", id);
    Ok(())
  }

  pub async fn remove_user_model(&self, id: &str) -> Result<(), OrchestratorError> {
    let mut user_models = self.user_models.lock().await;
    if !user_models.iter().any(|def| def.id == id) {
      return Err(RegistryError::NotFound(id.to_string()).into());
    }

    let next: Vec<ModelDefinition> = user_models.iter().filter(|def| def.id != id).cloned().collect();
    self.store.save(&next).await?;

    *user_models = next;
    self.rebuild_registry(&user_models);
    drop(user_models);

    self.cache.release(id).await;
    self.forget_selection_if_missing();
    info!("已删除自定义模型 {}", id);
    Ok(())
  }

  pub async fn clear_user_models(&self) -> Result<(), OrchestratorError> {
    let mut user_models = self.user_models.lock().await;
    self.store.save(&[]).await?;

    let removed: Vec<String> = user_models.drain(..).map(|def| def.id).collect();
    self.rebuild_registry(&user_models);
    drop(user_models);

    for id in &removed {
      self.cache.release(id).await;
    }
    self.forget_selection_if_missing();
    info!("已清空 {} 个自定义模型", removed.len());
    Ok(())
  }

  /// 依次加载所有模型，单个模型失败不影响其它模型
  pub async fn preload_all(&self) -> Vec<(String, Result<(), ModelLoadError>)> {
    let mut results = Vec::new();
    for def in self.models() {
      let result = self.cache.get(&def).await.map(|_| ());
      if let Err(e) = &result {
        warn!("{}", e);
      }
      results.push((def.id, result));
    }
    let loaded = results.iter().filter(|(_, r)| r.is_ok()).count();
    info!("预加载完成: {}/{} 个模型可用", loaded, results.len());
    results
  }

  /// 停止摄像头并释放所有管线
  pub async fn shutdown(&self) {
    self.capture.stop().await;
    self.cache.clear().await;
  }

  fn registry(&self) -> std::sync::RwLockReadGuard<'_, CombinedRegistry> {
    self.registry.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn rebuild_registry(&self, user: &[ModelDefinition]) {
    let combined = resolve(&builtin_models(), user);
    *self.registry.write().unwrap_or_else(PoisonError::into_inner) = combined;
  }

  fn forget_selection_if_missing(&self) {
    let mut selection = self.lock_selection();
    if let Some(id) = &selection.model_id
      && self.registry().get(id).is_none()
    {
      debug!("选中的模型 {} 已不存在", id);
      selection.model_id = None;
    }
  }

  fn lock_selection(&self) -> std::sync::MutexGuard<'_, Selection> {
    self.selection.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn lock_panel(&self) -> std::sync::MutexGuard<'_, ResultPanel> {
    self.panel.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
