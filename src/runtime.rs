// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/runtime.rs - 外部推理运行时接口
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
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl,
  frame::Frame,
  model::{DeviceConfig, Task},
};

#[cfg(feature = "replay_runtime")]
mod replay;
#[cfg(feature = "replay_runtime")]
pub use self::replay::{ReplayRuntime, ReplayRuntimeError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
  #[error("模型加载失败: {0}")]
  Load(String),
  #[error("推理调用失败: {0}")]
  Invoke(String),
  #[error("释放失败: {0}")]
  Dispose(String),
}

/// 加载进度回调，参数为 0–100 的百分比
pub type ProgressFn = Arc<dyn Fn(f32) + Send + Sync>;

#[derive(Clone)]
pub struct LoadOptions {
  pub device: DeviceConfig,
  pub on_progress: ProgressFn,
}

impl LoadOptions {
  pub fn new(device: DeviceConfig) -> Self {
    Self {
      device,
      on_progress: Arc::new(|_| {}),
    }
  }

  pub fn with_progress(mut self, on_progress: ProgressFn) -> Self {
    self.on_progress = on_progress;
    self
  }

  pub fn report(&self, progress: f32) {
    (self.on_progress)(progress)
  }
}

impl fmt::Debug for LoadOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoadOptions")
      .field("device", &self.device)
      .finish_non_exhaustive()
  }
}

/// 与任务类型相关的调用参数
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeArgs {
  None,
  CandidateLabels(Vec<String>),
  Threshold(f32),
}

/// 已实例化、可直接调用的推理管线
#[async_trait]
pub trait Pipeline: Send + Sync {
  async fn invoke(&self, image: &Frame, args: &InvokeArgs) -> Result<Value, RuntimeError>;

  async fn dispose(&self) -> Result<(), RuntimeError> {
    Ok(())
  }
}

#[async_trait]
pub trait InferenceRuntime: Send + Sync {
  async fn instantiate(
    &self,
    task: Task,
    model_ref: &str,
    options: LoadOptions,
  ) -> Result<Box<dyn Pipeline>, RuntimeError>;
}

#[derive(Error, Debug)]
pub enum RuntimeWrapperError {
  #[cfg(feature = "replay_runtime")]
  #[error("回放运行时错误: {0}")]
  ReplayRuntimeError(#[from] ReplayRuntimeError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum RuntimeWrapper {
  #[cfg(feature = "replay_runtime")]
  Replay(ReplayRuntime),
  /// 未配置运行时，任何加载都会失败
  Unconfigured,
}

impl FromUrl for RuntimeWrapper {
  type Error = RuntimeWrapperError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "replay_runtime")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ReplayRuntime::SCHEME {
        return Ok(RuntimeWrapper::Replay(ReplayRuntime::from_url(url)?));
      }
    }
    let _ = url;
    Err(RuntimeWrapperError::SchemeMismatch)
  }
}

#[async_trait]
impl InferenceRuntime for RuntimeWrapper {
  async fn instantiate(
    &self,
    task: Task,
    model_ref: &str,
    options: LoadOptions,
  ) -> Result<Box<dyn Pipeline>, RuntimeError> {
    match self {
      #[cfg(feature = "replay_runtime")]
      RuntimeWrapper::Replay(runtime) => runtime.instantiate(task, model_ref, options).await,
      RuntimeWrapper::Unconfigured => {
        let _ = (task, options);
        Err(RuntimeError::Load(format!("未配置推理运行时，无法加载 {}", model_ref)))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn unconfigured_runtime_fails_to_load() {
    let runtime = RuntimeWrapper::Unconfigured;
    let Err(err) = runtime
      .instantiate(Task::ImageClassification, "Xenova/vit-base-patch16-224", LoadOptions::new(DeviceConfig::cpu()))
      .await
    else {
      panic!("未配置运行时不应加载成功");
    };
    assert!(matches!(&err, RuntimeError::Load(reason) if reason.contains("未配置推理运行时")));
  }

  #[test]
  fn unknown_runtime_scheme() {
    let url = Url::parse("onnx:///models").unwrap();
    assert!(matches!(
      RuntimeWrapper::from_url(&url),
      Err(RuntimeWrapperError::SchemeMismatch)
    ));
  }
}
