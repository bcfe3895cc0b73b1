// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/runtime/replay.rs - 回放录制输出的推理运行时
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

//! # 回放运行时
//!
//! 从目录中读取预先录制的管线输出，每个模型对应一个 JSON 文件，
//! 文件名为模型路径中的 `/` 替换为 `__` 后加上 `.json`：
//!
//! ```text
//! recordings/
//! ├── Xenova__vit-base-patch16-224.json
//! └── Xenova__detr-resnet-50.json
//! ```
//!
//! 每次调用都按原样返回录制的 JSON，不做任何过滤，归一化由推理执行器完成。
//!
//! URL 形式为 `replay:///path/to/recordings`，附加 `?cpu_only` 时拒绝所有
//! GPU 加载请求，可用于演示回退到 CPU 的流程。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::Task,
  runtime::{InferenceRuntime, InvokeArgs, LoadOptions, Pipeline, RuntimeError},
};

#[derive(Error, Debug)]
pub enum ReplayRuntimeError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("录制目录无效: {0}")]
  InvalidDirectory(String),
}

pub struct ReplayRuntime {
  directory: PathBuf,
  cpu_only: bool,
}

impl FromUrlWithScheme for ReplayRuntime {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayRuntime {
  type Error = ReplayRuntimeError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayRuntimeError::SchemeMismatch(format!(
        "期望运行时 '{}', 实际运行时 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    if url.path().is_empty() {
      return Err(ReplayRuntimeError::InvalidDirectory(url.to_string()));
    }

    let cpu_only = url.query_pairs().any(|(k, _)| k == "cpu_only");
    Ok(ReplayRuntime::new(url.path()).cpu_only(cpu_only))
  }
}

impl ReplayRuntime {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      cpu_only: false,
    }
  }

  pub fn cpu_only(mut self, cpu_only: bool) -> Self {
    self.cpu_only = cpu_only;
    self
  }

  pub fn recording_path(&self, model_ref: &str) -> PathBuf {
    self
      .directory
      .join(format!("{}.json", model_ref.replace('/', "__")))
  }
}

#[async_trait]
impl InferenceRuntime for ReplayRuntime {
  async fn instantiate(
    &self,
    task: Task,
    model_ref: &str,
    options: LoadOptions,
  ) -> Result<Box<dyn Pipeline>, RuntimeError> {
    if self.cpu_only && options.device.accelerated {
      return Err(RuntimeError::Load(format!("回放运行时不支持 {}", options.device)));
    }

    options.report(0.0);
    let path = self.recording_path(model_ref);
    debug!("读取录制文件: {}", path.display());
    let data = tokio::fs::read(&path)
      .await
      .map_err(|e| RuntimeError::Load(format!("无法读取 {}: {}", path.display(), e)))?;
    options.report(50.0);

    let output: Value = serde_json::from_slice(&data)
      .map_err(|e| RuntimeError::Load(format!("录制文件格式错误 {}: {}", path.display(), e)))?;
    options.report(100.0);

    info!("回放管线就绪: {} ({}, {})", model_ref, task, options.device);
    Ok(Box::new(ReplayPipeline {
      source: path,
      output,
    }))
  }
}

struct ReplayPipeline {
  source: PathBuf,
  output: Value,
}

impl ReplayPipeline {
  fn source(&self) -> &Path {
    &self.source
  }
}

#[async_trait]
impl Pipeline for ReplayPipeline {
  async fn invoke(&self, image: &Frame, args: &InvokeArgs) -> Result<Value, RuntimeError> {
    debug!(
      "回放 {} (输入 {}x{}, 参数 {:?})",
      self.source().display(),
      image.width(),
      image.height(),
      args
    );
    Ok(self.output.clone())
  }

  async fn dispose(&self) -> Result<(), RuntimeError> {
    debug!("释放回放管线: {}", self.source().display());
    Ok(())
  }
}
