// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/model/store.rs - 自定义模型的本地持久化
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

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::ModelDefinition};

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerdeError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 自定义模型定义的存储
#[async_trait]
pub trait ModelStore: Send + Sync {
  async fn load(&self) -> Result<Vec<ModelDefinition>, StoreError>;
  async fn save(&self, defs: &[ModelDefinition]) -> Result<(), StoreError>;
}

/// 以 JSON 文件保存自定义模型，文件不存在视为空列表
pub struct JsonFileStore {
  path: PathBuf,
}

impl JsonFileStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl FromUrlWithScheme for JsonFileStore {
  const SCHEME: &'static str = "file";
}

impl FromUrl for JsonFileStore {
  type Error = StoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StoreError::SchemeMismatch(format!(
        "期望存储方式 '{}', 实际存储方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Ok(JsonFileStore::new(url.path()))
  }
}

#[async_trait]
impl ModelStore for JsonFileStore {
  async fn load(&self) -> Result<Vec<ModelDefinition>, StoreError> {
    let data = match tokio::fs::read(&self.path).await {
      Ok(data) => data,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        debug!("自定义模型文件不存在: {}", self.path.display());
        return Ok(Vec::new());
      }
      Err(e) => return Err(e.into()),
    };

    let mut defs: Vec<ModelDefinition> = serde_json::from_slice(&data)?;
    for def in defs.iter_mut() {
      def.is_user_defined = true;
    }
    info!("从 {} 加载了 {} 个自定义模型", self.path.display(), defs.len());
    Ok(defs)
  }

  async fn save(&self, defs: &[ModelDefinition]) -> Result<(), StoreError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      tokio::fs::create_dir_all(parent).await?;
    }
    let data = serde_json::to_vec_pretty(defs)?;
    tokio::fs::write(&self.path, data).await?;
    debug!("保存了 {} 个自定义模型到 {}", defs.len(), self.path.display());
    Ok(())
  }
}

/// 仅保存在内存中的存储，用于测试与未配置持久化的场景
#[derive(Default)]
pub struct MemoryStore {
  defs: Mutex<Vec<ModelDefinition>>,
}

impl MemoryStore {
  pub fn with_models(defs: Vec<ModelDefinition>) -> Self {
    Self {
      defs: Mutex::new(defs),
    }
  }
}

#[async_trait]
impl ModelStore for MemoryStore {
  async fn load(&self) -> Result<Vec<ModelDefinition>, StoreError> {
    let defs = self.defs.lock().unwrap_or_else(|e| e.into_inner());
    Ok(defs.clone())
  }

  async fn save(&self, defs: &[ModelDefinition]) -> Result<(), StoreError> {
    let mut stored = self.defs.lock().unwrap_or_else(|e| e.into_inner());
    *stored = defs.to_vec();
    Ok(())
  }
}

pub enum StoreWrapper {
  JsonFile(JsonFileStore),
  Memory(MemoryStore),
}

impl FromUrl for StoreWrapper {
  type Error = StoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      JsonFileStore::SCHEME => Ok(StoreWrapper::JsonFile(JsonFileStore::from_url(url)?)),
      "memory" => Ok(StoreWrapper::Memory(MemoryStore::default())),
      other => Err(StoreError::SchemeMismatch(format!("不支持的存储方式 '{}'", other))),
    }
  }
}

#[async_trait]
impl ModelStore for StoreWrapper {
  async fn load(&self) -> Result<Vec<ModelDefinition>, StoreError> {
    match self {
      StoreWrapper::JsonFile(store) => store.load().await,
      StoreWrapper::Memory(store) => store.load().await,
    }
  }

  async fn save(&self, defs: &[ModelDefinition]) -> Result<(), StoreError> {
    match self {
      StoreWrapper::JsonFile(store) => store.save(defs).await,
      StoreWrapper::Memory(store) => store.save(defs).await,
    }
  }
}
