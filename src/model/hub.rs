// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/model/hub.rs - Hugging Face 热门模型查询
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

//! # 模型仓库
//!
//! 按任务类型查询 Hugging Face 上下载量最高的模型，作为添加自定义模型时的参考。
//! 查询结果只用于展示，不会自动写入注册表。

use std::time::Duration;

use futures::future::join_all;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::{ModelDefinition, Task};

pub const HUB_API: &str = "https://huggingface.co/api/models";
pub const DEFAULT_SUGGESTION_LIMIT: usize = 5;
pub const HUB_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum HubError {
  #[error("模型仓库请求失败: {0}")]
  Http(#[from] reqwest::Error),
  #[error("模型仓库地址无效: {0}")]
  Url(#[from] url::ParseError),
}

/// 仓库返回的模型摘要，其余字段忽略
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HubModel {
  pub id: String,
  #[serde(default)]
  pub downloads: u64,
  #[serde(default)]
  pub likes: u64,
  #[serde(default)]
  pub pipeline_tag: Option<String>,
}

impl HubModel {
  /// 可直接用于注册表的模型 ID，如 `google/vit-base` 变为 `hf_google_vit-base`
  pub fn suggested_id(&self) -> String {
    let body: String = self
      .id
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
      .collect();
    format!("hf_{}", body)
  }

  pub fn to_definition(&self, task: Task) -> ModelDefinition {
    ModelDefinition::new(self.suggested_id(), task, self.id.clone())
      .with_display_name(self.id.clone())
      .with_description(format!(
        "Hugging Face 上的 {} 模型，下载 {}，点赞 {}",
        task,
        format_count(self.downloads),
        format_count(self.likes)
      ))
  }
}

pub fn format_count(count: u64) -> String {
  match count {
    n if n >= 1_000_000 => format!("{:.1}M", n as f64 / 1_000_000.0),
    n if n >= 1_000 => format!("{:.1}K", n as f64 / 1_000.0),
    n => n.to_string(),
  }
}

pub struct HubClient {
  http: reqwest::Client,
  base: Url,
  limit: usize,
}

impl HubClient {
  pub fn new() -> Result<Self, HubError> {
    Self::build(reqwest::Client::builder())
  }

  fn build(builder: reqwest::ClientBuilder) -> Result<Self, HubError> {
    let http = builder
      .timeout(HUB_TIMEOUT)
      .user_agent(concat!("jinghu/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self {
      http,
      base: Url::parse(HUB_API)?,
      limit: DEFAULT_SUGGESTION_LIMIT,
    })
  }

  pub fn with_base_url(mut self, base: Url) -> Self {
    self.base = base;
    self
  }

  pub fn with_limit(mut self, limit: usize) -> Self {
    self.limit = limit.max(1);
    self
  }

  pub fn request_url(&self, task: Task) -> Url {
    let mut url = self.base.clone();
    url
      .query_pairs_mut()
      .append_pair("pipeline_tag", task.as_str())
      .append_pair("sort", "downloads")
      .append_pair("direction", "-1")
      .append_pair("limit", &self.limit.to_string());
    url
  }

  /// 某一任务下载量最高的模型，按下载量降序
  pub async fn popular(&self, task: Task) -> Result<Vec<HubModel>, HubError> {
    let url = self.request_url(task);
    debug!("查询模型仓库: {}", url);
    let mut models: Vec<HubModel> = self
      .http
      .get(url)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;
    models.truncate(self.limit);
    Ok(models)
  }

  /// 并发查询所有任务，某个任务失败不影响其他任务
  pub async fn popular_all(&self) -> Vec<(Task, Result<Vec<HubModel>, HubError>)> {
    let results = join_all(Task::ALL.iter().map(|task| self.popular(*task))).await;
    Task::ALL
      .into_iter()
      .zip(results)
      .inspect(|(task, result)| {
        if let Err(e) = result {
          warn!("{} 模型查询失败: {}", task, e);
        }
      })
      .collect()
  }
}
