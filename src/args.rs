// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/args.rs - 命令行参数与会话构建
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

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl,
  capture::CaptureWrapper,
  config::HarnessConfig,
  model::{MemoryStore, ModelStore, StoreWrapper},
  orchestrator::Orchestrator,
  output::OutputWrapper,
  runner::TaskOptions,
  runtime::RuntimeWrapper,
};

/// 各个可执行程序共用的会话参数，优先于配置文件
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
  /// JSON 配置文件路径
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 推理运行时，如 replay:///path/to/recordings
  #[arg(long, value_name = "RUNTIME")]
  pub runtime: Option<Url>,

  /// 摄像头，如 v4l:///dev/video0 或 image:///path/to/image.png
  #[arg(long, value_name = "CAMERA")]
  pub camera: Option<Url>,

  /// 自定义模型存储，如 file:///path/to/models.json
  #[arg(long, value_name = "STORE")]
  pub store: Option<Url>,

  /// 输出，可重复指定，如 console:// 或 image:///tmp/out.png
  #[arg(long = "output", value_name = "OUTPUT")]
  pub outputs: Vec<Url>,

  /// 禁用 GPU 加速
  #[arg(long)]
  pub cpu: bool,

  /// 跳过 GPU 能力探测
  #[arg(long)]
  pub no_probe: bool,

  /// 分类结果最多显示的条数
  #[arg(long, value_name = "COUNT")]
  pub max_results: Option<usize>,
}

impl SessionArgs {
  /// 读取配置文件（如果有）并以命令行参数覆盖
  pub async fn load_config(&self) -> Result<HarnessConfig> {
    let mut config = match &self.config {
      Some(path) => HarnessConfig::load(path).await?,
      None => HarnessConfig::default(),
    };

    if let Some(runtime) = &self.runtime {
      config.runtime = Some(runtime.to_string());
    }
    if let Some(camera) = &self.camera {
      config.camera = Some(camera.to_string());
    }
    if let Some(store) = &self.store {
      config.store = Some(store.to_string());
    }
    if !self.outputs.is_empty() {
      config.outputs = self.outputs.iter().map(Url::to_string).collect();
    }
    if self.cpu {
      config.loader.prefer_accelerated = false;
    }
    if self.no_probe {
      config.probe.enabled = false;
    }
    if let Some(max_results) = self.max_results {
      config.max_results = max_results;
    }

    config.validate()?;
    Ok(config)
  }
}

/// 推理参数
#[derive(Args, Debug, Clone, Default)]
pub struct OptionsArgs {
  /// 零样本分类的候选标签，以逗号分隔
  #[arg(long, value_delimiter = ',', value_name = "LABELS")]
  pub labels: Vec<String>,

  /// 目标检测的置信度阈值 (0.0 - 1.0]
  #[arg(long, value_name = "THRESHOLD")]
  pub threshold: Option<f32>,
}

impl OptionsArgs {
  /// 未指定任何参数时返回 `None`，由会话使用模型的默认值
  pub fn task_options(&self) -> Option<TaskOptions> {
    if self.labels.is_empty() && self.threshold.is_none() {
      return None;
    }
    Some(TaskOptions {
      labels: (!self.labels.is_empty()).then(|| self.labels.clone()),
      threshold: self.threshold,
    })
  }
}

fn parse_url(kind: &str, value: Option<&str>) -> Result<Url> {
  let value = value.with_context(|| format!("未配置{}", kind))?;
  Url::parse(value).with_context(|| format!("{}地址无效: {}", kind, value))
}

/// 按配置构建会话
///
/// 运行时与摄像头都可以缺省：管理模型、探测 GPU 等命令不需要它们，
/// 真正用到时才会报告未配置。
pub fn build_orchestrator(config: &HarnessConfig) -> Result<Orchestrator> {
  let runtime = match config.runtime.as_deref() {
    Some(runtime) => {
      let runtime_url = parse_url("推理运行时", Some(runtime))?;
      info!("推理运行时: {}", runtime_url);
      RuntimeWrapper::from_url(&runtime_url)?
    }
    None => {
      warn!("未配置推理运行时，模型无法加载");
      RuntimeWrapper::Unconfigured
    }
  };
  let camera = match config.camera.as_deref() {
    Some(camera) => {
      let camera_url = parse_url("摄像头", Some(camera))?;
      info!("摄像头: {}", camera_url);
      CaptureWrapper::from_url(&camera_url)?
    }
    None => {
      warn!("未配置摄像头，无法采集画面");
      CaptureWrapper::Unconfigured
    }
  };

  let store: Arc<dyn ModelStore> = match config.store.as_deref() {
    Some(store) => {
      let store_url = parse_url("模型存储", Some(store))?;
      info!("自定义模型存储: {}", store_url);
      Arc::new(StoreWrapper::from_url(&store_url)?)
    }
    None => Arc::new(MemoryStore::default()),
  };

  Ok(Orchestrator::new(
    Arc::new(runtime),
    Arc::new(camera),
    store,
    config.probe.prober(),
    config,
  ))
}

/// 按配置构建输出，未配置时输出到控制台
pub fn build_outputs(config: &HarnessConfig) -> Result<Vec<OutputWrapper>> {
  if config.outputs.is_empty() {
    return Ok(vec![OutputWrapper::from_url(&Url::parse("console://")?)?]);
  }
  config
    .outputs
    .iter()
    .map(|output| -> Result<OutputWrapper> {
      let url = parse_url("输出", Some(output))?;
      info!("输出: {}", url);
      Ok(OutputWrapper::from_url(&url)?)
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{capture::CaptureErrorKind, orchestrator::OrchestratorError};

  #[tokio::test]
  async fn flags_override_config() {
    let args = SessionArgs {
      camera: Some(Url::parse("image:///tmp/desk.png").unwrap()),
      cpu: true,
      max_results: Some(2),
      ..SessionArgs::default()
    };
    let config = args.load_config().await.unwrap();
    assert_eq!(config.camera.as_deref(), Some("image:///tmp/desk.png"));
    assert!(!config.loader.prefer_accelerated);
    assert_eq!(config.max_results, 2);
    assert!(config.probe.enabled);
  }

  #[test]
  fn options_are_only_built_when_given() {
    assert_eq!(OptionsArgs::default().task_options(), None);
    let args = OptionsArgs {
      labels: vec!["a cat".into()],
      threshold: None,
    };
    assert_eq!(
      args.task_options(),
      Some(TaskOptions::default().with_labels(["a cat"]))
    );
  }

  #[tokio::test]
  async fn session_builds_without_camera_or_runtime() {
    let config = HarnessConfig::default();
    let orchestrator = build_orchestrator(&config).unwrap();

    // 模型管理不依赖摄像头和运行时
    assert!(orchestrator.model("vit").is_some());
    assert!(orchestrator.devices().await.is_empty());

    let Err(err) = orchestrator.start_camera(None).await else {
      panic!("未配置摄像头时不应打开视频流");
    };
    assert!(matches!(&err, OrchestratorError::Capture(e) if e.kind == CaptureErrorKind::NoDevice));

    let Err(err) = orchestrator.select_model("vit").await else {
      panic!("未配置运行时不应加载模型");
    };
    assert!(matches!(&err, OrchestratorError::Load(_)));
    assert!(err.to_string().contains("未配置推理运行时"));
  }

  #[test]
  fn malformed_addresses_are_still_rejected() {
    let config = HarnessConfig {
      camera: Some("not a url".to_string()),
      ..HarnessConfig::default()
    };
    let err = build_orchestrator(&config).err().unwrap();
    assert!(err.to_string().contains("摄像头地址无效"));
  }
}
