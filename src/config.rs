// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/config.rs - 运行配置
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

//! # 运行配置
//!
//! 配置以 JSON 文件保存，所有字段都有默认值，文件中只需写出需要修改的部分：
//!
//! ```json
//! {
//!   "runtime": "replay:///srv/jinghu/recordings",
//!   "camera": "v4l:///dev/video0",
//!   "probe": { "timeout_ms": 2000 },
//!   "max_results": 3
//! }
//! ```
//!
//! 命令行参数优先于配置文件。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
  capture::CaptureHints,
  output::DEFAULT_MAX_RESULTS,
  pipeline::LoaderConfig,
  probe::{CapabilityProber, DEFAULT_PROBE_TIMEOUT, platform_gpu},
  runner::DEFAULT_DETECTION_THRESHOLD,
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {0}: {1}")]
  IoError(PathBuf, std::io::Error),
  #[error("配置格式错误: {0}")]
  SerdeError(#[from] serde_json::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
}

/// 适配器特性只能由适配器本身报告，这里不接受手工指定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
  pub enabled: bool,
  pub timeout_ms: u64,
}

impl Default for ProbeConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      timeout_ms: DEFAULT_PROBE_TIMEOUT.as_millis() as u64,
    }
  }
}

impl ProbeConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }

  pub fn prober(&self) -> CapabilityProber {
    CapabilityProber::new(platform_gpu())
      .with_timeout(self.timeout())
      .enabled(self.enabled)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
  pub runtime: Option<String>,
  pub camera: Option<String>,
  pub store: Option<String>,
  pub outputs: Vec<String>,
  pub probe: ProbeConfig,
  pub capture: CaptureHints,
  pub loader: LoaderConfig,
  pub max_results: usize,
  pub default_threshold: f32,
}

impl Default for HarnessConfig {
  fn default() -> Self {
    Self {
      runtime: None,
      camera: None,
      store: None,
      outputs: Vec::new(),
      probe: ProbeConfig::default(),
      capture: CaptureHints::default(),
      loader: LoaderConfig::default(),
      max_results: DEFAULT_MAX_RESULTS,
      default_threshold: DEFAULT_DETECTION_THRESHOLD,
    }
  }
}

impl HarnessConfig {
  pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
    let config: HarnessConfig = serde_json::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
      .await
      .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
    debug!("读取配置文件: {}", path.display());
    Self::from_json_str(&text)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(self.default_threshold > 0.0 && self.default_threshold <= 1.0) {
      return Err(ConfigError::Invalid(format!(
        "default_threshold 必须在 (0, 1] 之间, 实际为 {}",
        self.default_threshold
      )));
    }
    if self.max_results == 0 {
      return Err(ConfigError::Invalid("max_results 必须大于 0".to_string()));
    }
    if self.probe.timeout_ms == 0 {
      return Err(ConfigError::Invalid("probe.timeout_ms 必须大于 0".to_string()));
    }
    if self.capture.ideal_width == 0 || self.capture.ideal_height == 0 {
      return Err(ConfigError::Invalid("capture 分辨率必须大于 0".to_string()));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_object_gives_defaults() {
    let config = HarnessConfig::from_json_str("{}").unwrap();
    assert_eq!(config, HarnessConfig::default());
    assert_eq!(config.probe.timeout(), Duration::from_millis(5000));
    assert_eq!(config.capture.ideal_width, 640);
    assert!(config.loader.fallback_to_cpu);
  }

  #[test]
  fn partial_override() {
    let config = HarnessConfig::from_json_str(
      r#"{"max_results": 3, "probe": {"timeout_ms": 200}, "loader": {"prefer_accelerated": false}}"#,
    )
    .unwrap();
    assert_eq!(config.max_results, 3);
    assert!(config.probe.enabled);
    assert_eq!(config.probe.timeout(), Duration::from_millis(200));
    assert!(!config.loader.prefer_accelerated);
    assert!(config.loader.fallback_to_cpu);
  }

  #[test]
  fn adapter_features_cannot_be_configured() {
    // 半精度只能来自适配器查询结果
    assert!(matches!(
      HarnessConfig::from_json_str(r#"{"probe": {"features": ["shader-f16"]}}"#),
      Err(ConfigError::SerdeError(_))
    ));
    assert!(matches!(
      HarnessConfig::from_json_str(r#"{"probe": {"render_node_dir": "/tmp"}}"#),
      Err(ConfigError::SerdeError(_))
    ));
  }

  #[test]
  fn invalid_values_are_rejected() {
    assert!(matches!(
      HarnessConfig::from_json_str(r#"{"default_threshold": 0}"#),
      Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
      HarnessConfig::from_json_str(r#"{"max_results": 0}"#),
      Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
      HarnessConfig::from_json_str("[1]"),
      Err(ConfigError::SerdeError(_))
    ));
  }

  #[tokio::test]
  async fn load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jinghu.json");
    std::fs::write(&path, r#"{"camera": "image:///tmp/desk.png"}"#).unwrap();
    let config = HarnessConfig::load(&path).await.unwrap();
    assert_eq!(config.camera.as_deref(), Some("image:///tmp/desk.png"));

    assert!(matches!(
      HarnessConfig::load(dir.path().join("missing.json")).await,
      Err(ConfigError::IoError(..))
    ));
  }
}
