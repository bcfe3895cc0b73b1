// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/probe.rs - GPU 加速能力探测
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

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::model::DeviceConfig;

#[cfg(feature = "wgpu_probe")]
mod wgpu_adapter;
#[cfg(feature = "wgpu_probe")]
pub use self::wgpu_adapter::WgpuGpu;

/// 表示适配器支持半精度着色器的特性名
pub const REDUCED_PRECISION_FEATURE: &str = "shader-f16";

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Error, Debug, Clone)]
#[error("GPU 查询失败: {0}")]
pub struct GpuError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
  pub name: String,
  pub features: BTreeSet<String>,
}

/// 平台 GPU 能力
#[async_trait]
pub trait GpuCapability: Send + Sync {
  /// 没有可用适配器时返回 `Ok(None)`
  async fn query_adapter(&self) -> Result<Option<AdapterInfo>, GpuError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityReport {
  pub supported: bool,
  pub reduced_precision: bool,
  pub reason: Option<String>,
  pub adapter_name: Option<String>,
  pub features: Vec<String>,
}

impl CapabilityReport {
  pub fn unsupported(reason: impl Into<String>) -> Self {
    Self {
      supported: false,
      reduced_precision: false,
      reason: Some(reason.into()),
      adapter_name: None,
      features: Vec::new(),
    }
  }

  pub fn from_adapter(adapter: AdapterInfo) -> Self {
    Self {
      supported: true,
      reduced_precision: adapter.features.contains(REDUCED_PRECISION_FEATURE),
      reason: None,
      adapter_name: Some(adapter.name),
      features: adapter.features.into_iter().collect(),
    }
  }

  /// 仅当探测支持且允许加速时选择 GPU 路径
  pub fn device_config(&self, prefer_accelerated: bool) -> DeviceConfig {
    if self.supported && prefer_accelerated {
      DeviceConfig::gpu(self.reduced_precision)
    } else {
      DeviceConfig::cpu()
    }
  }
}

impl Default for CapabilityReport {
  fn default() -> Self {
    Self::unsupported("尚未探测 GPU 能力")
  }
}

/// 编译时未启用任何 GPU 后端，探测总是报告不支持
pub struct NoGpu;

#[async_trait]
impl GpuCapability for NoGpu {
  async fn query_adapter(&self) -> Result<Option<AdapterInfo>, GpuError> {
    Err(GpuError("未启用 GPU 探测后端 (wgpu_probe)".to_string()))
  }
}

/// 当前平台可用的 GPU 能力查询
pub fn platform_gpu() -> Arc<dyn GpuCapability> {
  #[cfg(feature = "wgpu_probe")]
  {
    Arc::new(WgpuGpu::default())
  }
  #[cfg(not(feature = "wgpu_probe"))]
  {
    Arc::new(NoGpu)
  }
}

/// 每个会话探测一次，结果会被缓存。任何失败都归结为 `supported = false`
pub struct CapabilityProber {
  gpu: Arc<dyn GpuCapability>,
  timeout: Duration,
  enabled: bool,
  report: Mutex<Option<CapabilityReport>>,
}

impl CapabilityProber {
  pub fn new(gpu: Arc<dyn GpuCapability>) -> Self {
    Self {
      gpu,
      timeout: DEFAULT_PROBE_TIMEOUT,
      enabled: true,
      report: Mutex::new(None),
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub async fn probe(&self) -> CapabilityReport {
    let mut slot = self.report.lock().await;
    if let Some(report) = slot.as_ref() {
      return report.clone();
    }
    let report = self.query().await;
    *slot = Some(report.clone());
    report
  }

  /// 丢弃缓存结果并重新探测
  pub async fn recheck(&self) -> CapabilityReport {
    let mut slot = self.report.lock().await;
    let report = self.query().await;
    *slot = Some(report.clone());
    report
  }

  /// 上一次探测的结果，尚未探测时为 `None`
  pub async fn last_report(&self) -> Option<CapabilityReport> {
    self.report.lock().await.clone()
  }

  async fn query(&self) -> CapabilityReport {
    if !self.enabled {
      return CapabilityReport::unsupported("配置中已禁用 GPU 探测");
    }

    debug!("开始探测 GPU 能力, 超时 {:?}", self.timeout);
    let report = match tokio::time::timeout(self.timeout, self.gpu.query_adapter()).await {
      Err(_) => CapabilityReport::unsupported(format!("GPU 探测超时 ({} ms)", self.timeout.as_millis())),
      Ok(Err(e)) => CapabilityReport::unsupported(e.to_string()),
      Ok(Ok(None)) => CapabilityReport::unsupported("未找到可用的 GPU 适配器"),
      Ok(Ok(Some(adapter))) => CapabilityReport::from_adapter(adapter),
    };

    if report.supported {
      info!(
        "GPU 可用: {}, 半精度支持: {}",
        report.adapter_name.as_deref().unwrap_or("-"),
        report.reduced_precision
      );
    } else {
      warn!(
        "GPU 不可用, 将使用 CPU: {}",
        report.reason.as_deref().unwrap_or("未知原因")
      );
    }
    report
  }
}
