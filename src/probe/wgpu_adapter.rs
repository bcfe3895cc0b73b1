// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/probe/wgpu_adapter.rs - 基于 wgpu 适配器查询的 GPU 探测
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

use async_trait::async_trait;
use tracing::debug;

use super::{AdapterInfo, GpuCapability, GpuError, REDUCED_PRECISION_FEATURE};

/// 通过 wgpu 请求高性能适配器，特性取自适配器本身
pub struct WgpuGpu {
  backends: wgpu::Backends,
}

impl Default for WgpuGpu {
  fn default() -> Self {
    Self {
      backends: wgpu::Backends::PRIMARY,
    }
  }
}

impl WgpuGpu {
  pub fn with_backends(mut self, backends: wgpu::Backends) -> Self {
    self.backends = backends;
    self
  }
}

/// 软件光栅化适配器不算作加速
pub(crate) fn describe(name: String, device_type: wgpu::DeviceType, features: wgpu::Features) -> Option<AdapterInfo> {
  if device_type == wgpu::DeviceType::Cpu {
    debug!("忽略软件适配器 {}", name);
    return None;
  }
  let mut names = BTreeSet::new();
  if features.contains(wgpu::Features::SHADER_F16) {
    names.insert(REDUCED_PRECISION_FEATURE.to_string());
  }
  Some(AdapterInfo { name, features: names })
}

fn request(backends: wgpu::Backends) -> Option<AdapterInfo> {
  let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
    backends,
    ..Default::default()
  });
  let options = wgpu::RequestAdapterOptions {
    power_preference: wgpu::PowerPreference::HighPerformance,
    force_fallback_adapter: false,
    compatible_surface: None,
  };

  match futures::executor::block_on(instance.request_adapter(&options)) {
    Ok(adapter) => {
      let info = adapter.get_info();
      debug!("wgpu 适配器: {} ({:?}, {:?})", info.name, info.device_type, info.backend);
      describe(info.name, info.device_type, adapter.features())
    }
    Err(e) => {
      debug!("wgpu 未返回适配器: {:?}", e);
      None
    }
  }
}

#[async_trait]
impl GpuCapability for WgpuGpu {
  async fn query_adapter(&self) -> Result<Option<AdapterInfo>, GpuError> {
    let backends = self.backends;
    // 驱动初始化可能阻塞较久，放到阻塞线程池中执行
    tokio::task::spawn_blocking(move || request(backends))
      .await
      .map_err(|e| GpuError(format!("适配器查询任务异常退出: {}", e)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reduced_precision_comes_from_adapter_features() {
    let with_f16 = describe(
      "Discrete".to_string(),
      wgpu::DeviceType::DiscreteGpu,
      wgpu::Features::SHADER_F16,
    )
    .unwrap();
    assert!(with_f16.features.contains(REDUCED_PRECISION_FEATURE));

    let without = describe(
      "Integrated".to_string(),
      wgpu::DeviceType::IntegratedGpu,
      wgpu::Features::empty(),
    )
    .unwrap();
    assert!(without.features.is_empty());
  }

  #[test]
  fn software_adapter_is_not_acceleration() {
    assert_eq!(
      describe("llvmpipe".to_string(), wgpu::DeviceType::Cpu, wgpu::Features::SHADER_F16),
      None
    );
  }

  #[tokio::test]
  async fn query_never_fails_without_a_gpu() {
    // 无 GPU 的机器上只会得到 None，而不是错误
    let report = crate::probe::CapabilityProber::new(std::sync::Arc::new(WgpuGpu::default()))
      .probe()
      .await;
    assert_eq!(report.reduced_precision, report.features.iter().any(|f| f == REDUCED_PRECISION_FEATURE));
    if !report.supported {
      assert!(!report.reduced_precision);
    }
  }
}
