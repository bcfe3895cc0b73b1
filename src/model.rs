// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/model.rs - 模型定义与推理结果
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

use serde::{Deserialize, Serialize};

pub mod hub;
pub mod registry;
pub mod store;

pub use self::hub::{HubClient, HubError, HubModel};
pub use self::registry::{CombinedRegistry, RegistryError, builtin_models, resolve, validate};
pub use self::store::{JsonFileStore, MemoryStore, ModelStore, StoreError, StoreWrapper};

/// 视觉任务类型，决定输入适配方式与输出形状
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Task {
  ImageClassification,
  ZeroShotImageClassification,
  ObjectDetection,
}

impl Task {
  pub const ALL: [Task; 3] = [
    Task::ImageClassification,
    Task::ZeroShotImageClassification,
    Task::ObjectDetection,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Task::ImageClassification => "image-classification",
      Task::ZeroShotImageClassification => "zero-shot-image-classification",
      Task::ObjectDetection => "object-detection",
    }
  }

  pub fn is_detection(&self) -> bool {
    matches!(self, Task::ObjectDetection)
  }
}

impl fmt::Display for Task {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

impl std::str::FromStr for Task {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "image-classification" => Ok(Task::ImageClassification),
      "zero-shot-image-classification" => Ok(Task::ZeroShotImageClassification),
      "object-detection" => Ok(Task::ObjectDetection),
      other => Err(format!("未知任务类型: {}", other)),
    }
  }
}

/// 一个可加载的模型定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
  pub id: String,
  pub task: Task,
  /// 模型权重位置，例如远程仓库路径
  pub model_ref: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub default_labels: Vec<String>,
  #[serde(default)]
  pub is_user_defined: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub display_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

impl ModelDefinition {
  pub fn new(id: impl Into<String>, task: Task, model_ref: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      task,
      model_ref: model_ref.into(),
      default_labels: Vec::new(),
      is_user_defined: false,
      display_name: None,
      description: None,
    }
  }

  pub fn with_default_labels<I, S>(mut self, labels: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.default_labels = labels.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
    self.display_name = Some(name.into());
    self
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  pub fn user_defined(mut self) -> Self {
    self.is_user_defined = true;
    self
  }

  pub fn name(&self) -> &str {
    self.display_name.as_deref().unwrap_or(&self.id)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
  Reduced,
  Full,
}

/// 模型实例化时使用的执行配置，由能力探测结果推导
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceConfig {
  pub accelerated: bool,
  pub precision: Precision,
}

impl DeviceConfig {
  pub fn cpu() -> Self {
    Self {
      accelerated: false,
      precision: Precision::Full,
    }
  }

  pub fn gpu(reduced_precision: bool) -> Self {
    Self {
      accelerated: true,
      precision: if reduced_precision {
        Precision::Reduced
      } else {
        Precision::Full
      },
    }
  }

  pub fn backend_label(&self) -> &'static str {
    if self.accelerated { "GPU" } else { "CPU" }
  }
}

impl fmt::Display for DeviceConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let precision = match self.precision {
      Precision::Reduced => "fp16",
      Precision::Full => "fp32",
    };
    write!(f, "{}/{}", self.backend_label(), precision)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
  pub label: String,
  pub score: f32,
}

/// 源帧像素坐标下的边界框
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub xmin: f32,
  pub ymin: f32,
  pub xmax: f32,
  pub ymax: f32,
}

impl BoundingBox {
  pub fn width(&self) -> f32 {
    (self.xmax - self.xmin).max(0.0)
  }

  pub fn height(&self) -> f32 {
    (self.ymax - self.ymin).max(0.0)
  }

  pub fn scaled(&self, sx: f32, sy: f32) -> Self {
    Self {
      xmin: self.xmin * sx,
      ymin: self.ymin * sy,
      xmax: self.xmax * sx,
      ymax: self.ymax * sy,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub label: String,
  pub score: f32,
  #[serde(rename = "box")]
  pub bbox: BoundingBox,
}

/// 归一化后的推理结果。空序列是合法结果，而不是错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum RawResult {
  Ranked(Vec<LabelScore>),
  Detections(Vec<Detection>),
}

impl RawResult {
  pub fn len(&self) -> usize {
    match self {
      RawResult::Ranked(items) => items.len(),
      RawResult::Detections(items) => items.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn task_names_round_trip_through_serde() {
    let json = serde_json::to_string(&Task::ZeroShotImageClassification).unwrap();
    assert_eq!(json, "\"zero-shot-image-classification\"");
    let task: Task = "object-detection".parse().unwrap();
    assert_eq!(task, Task::ObjectDetection);
    assert!("segmentation".parse::<Task>().is_err());
  }

  #[test]
  fn reduced_precision_only_on_gpu() {
    assert_eq!(DeviceConfig::cpu().precision, Precision::Full);
    assert_eq!(DeviceConfig::gpu(true).precision, Precision::Reduced);
    assert_eq!(DeviceConfig::gpu(false).to_string(), "GPU/fp32");
  }

  #[test]
  fn definition_deserializes_without_optional_fields() {
    let def: ModelDefinition = serde_json::from_str(
      r#"{"id":"yolos","task":"object-detection","model_ref":"Xenova/yolos-tiny"}"#,
    )
    .unwrap();
    assert_eq!(def.task, Task::ObjectDetection);
    assert!(def.default_labels.is_empty());
    assert!(!def.is_user_defined);
    assert_eq!(def.name(), "yolos");
  }
}
