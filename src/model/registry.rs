// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/model/registry.rs - 模型注册表
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

use thiserror::Error;

use crate::model::{ModelDefinition, Task};

const CLIP_DEFAULT_PROMPTS: [&str; 9] = [
  "a photo of a person",
  "a photo of an animal",
  "a photo of a car",
  "a photo of food",
  "a photo of a building",
  "a photo of nature",
  "a photo of technology",
  "a photo of furniture",
  "a photo of clothing",
];

/// 内置模型
pub fn builtin_models() -> Vec<ModelDefinition> {
  vec![
    ModelDefinition::new("vit", Task::ImageClassification, "Xenova/vit-base-patch16-224")
      .with_display_name("Vision Transformer (ViT)")
      .with_description("google/vit-base-patch16-224"),
    ModelDefinition::new(
      "clip",
      Task::ZeroShotImageClassification,
      "Xenova/clip-vit-base-patch32",
    )
    .with_default_labels(CLIP_DEFAULT_PROMPTS)
    .with_display_name("CLIP (Contrastive Language-Image)")
    .with_description("openai/clip-vit-base-patch32"),
    ModelDefinition::new("detr", Task::ObjectDetection, "Xenova/detr-resnet-50")
      .with_display_name("DETR (Detection Transformer)")
      .with_description("facebook/detr-resnet-50"),
  ]
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
  #[error("模型 ID 无效: '{0}'")]
  InvalidId(String),
  #[error("模型 {0} 缺少模型路径")]
  MissingModelRef(String),
  #[error("模型 {0} 的任务类型为 {1}，不接受默认标签")]
  UnexpectedLabels(String, Task),
  #[error("自定义模型 {0} 已存在")]
  Duplicate(String),
  #[error("未找到模型: {0}")]
  NotFound(String),
}

/// 合并后的注册表，保持内置模型在前、自定义模型在后的顺序
#[derive(Debug, Clone, Default)]
pub struct CombinedRegistry {
  entries: Vec<ModelDefinition>,
}

impl CombinedRegistry {
  pub fn get(&self, id: &str) -> Option<&ModelDefinition> {
    self.entries.iter().find(|def| def.id == id)
  }

  pub fn iter(&self) -> impl Iterator<Item = &ModelDefinition> {
    self.entries.iter()
  }

  pub fn ids(&self) -> Vec<&str> {
    self.entries.iter().map(|def| def.id.as_str()).collect()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// 合并内置与自定义模型。ID 冲突时自定义模型覆盖内置模型，并占据其原位置
pub fn resolve(base: &[ModelDefinition], user: &[ModelDefinition]) -> CombinedRegistry {
  let mut entries: Vec<ModelDefinition> = base.to_vec();

  for def in user {
    let mut def = def.clone();
    def.is_user_defined = true;
    match entries.iter_mut().find(|existing| existing.id == def.id) {
      Some(slot) => *slot = def,
      None => entries.push(def),
    }
  }

  CombinedRegistry { entries }
}

/// 添加自定义模型前的检查
pub fn validate(def: &ModelDefinition, user: &[ModelDefinition]) -> Result<(), RegistryError> {
  let id_ok = !def.id.is_empty()
    && def
      .id
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
  if !id_ok {
    return Err(RegistryError::InvalidId(def.id.clone()));
  }

  if def.model_ref.trim().is_empty() {
    return Err(RegistryError::MissingModelRef(def.id.clone()));
  }

  if !def.default_labels.is_empty() && def.task != Task::ZeroShotImageClassification {
    return Err(RegistryError::UnexpectedLabels(def.id.clone(), def.task));
  }

  if user.iter().any(|existing| existing.id == def.id) {
    return Err(RegistryError::Duplicate(def.id.clone()));
  }

  Ok(())
}
