// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/runner.rs - 推理执行器
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

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  frame::{Frame, FrameSource},
  model::{DeviceConfig, RawResult, Task},
  pipeline::PipelineHandle,
  runtime::InvokeArgs,
};

pub mod normalize;

pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
  #[error("参数无效: {0}")]
  InvalidOptions(String),
  #[error("无法识别的结果形状: {0}")]
  UnrecognizedResultShape(String),
  #[error("模型 {model_id} ({task}) 推理失败: {reason}")]
  Inference {
    task: Task,
    model_id: String,
    reason: String,
  },
}

/// 调用方提供的任务参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOptions {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub labels: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub threshold: Option<f32>,
}

impl TaskOptions {
  pub fn with_labels<I, S>(mut self, labels: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.labels = Some(labels.into_iter().map(Into::into).collect());
    self
  }

  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.threshold = Some(threshold);
    self
  }
}

/// 根据任务类型构造调用参数
pub fn build_args(task: Task, options: &TaskOptions, default_threshold: f32) -> Result<InvokeArgs, RunError> {
  match task {
    Task::ZeroShotImageClassification => {
      let labels: Vec<String> = options
        .labels
        .iter()
        .flatten()
        .map(|label| label.trim())
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .collect();
      if labels.is_empty() {
        return Err(RunError::InvalidOptions(
          "零样本分类需要至少一个候选标签".to_string(),
        ));
      }
      Ok(InvokeArgs::CandidateLabels(labels))
    }
    Task::ObjectDetection => {
      let threshold = options.threshold.unwrap_or(default_threshold);
      if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(RunError::InvalidOptions(format!(
          "检测阈值必须在 (0, 1] 之间, 实际为 {}",
          threshold
        )));
      }
      Ok(InvokeArgs::Threshold(threshold))
    }
    Task::ImageClassification => Ok(InvokeArgs::None),
  }
}

/// 一次推理的结果
#[derive(Debug, Clone)]
pub struct RunOutcome {
  pub model_id: String,
  pub task: Task,
  pub device: DeviceConfig,
  pub result: RawResult,
  pub elapsed: Duration,
  pub frame: Frame,
}

impl RunOutcome {
  /// 以毫秒精度计时，换算为保留两位小数的秒数
  pub fn elapsed_seconds(&self) -> f64 {
    round_seconds(self.elapsed)
  }
}

pub fn round_seconds(elapsed: Duration) -> f64 {
  (elapsed.as_millis() as f64 / 10.0).round() / 100.0
}

pub struct InferenceRunner {
  default_threshold: f32,
}

impl Default for InferenceRunner {
  fn default() -> Self {
    Self {
      default_threshold: DEFAULT_DETECTION_THRESHOLD,
    }
  }
}

impl InferenceRunner {
  pub fn with_default_threshold(mut self, threshold: f32) -> Self {
    self.default_threshold = threshold;
    self
  }

  pub fn default_threshold(&self) -> f32 {
    self.default_threshold
  }

  /// 截取当前画面并执行一次推理。推理失败不会在此处重试
  pub async fn run<S: FrameSource + ?Sized>(
    &self,
    handle: &PipelineHandle,
    source: &S,
    options: &TaskOptions,
  ) -> Result<RunOutcome, RunError> {
    let task = handle.task();
    let inference_error = |reason: String| RunError::Inference {
      task,
      model_id: handle.model_id().to_string(),
      reason,
    };

    let args = build_args(task, options, self.default_threshold)?;

    let frame = source
      .snapshot()
      .await
      .map_err(|e| inference_error(format!("无法截取画面: {}", e)))?;
    debug!("截取画面 {}x{} (帧 {})", frame.width(), frame.height(), frame.index());

    info!("执行 {} ({}), 设备 {}", handle.model_id(), task, handle.device());
    let now = Instant::now();
    let output = handle.invoke(&frame, &args).await;
    let elapsed = now.elapsed();

    let output = output.map_err(|e| {
      error!("模型 {} 推理失败: {}", handle.model_id(), e);
      inference_error(e.to_string())
    })?;

    let result = normalize::normalize(task, &output).map_err(RunError::UnrecognizedResultShape)?;
    info!(
      "{} 完成, 耗时 {:.2}s, {} 个结果",
      handle.model_id(),
      round_seconds(elapsed),
      result.len()
    );

    Ok(RunOutcome {
      model_id: handle.model_id().to_string(),
      task,
      device: handle.device(),
      result,
      elapsed,
      frame,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_shot_requires_labels() {
    let err = build_args(Task::ZeroShotImageClassification, &TaskOptions::default(), 0.5).unwrap_err();
    assert!(matches!(err, RunError::InvalidOptions(_)));

    let blank = TaskOptions::default().with_labels(["  ", ""]);
    assert!(build_args(Task::ZeroShotImageClassification, &blank, 0.5).is_err());

    let ok = TaskOptions::default().with_labels(["a cat", " a dog "]);
    assert_eq!(
      build_args(Task::ZeroShotImageClassification, &ok, 0.5).unwrap(),
      InvokeArgs::CandidateLabels(vec!["a cat".to_string(), "a dog".to_string()])
    );
  }

  #[test]
  fn detection_threshold_bounds() {
    assert_eq!(
      build_args(Task::ObjectDetection, &TaskOptions::default(), 0.5).unwrap(),
      InvokeArgs::Threshold(0.5)
    );
    let one = TaskOptions::default().with_threshold(1.0);
    assert_eq!(build_args(Task::ObjectDetection, &one, 0.5).unwrap(), InvokeArgs::Threshold(1.0));

    for bad in [0.0, 1.5, -0.1, f32::NAN] {
      let options = TaskOptions::default().with_threshold(bad);
      assert!(matches!(
        build_args(Task::ObjectDetection, &options, 0.5),
        Err(RunError::InvalidOptions(_))
      ));
    }
  }

  #[test]
  fn classification_takes_no_arguments() {
    let options = TaskOptions::default().with_labels(["ignored"]).with_threshold(9.0);
    assert_eq!(build_args(Task::ImageClassification, &options, 0.5).unwrap(), InvokeArgs::None);
  }

  #[test]
  fn elapsed_is_rounded_to_hundredths() {
    assert_eq!(round_seconds(Duration::from_millis(1234)), 1.23);
    assert_eq!(round_seconds(Duration::from_millis(1235)), 1.24);
    assert_eq!(round_seconds(Duration::from_micros(4_999)), 0.0);
  }
}
