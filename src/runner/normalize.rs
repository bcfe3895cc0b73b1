// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/runner/normalize.rs - 推理结果归一化
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

use std::cmp::Ordering;

use serde_json::{Map, Value};
use tracing::debug;

use crate::model::{BoundingBox, Detection, LabelScore, RawResult, Task};

/// 运行时输出的三种已知形状
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape<'a> {
  /// `[{label, score, box?}, ...]`
  Flat(&'a [Value]),
  /// `[[{label, score, box?}, ...]]`，真正的序列在 `result[0]`
  Nested(&'a [Value]),
  /// `{label: score, ...}`
  LabelKeyed(&'a Map<String, Value>),
}

pub fn detect_shape(value: &Value) -> Option<Shape<'_>> {
  match value {
    Value::Array(items) => match items.first() {
      Some(Value::Array(inner)) => Some(Shape::Nested(inner)),
      None | Some(Value::Object(_)) => Some(Shape::Flat(items)),
      Some(_) => None,
    },
    Value::Object(map) if map.values().all(Value::is_number) => Some(Shape::LabelKeyed(map)),
    _ => None,
  }
}

/// 将运行时返回值转换为 [`RawResult`]。分类结果按分数降序排列（同分按标签），
/// 检测结果保持运行时给出的顺序
pub fn normalize(task: Task, value: &Value) -> Result<RawResult, String> {
  let shape = detect_shape(value).ok_or_else(|| format!("{} 的输出不是已知形状: {}", task, brief(value)))?;

  let entries = match shape {
    Shape::Flat(items) => {
      debug!("{} 输出为平铺列表, {} 项", task, items.len());
      items
    }
    Shape::Nested(items) => {
      debug!("{} 输出为嵌套列表, {} 项", task, items.len());
      items
    }
    Shape::LabelKeyed(map) => return label_keyed(task, map),
  };

  if task.is_detection() {
    entries
      .iter()
      .map(detection_entry)
      .collect::<Result<Vec<_>, _>>()
      .map(RawResult::Detections)
  } else {
    let mut ranked = entries.iter().map(ranked_entry).collect::<Result<Vec<_>, _>>()?;
    sort_ranked(&mut ranked);
    Ok(RawResult::Ranked(ranked))
  }
}

fn label_keyed(task: Task, map: &Map<String, Value>) -> Result<RawResult, String> {
  if task.is_detection() && !map.is_empty() {
    return Err("检测结果不能是标签到分数的映射, 缺少边界框".to_string());
  }
  if task.is_detection() {
    return Ok(RawResult::Detections(Vec::new()));
  }

  let mut ranked = map
    .iter()
    .map(|(label, score)| {
      Ok(LabelScore {
        label: label.clone(),
        score: finite_score(score)?,
      })
    })
    .collect::<Result<Vec<_>, String>>()?;
  sort_ranked(&mut ranked);
  Ok(RawResult::Ranked(ranked))
}

fn sort_ranked(ranked: &mut [LabelScore]) {
  ranked.sort_by(|a, b| {
    b.score
      .partial_cmp(&a.score)
      .unwrap_or(Ordering::Equal)
      .then_with(|| a.label.cmp(&b.label))
  });
}

fn ranked_entry(entry: &Value) -> Result<LabelScore, String> {
  let obj = entry
    .as_object()
    .ok_or_else(|| format!("条目不是对象: {}", brief(entry)))?;
  Ok(LabelScore {
    label: label_of(obj)?,
    score: finite_score(obj.get("score").unwrap_or(&Value::Null))?,
  })
}

fn detection_entry(entry: &Value) -> Result<Detection, String> {
  let obj = entry
    .as_object()
    .ok_or_else(|| format!("条目不是对象: {}", brief(entry)))?;
  let bbox = obj
    .get("box")
    .and_then(Value::as_object)
    .ok_or_else(|| format!("检测条目缺少 box: {}", brief(entry)))?;

  let coord = |key: &str| -> Result<f32, String> {
    bbox
      .get(key)
      .and_then(Value::as_f64)
      .filter(|v| v.is_finite())
      .map(|v| v as f32)
      .ok_or_else(|| format!("box 缺少坐标 {}", key))
  };

  Ok(Detection {
    label: label_of(obj)?,
    score: finite_score(obj.get("score").unwrap_or(&Value::Null))?,
    bbox: BoundingBox {
      xmin: coord("xmin")?,
      ymin: coord("ymin")?,
      xmax: coord("xmax")?,
      ymax: coord("ymax")?,
    },
  })
}

fn label_of(obj: &Map<String, Value>) -> Result<String, String> {
  obj
    .get("label")
    .and_then(Value::as_str)
    .map(str::to_string)
    .ok_or_else(|| "条目缺少字符串类型的 label".to_string())
}

fn finite_score(value: &Value) -> Result<f32, String> {
  value
    .as_f64()
    .filter(|v| v.is_finite())
    .map(|v| v as f32)
    .ok_or_else(|| format!("score 不是有效数字: {}", value))
}

fn brief(value: &Value) -> String {
  let text = value.to_string();
  if text.chars().count() > 80 {
    format!("{}...", text.chars().take(80).collect::<String>())
  } else {
    text
  }
}
