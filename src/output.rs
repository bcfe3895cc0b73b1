// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/output.rs - 结果展示与输出
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

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{BoundingBox, DeviceConfig, RawResult, Task},
  runner::RunOutcome,
};

pub trait Render {
  type Error;
  fn render_result(&self, frame: &Frame, presentation: &Presentation) -> Result<(), Self::Error>;
}

mod console;
pub use self::console::{ConsoleOutput, ConsoleOutputError};

#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

pub const DEFAULT_MAX_RESULTS: usize = 5;

/// 检测框配色，按检测序号循环使用
pub const DETECTION_PALETTE: [&str; 8] = [
  "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#FF8E53", "#7FCDCD",
];

const DETECTION_PALETTE_RGB: [[u8; 3]; 8] = [
  [0xFF, 0x6B, 0x6B],
  [0x4E, 0xCD, 0xC4],
  [0x45, 0xB7, 0xD1],
  [0x96, 0xCE, 0xB4],
  [0xFF, 0xEA, 0xA7],
  [0xDD, 0xA0, 0xDD],
  [0xFF, 0x8E, 0x53],
  [0x7F, 0xCD, 0xCD],
];

pub fn palette_rgb(index: usize) -> [u8; 3] {
  DETECTION_PALETTE_RGB[index % DETECTION_PALETTE_RGB.len()]
}

/// 显示区域尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Surface {
  pub width: u32,
  pub height: u32,
}

impl Surface {
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  /// 从 `source` 映射到当前区域的缩放系数
  pub fn scale_from(&self, source: Surface) -> (f32, f32) {
    let ratio = |to: u32, from: u32| if from == 0 { 1.0 } else { to as f32 / from as f32 };
    (ratio(self.width, source.width), ratio(self.height, source.height))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
  pub task: Task,
  pub backend: &'static str,
  pub elapsed_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRow {
  pub label: String,
  pub score: f32,
  pub score_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionOverlay {
  pub label: String,
  pub score: f32,
  #[serde(rename = "box")]
  pub bbox: BoundingBox,
  pub color: &'static str,
  #[serde(skip)]
  pub rgb: [u8; 3],
}

impl DetectionOverlay {
  pub fn caption(&self) -> String {
    format!("{} {:.0}%", self.label, self.score * 100.0)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Presentation {
  /// 推理成功但没有任何结果，不是错误
  NoResults { summary: Summary },
  Ranked { summary: Summary, rows: Vec<RankedRow> },
  Detections {
    summary: Summary,
    surface: Surface,
    overlays: Vec<DetectionOverlay>,
  },
}

impl Presentation {
  pub fn summary(&self) -> &Summary {
    match self {
      Presentation::NoResults { summary }
      | Presentation::Ranked { summary, .. }
      | Presentation::Detections { summary, .. } => summary,
    }
  }

  pub fn is_empty(&self) -> bool {
    matches!(self, Presentation::NoResults { .. })
  }

  /// 徽标文本，如 `GPU · 0.42s`
  pub fn badge(&self) -> String {
    let summary = self.summary();
    format!("{} · {}", summary.backend, summary.elapsed_text)
  }
}

pub struct Presenter {
  max_results: usize,
}

impl Default for Presenter {
  fn default() -> Self {
    Self {
      max_results: DEFAULT_MAX_RESULTS,
    }
  }
}

impl Presenter {
  pub fn with_max_results(mut self, max_results: usize) -> Self {
    self.max_results = max_results;
    self
  }

  pub fn max_results(&self) -> usize {
    self.max_results
  }

  /// `frame` 为推理所用画面的尺寸，检测框从该尺寸缩放到 `display`
  pub fn present(
    &self,
    result: &RawResult,
    task: Task,
    elapsed_seconds: f64,
    device: &DeviceConfig,
    frame: Surface,
    display: Surface,
  ) -> Presentation {
    let summary = Summary {
      task,
      backend: device.backend_label(),
      elapsed_text: format!("{:.2}s", elapsed_seconds),
    };

    if result.is_empty() {
      return Presentation::NoResults { summary };
    }

    match result {
      RawResult::Ranked(items) => {
        let mut items = items.clone();
        items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        let rows = items
          .into_iter()
          .take(self.max_results)
          .map(|item| RankedRow {
            score_text: format!("{:.1}%", item.score * 100.0),
            label: item.label,
            score: item.score,
          })
          .collect();
        Presentation::Ranked { summary, rows }
      }
      RawResult::Detections(items) => {
        let (sx, sy) = display.scale_from(frame);
        let overlays = items
          .iter()
          .enumerate()
          .map(|(index, detection)| DetectionOverlay {
            label: detection.label.clone(),
            score: detection.score,
            bbox: detection.bbox.scaled(sx, sy),
            color: DETECTION_PALETTE[index % DETECTION_PALETTE.len()],
            rgb: palette_rgb(index),
          })
          .collect();
        Presentation::Detections {
          summary,
          surface: display,
          overlays,
        }
      }
    }
  }

  /// 按推理画面原尺寸或指定的显示尺寸展示一次推理结果
  pub fn present_outcome(&self, outcome: &RunOutcome, display: Option<Surface>) -> Presentation {
    let (width, height) = outcome.frame.dimensions();
    let frame = Surface::new(width, height);
    self.present(
      &outcome.result,
      outcome.task,
      outcome.elapsed_seconds(),
      &outcome.device,
      frame,
      display.unwrap_or(frame),
    )
  }
}

/// 保存最近一次成功的展示结果。出错时只记录错误，不清除之前的结果
#[derive(Debug, Default, Clone)]
pub struct ResultPanel {
  presentation: Option<Presentation>,
  error: Option<String>,
}

impl ResultPanel {
  pub fn show(&mut self, presentation: Presentation) {
    self.presentation = Some(presentation);
    self.error = None;
  }

  pub fn show_error(&mut self, message: impl Into<String>) {
    self.error = Some(message.into());
  }

  pub fn presentation(&self) -> Option<&Presentation> {
    self.presentation.as_ref()
  }

  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  pub fn clear(&mut self) {
    self.presentation = None;
    self.error = None;
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("控制台输出错误: {0}")]
  ConsoleOutputError(#[from] ConsoleOutputError),
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  Console(ConsoleOutput),
  #[cfg(feature = "save_image_file")]
  SaveImageFile(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecord(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ConsoleOutput::SCHEME => Ok(OutputWrapper::Console(ConsoleOutput::from_url(url)?)),
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => Ok(OutputWrapper::SaveImageFile(SaveImageFileOutput::from_url(url)?)),
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => Ok(OutputWrapper::DirectoryRecord(DirectoryRecordOutput::from_url(url)?)),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, presentation: &Presentation) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Console(output) => output
        .render_result(frame, presentation)
        .map_err(OutputError::from),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFile(output) => output
        .render_result(frame, presentation)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => output
        .render_result(frame, presentation)
        .map_err(OutputError::from),
    }
  }
}
