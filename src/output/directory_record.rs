// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/output/directory_record.rs - 按日期目录记录推理结果
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

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};

use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  output::{Presentation, Render, draw::Draw},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerdeError(#[from] serde_json::Error),
}

/// 每次推理保存一张标注后的图片和一份 JSON 结果，路径为
/// `<目录>/<年>/<月>/<日>/<时-分-秒>-<序号>.{png,json}`。
///
/// * `folder:///records` 只记录有结果的推理
/// * `folder:///records?always` 也记录没有结果的推理
/// * `folder:///records?raw` 保存未标注的原始画面
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Option<Draw>,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let raw = uri.query_pairs().any(|(k, _)| k == "raw");
    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let draw = match uri.query_pairs().find(|(k, _)| k == "font") {
      _ if raw => None,
      Some((_, font)) => Some(Draw::with_font_file(font.as_ref())?),
      None => Some(Draw::default()),
    };

    Ok(DirectoryRecordOutput::new(uri.path(), draw, always))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, draw: Option<Draw>, always: bool) -> Self {
    Self {
      directory: directory.into(),
      draw,
      frame_counter: AtomicU16::new(0),
      always,
    }
  }

  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self, now: DateTime<Utc>) -> Result<PathBuf, std::io::Error> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn save(&self, path: &Path, frame: &Frame, presentation: &Presentation) -> Result<(), DirectoryRecordOutputError> {
    let mut image = frame.image().clone();
    if let Some(draw) = &self.draw {
      draw.draw_presentation(&mut image, presentation);
    }
    image.save(path)?;
    std::fs::write(path.with_extension("json"), serde_json::to_vec_pretty(presentation)?)?;
    debug!("已记录结果: {}", path.display());
    Ok(())
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, presentation: &Presentation) -> Result<(), Self::Error> {
    if !self.always && presentation.is_empty() {
      return Ok(());
    }
    let path = self.frame_path(frame.captured_at())?;
    self.save(&path, frame, presentation)
  }
}
