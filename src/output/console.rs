// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/output/console.rs - 控制台输出
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

use std::io::Write;

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  output::{Presentation, Render},
};

#[derive(Error, Debug)]
pub enum ConsoleOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 以表格形式把结果打印到标准输出，`console://?json` 时输出 JSON 行
pub struct ConsoleOutput {
  json: bool,
}

impl FromUrlWithScheme for ConsoleOutput {
  const SCHEME: &'static str = "console";
}

impl FromUrl for ConsoleOutput {
  type Error = ConsoleOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConsoleOutputError::SchemeMismatch(format!(
        "期望输出方式 '{}', 实际输出方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Ok(ConsoleOutput {
      json: url.query_pairs().any(|(k, _)| k == "json"),
    })
  }
}

impl ConsoleOutput {
  pub fn table(frame: &Frame, presentation: &Presentation) -> String {
    let summary = presentation.summary();
    let mut lines = vec![format!(
      "[{}] 帧 {} ({}x{}) {}",
      summary.task,
      frame.index(),
      frame.width(),
      frame.height(),
      presentation.badge()
    )];

    match presentation {
      Presentation::NoResults { .. } => lines.push("  未发现结果".to_string()),
      Presentation::Ranked { rows, .. } => {
        for row in rows {
          lines.push(format!("  {:<32} {:>6}", row.label, row.score_text));
        }
      }
      Presentation::Detections { overlays, .. } => {
        for overlay in overlays {
          let b = &overlay.bbox;
          lines.push(format!(
            "  {:<20} {:>4.0}%  [{:.1}, {:.1}, {:.1}, {:.1}] {}",
            overlay.label,
            overlay.score * 100.0,
            b.xmin,
            b.ymin,
            b.xmax,
            b.ymax,
            overlay.color
          ));
        }
      }
    }
    lines.join("\n")
  }
}

impl Render for ConsoleOutput {
  type Error = ConsoleOutputError;

  fn render_result(&self, frame: &Frame, presentation: &Presentation) -> Result<(), Self::Error> {
    let text = if self.json {
      serde_json::to_string(presentation).map_err(std::io::Error::other)?
    } else {
      Self::table(frame, presentation)
    };
    info!("输出结果: {}", presentation.badge());

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", text)?;
    stdout.flush()?;
    Ok(())
  }
}
