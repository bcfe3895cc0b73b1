// 该文件是 Jinghu （镜湖） 项目的一部分。
// src/output/draw.rs - 推理结果可视化
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::debug;

use crate::output::{DetectionOverlay, Presentation, RankedRow};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 3;

const PANEL_ROW_HEIGHT: i32 = 26;
const PANEL_WIDTH: u32 = 260;
const PANEL_MARGIN: i32 = 8;
const PANEL_BACKGROUND: [u8; 3] = [10, 10, 10];
const PANEL_BAR: [u8; 3] = [14, 165, 233];

const DEFAULT_FONT: &[u8] = include_bytes!("../../assets/font.ttf"); // DejaVu Sans

pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  // 字体无法解析时只绘制边框与色块
  font: Option<FontVec>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font: FontVec::try_from_vec(DEFAULT_FONT.to_vec()).ok(),
    }
  }
}

impl Draw {
  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontVec::try_from_vec(data)
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    debug!("已加载字体: {}", path.as_ref().display());
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn draw_presentation(&self, image: &mut RgbImage, presentation: &Presentation) {
    match presentation {
      Presentation::Detections { overlays, .. } => {
        for overlay in overlays {
          self.draw_bbox_with_label(image, overlay);
        }
      }
      Presentation::Ranked { rows, .. } => self.draw_ranked_panel(image, rows),
      Presentation::NoResults { .. } => {}
    }
    self.draw_badge(image, &presentation.badge());
  }

  fn draw_label(&self, image: &mut RgbImage, x: i32, y: i32, text: &str, background: [u8; 3]) {
    let w = image.width() as i32;
    let text_width = (text.chars().count() as f32 * self.label_char_width) as i32;
    let label_width = text_width.min((w - x).max(0)) as u32;
    let label_height = self.label_text_height as u32;
    if label_width == 0 {
      return;
    }

    let rect = Rect::at(x, y).of_size(label_width, label_height);
    draw_filled_rect_mut(image, rect, Rgb(background));

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        x,
        y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        text,
      );
    }
  }

  // bbox 已缩放到图像像素坐标
  fn draw_bbox_with_label(&self, image: &mut RgbImage, overlay: &DetectionOverlay) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let bbox = &overlay.bbox;

    let x_min = (bbox.xmin.floor() as i32).clamp(0, w - 1);
    let y_min = (bbox.ymin.floor() as i32).clamp(0, h - 1);
    let x_max = (bbox.xmax.ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox.ymax.ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    for thickness in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * thickness;
      let height = y_max - y_min - 2 * thickness;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, Rgb(overlay.rgb));
    }

    // 标签放在边框上方
    let label_y = (y_min - self.label_text_height).max(0);
    self.draw_label(image, x_min, label_y, &overlay.caption(), overlay.rgb);
  }

  fn draw_ranked_panel(&self, image: &mut RgbImage, rows: &[RankedRow]) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    for (index, row) in rows.iter().enumerate() {
      let y = PANEL_MARGIN + index as i32 * PANEL_ROW_HEIGHT;
      if y + PANEL_ROW_HEIGHT > h {
        break;
      }
      let width = (PANEL_WIDTH as i32).min(w - PANEL_MARGIN).max(0) as u32;
      if width == 0 {
        return;
      }
      let background = Rect::at(PANEL_MARGIN, y).of_size(width, (PANEL_ROW_HEIGHT - 2) as u32);
      draw_filled_rect_mut(image, background, Rgb(PANEL_BACKGROUND));

      let bar = (width as f32 * row.score.clamp(0.0, 1.0)) as u32;
      if bar > 0 {
        let rect = Rect::at(PANEL_MARGIN, y).of_size(bar, (PANEL_ROW_HEIGHT - 2) as u32);
        draw_filled_rect_mut(image, rect, Rgb(PANEL_BAR));
      }

      if let Some(font) = &self.font {
        draw_text_mut(
          image,
          Rgb([255u8, 255u8, 255u8]),
          PANEL_MARGIN + 4,
          y + self.label_text_vertical_padding,
          PxScale::from(self.font_size),
          font,
          &format!("{} {}", row.label, row.score_text),
        );
      }
    }
  }

  fn draw_badge(&self, image: &mut RgbImage, badge: &str) {
    if self.font.is_none() {
      return;
    }
    let text_width = (badge.chars().count() as f32 * self.label_char_width) as i32;
    let x = (image.width() as i32 - text_width - PANEL_MARGIN).max(0);
    let y = (image.height() as i32 - self.label_text_height - PANEL_MARGIN).max(0);
    self.draw_label(image, x, y, badge, PANEL_BACKGROUND);
  }
}
