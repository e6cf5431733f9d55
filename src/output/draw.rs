// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/draw.rs - 结果可视化
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

use image::{GrayImage, Rgb, RgbImage, imageops::FilterType};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect as PixelRect};
use serde::Serialize;

use crate::model::{CocoLabel, Rect, SegmentationResult, SsdDetections, SsdResult, WithLabel};

pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
const PALETTE_SIZE: usize = 90;
const BOX_THICKNESS: i32 = 2;
// 背景保留的亮度比例
const BACKGROUND_LEVEL: f32 = 0.25;

pub struct Draw {
  score_threshold: f32,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    Draw::new(DEFAULT_SCORE_THRESHOLD)
  }
}

impl Draw {
  pub fn new(score_threshold: f32) -> Self {
    let colors = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Draw {
      score_threshold,
      colors,
    }
  }

  pub fn score_threshold(&self) -> f32 {
    self.score_threshold
  }

  pub fn visible<'a>(&self, detections: &'a SsdDetections) -> impl Iterator<Item = &'a SsdResult> {
    let threshold = self.score_threshold;
    detections.iter().filter(move |d| d.score >= threshold)
  }

  pub fn draw_detections(&self, image: &mut RgbImage, detections: &SsdDetections) {
    let (w, h) = image.dimensions();
    for detection in self.visible(detections) {
      let Some(rect) = to_pixel_rect(&detection.rect, w, h) else {
        continue;
      };
      let color = self.colors[detection.class_id.rem_euclid(PALETTE_SIZE as i32) as usize];

      for t in 0..BOX_THICKNESS {
        let width = rect.width().saturating_sub(2 * t as u32);
        let height = rect.height().saturating_sub(2 * t as u32);
        if width == 0 || height == 0 {
          break;
        }
        let inner = PixelRect::at(rect.left() + t, rect.top() + t).of_size(width, height);
        draw_hollow_rect_mut(image, inner, color);
      }
    }
  }

  /// 按掩码压暗背景，掩码缩放到图像尺寸
  pub fn draw_mask(&self, image: &mut RgbImage, result: &SegmentationResult) {
    let mask = mask_to_image_size(&result.mask_image(), image.width(), image.height());
    for (pixel, m) in image.pixels_mut().zip(mask.pixels()) {
      let alpha = BACKGROUND_LEVEL + (1.0 - BACKGROUND_LEVEL) * (m[0] as f32 / 255.0);
      for c in pixel.0.iter_mut() {
        *c = (*c as f32 * alpha).round() as u8;
      }
    }
  }
}

pub fn mask_to_image_size(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
  if mask.dimensions() == (width, height) {
    return mask.clone();
  }
  image::imageops::resize(mask, width, height, FilterType::Triangle)
}

/// 显示坐标（左下角原点、`y` 为上边）的归一化矩形转换为图像像素矩形
pub fn to_pixel_rect(rect: &Rect, width: u32, height: u32) -> Option<PixelRect> {
  let (w, h) = (width as f32, height as f32);
  let x_min = (rect.x * w).floor().clamp(0.0, w - 1.0) as i32;
  // 右边与下边不含在内，可以取到 w 与 h
  let x_max = (rect.x_max() * w).ceil().clamp(0.0, w) as i32;
  let y_min = ((1.0 - rect.y) * h).floor().clamp(0.0, h - 1.0) as i32;
  let y_max = ((1.0 - rect.y_min()) * h).ceil().clamp(0.0, h) as i32;

  if x_min >= x_max || y_min >= y_max {
    return None;
  }
  Some(PixelRect::at(x_min, y_min).of_size((x_max - x_min) as u32, (y_max - y_min) as u32))
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

/// 写入记录文件的检测项
#[derive(Debug, Serialize)]
pub struct DetectionRecord {
  pub class_id: i32,
  pub label: String,
  pub score: f32,
  pub rect: Rect,
}

impl From<&SsdResult> for DetectionRecord {
  fn from(result: &SsdResult) -> Self {
    DetectionRecord {
      class_id: result.class_id,
      label: result.label::<CocoLabel>().to_label_str(),
      score: result.score,
      rect: result.rect,
    }
  }
}

/// 写入记录文件的分割摘要
#[derive(Debug, Serialize)]
pub struct SegmentationRecord {
  pub width: u32,
  pub height: u32,
  /// 标签均值，即前景占比
  pub coverage: f32,
}

impl From<&SegmentationResult> for SegmentationRecord {
  fn from(result: &SegmentationResult) -> Self {
    let sum: f32 = result.labels.iter().map(|v| v.clamp(0.0, 1.0)).sum();
    let coverage = if result.labels.is_empty() {
      0.0
    } else {
      sum / result.labels.len() as f32
    };
    SegmentationRecord {
      width: result.width,
      height: result.height,
      coverage,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::SSD_MAX_DETECTIONS;

  #[test]
  fn display_rect_maps_to_image_rows() {
    // 上边 0.75 即图像中距顶部 25%
    let rect = Rect {
      x: 0.25,
      y: 0.75,
      width: 0.5,
      height: 0.25,
    };
    let pixel = to_pixel_rect(&rect, 100, 100).unwrap();
    assert_eq!(pixel.left(), 25);
    assert_eq!(pixel.top(), 25);
    assert_eq!(pixel.width(), 50);
    assert_eq!(pixel.height(), 25);
  }

  #[test]
  fn full_frame_rect_keeps_last_row_and_column() {
    let rect = Rect {
      x: 0.0,
      y: 1.0,
      width: 1.0,
      height: 1.0,
    };
    let pixel = to_pixel_rect(&rect, 100, 80).unwrap();
    assert_eq!((pixel.left(), pixel.top()), (0, 0));
    assert_eq!((pixel.width(), pixel.height()), (100, 80));
    assert_eq!((pixel.right(), pixel.bottom()), (99, 79));

    let mut image = RgbImage::new(10, 10);
    let mut detections = [SsdResult::default(); SSD_MAX_DETECTIONS];
    detections[0] = SsdResult {
      class_id: 0,
      score: 0.9,
      rect,
    };
    Draw::new(0.5).draw_detections(&mut image, &detections);
    assert_ne!(image.get_pixel(9, 9), &Rgb([0, 0, 0]));
    assert_ne!(image.get_pixel(9, 5), &Rgb([0, 0, 0]));
  }

  #[test]
  fn empty_rect_is_skipped() {
    assert!(to_pixel_rect(&Rect::default(), 100, 100).is_none());
  }

  #[test]
  fn low_scores_are_not_drawn() {
    let mut detections = [SsdResult::default(); SSD_MAX_DETECTIONS];
    detections[3] = SsdResult {
      class_id: 0,
      score: 0.9,
      rect: Rect {
        x: 0.0,
        y: 1.0,
        width: 0.5,
        height: 0.5,
      },
    };
    let draw = Draw::new(0.5);
    assert_eq!(draw.visible(&detections).count(), 1);

    let mut image = RgbImage::new(20, 20);
    draw.draw_detections(&mut image, &detections);
    assert_ne!(image.get_pixel(0, 0), &Rgb([0, 0, 0]));
    assert_eq!(image.get_pixel(15, 15), &Rgb([0, 0, 0]));
  }

  #[test]
  fn record_uses_coco_names() {
    let result = SsdResult {
      class_id: 17,
      score: 0.7,
      rect: Rect::default(),
    };
    let record = DetectionRecord::from(&result);
    assert_eq!(record.label, "dog");
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["class_id"], 17);
  }
}
