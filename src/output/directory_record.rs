// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{DateTime, Datelike, Utc};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{SegmentationResult, SsdDetections},
  output::{
    Render,
    draw::{DEFAULT_SCORE_THRESHOLD, DetectionRecord, Draw, SegmentationRecord},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct FrameRecord<T> {
  timestamp: DateTime<Utc>,
  frame_id: u16,
  result: T,
}

/// 按日期分目录保存每一帧
///
/// `folder:///dir?record&always&threshold=0.5`：`record` 保存原图与 JSON 记录，否则保存绘制后的图像；
/// 没有 `always` 时只保存有可见结果的帧。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  record: bool,
  always: bool,
  frame_counter: AtomicU16,
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

    let threshold = crate::query_param(uri, "threshold").unwrap_or(DEFAULT_SCORE_THRESHOLD);
    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      draw: Draw::new(threshold),
      record: crate::query_flag(uri, "record"),
      always: crate::query_flag(uri, "always"),
      frame_counter: AtomicU16::new(0),
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self, now: &DateTime<Utc>, frame_id: u16) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!("{}-{:04X}.png", now.format("%H-%M-%S"), frame_id)))
  }

  fn save<T: Serialize>(
    &self,
    image: &RgbImage,
    result: T,
  ) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let frame_id = self.frame_id();
    let path = self.frame_path(&now, frame_id)?;
    image.save(&path)?;

    if self.record {
      let record = FrameRecord {
        timestamp: now,
        frame_id,
        result,
      };
      write_record(&path, &record)?;
    }
    debug!("保存帧到 {}", path.display());
    Ok(path)
  }
}

fn write_record<T: Serialize>(image_path: &Path, record: &T) -> Result<(), DirectoryRecordOutputError> {
  let json = serde_json::to_string_pretty(record)?;
  std::fs::write(image_path.with_extension("json"), json)?;
  Ok(())
}

impl Render<RgbImage, SsdDetections> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &SsdDetections) -> Result<(), Self::Error> {
    let records: Vec<DetectionRecord> = self.draw.visible(result).map(DetectionRecord::from).collect();
    if !self.always && records.is_empty() {
      return Ok(());
    }

    if self.record {
      self.save(frame, records)?;
    } else {
      let mut image = frame.clone();
      self.draw.draw_detections(&mut image, result);
      self.save(&image, records)?;
    }
    Ok(())
  }
}

impl Render<RgbImage, SegmentationResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    frame: &RgbImage,
    result: &SegmentationResult,
  ) -> Result<(), Self::Error> {
    let record = SegmentationRecord::from(result);
    if !self.always && record.coverage <= 0.0 {
      return Ok(());
    }

    if self.record {
      let path = self.save(frame, record)?;
      result.mask_image().save(path.with_extension("mask.png"))?;
    } else {
      let mut image = frame.clone();
      self.draw.draw_mask(&mut image, result);
      self.save(&image, record)?;
    }
    Ok(())
  }
}
