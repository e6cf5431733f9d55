// 该文件是 Beifeng （北风） 项目的一部分。
// src/filter.rs - 分割掩码滤波接口
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

use image::{GrayImage, Luma};
use thiserror::Error;
use tracing::debug;

pub const SIGMA_COLOR_MIN: f32 = 0.1;
pub const SIGMA_COLOR_MAX: f32 = 4.0;
pub const SIGMA_COLOR_DEFAULT: f32 = 1.0;
/// 计算着色器的线程组边长
pub const THREAD_GROUP_SIZE: u32 = 8;

#[derive(Error, Debug)]
pub enum FilterError {
  #[error("标签缓冲长度不匹配: 期望 {expected}, 实际 {actual}")]
  LabelLengthMismatch { expected: usize, actual: usize },
  #[error("纹理尺寸无效: {width}x{height}")]
  InvalidDimensions { width: u32, height: u32 },
}

/// 双边滤波参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
  pub width: u32,
  pub height: u32,
  pub sigma_color: f32,
  pub sigma_texel: f32,
  pub step: u32,
  pub radius: u32,
}

impl FilterParams {
  pub fn new(width: u32, height: u32) -> Self {
    FilterParams {
      width,
      height,
      sigma_color: SIGMA_COLOR_DEFAULT,
      sigma_texel: (1.0 / width as f32).max(1.0 / height as f32),
      step: 1,
      radius: 1,
    }
  }

  pub fn sigma_color(mut self, sigma_color: f32) -> Self {
    self.sigma_color = sigma_color.clamp(SIGMA_COLOR_MIN, SIGMA_COLOR_MAX);
    self
  }

  /// 每个阶段的线程组数量
  pub fn dispatch(&self) -> (u32, u32, u32) {
    (
      self.width / THREAD_GROUP_SIZE,
      self.height / THREAD_GROUP_SIZE,
      1,
    )
  }

  pub fn texel_count(&self) -> usize {
    self.width as usize * self.height as usize
  }
}

/// 掩码滤波能力接口
///
/// 调用顺序固定为 `upload_labels` → `label_to_texture` → `bilateral_filter` → `mask`。
pub trait GpuFilter {
  fn set_params(&mut self, params: &FilterParams);
  fn upload_labels(&mut self, labels: &[f32]) -> Result<(), FilterError>;
  fn label_to_texture(&mut self) -> Result<(), FilterError>;
  fn bilateral_filter(&mut self) -> Result<(), FilterError>;
  /// 滤波结果，纹理以左下角为原点，第 0 行是最底行
  fn mask(&self) -> &GrayImage;
}

/// 无 GPU 时使用的 CPU 滤波器，只生成标签纹理，平滑阶段原样复制
pub struct PassthroughFilter {
  params: FilterParams,
  labels: Box<[f32]>,
  label_tex: GrayImage,
  mask_tex: GrayImage,
}

impl PassthroughFilter {
  pub fn new(width: u32, height: u32) -> Result<Self, FilterError> {
    if width == 0 || height == 0 {
      return Err(FilterError::InvalidDimensions { width, height });
    }
    let params = FilterParams::new(width, height);
    Ok(PassthroughFilter {
      labels: vec![0f32; params.texel_count()].into_boxed_slice(),
      label_tex: GrayImage::new(width, height),
      mask_tex: GrayImage::new(width, height),
      params,
    })
  }

  pub fn params(&self) -> &FilterParams {
    &self.params
  }
}

impl GpuFilter for PassthroughFilter {
  fn set_params(&mut self, params: &FilterParams) {
    // 纹理尺寸在创建时确定
    self.params = FilterParams {
      width: self.params.width,
      height: self.params.height,
      ..*params
    };
  }

  fn upload_labels(&mut self, labels: &[f32]) -> Result<(), FilterError> {
    if labels.len() != self.labels.len() {
      return Err(FilterError::LabelLengthMismatch {
        expected: self.labels.len(),
        actual: labels.len(),
      });
    }
    self.labels.copy_from_slice(labels);
    Ok(())
  }

  fn label_to_texture(&mut self) -> Result<(), FilterError> {
    let width = self.params.width as usize;
    let height = self.params.height;
    // 标签按模型行序（顶部在前）排列，写入纹理时翻转为显示坐标
    for (x, y, texel) in self.label_tex.enumerate_pixels_mut() {
      let src_row = (height - 1 - y) as usize;
      let v = self.labels[src_row * width + x as usize];
      *texel = Luma([(v.clamp(0.0, 1.0) * 255.0).round() as u8]);
    }
    Ok(())
  }

  fn bilateral_filter(&mut self) -> Result<(), FilterError> {
    debug!(
      "跳过平滑: sigma_color={}, sigma_texel={}, step={}, radius={}",
      self.params.sigma_color, self.params.sigma_texel, self.params.step, self.params.radius
    );
    self.mask_tex.copy_from_slice(self.label_tex.as_raw());
    Ok(())
  }

  fn mask(&self) -> &GrayImage {
    &self.mask_tex
  }
}
