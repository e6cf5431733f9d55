// 该文件是 Beifeng （北风） 项目的一部分。
// src/tensor.rs - 输入张量与打包
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

use std::fmt;

use thiserror::Error;

use crate::frame::RGB_CHANNELS;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TensorError {
  #[error("像素数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// NHWC 排列的张量形状 `[batch, height, width, channels]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorShape(pub [usize; 4]);

impl TensorShape {
  pub const fn nhwc(batch: usize, height: usize, width: usize, channels: usize) -> Self {
    TensorShape([batch, height, width, channels])
  }

  pub fn batch(&self) -> usize {
    self.0[0]
  }

  pub fn height(&self) -> usize {
    self.0[1]
  }

  pub fn width(&self) -> usize {
    self.0[2]
  }

  pub fn channels(&self) -> usize {
    self.0[3]
  }

  pub fn element_count(&self) -> usize {
    self.0.iter().product()
  }
}

impl fmt::Display for TensorShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let [n, h, w, c] = self.0;
    write!(f, "[{}, {}, {}, {}]", n, h, w, c)
  }
}

/// 将像素字节按补码重新解释为有符号值，即 `b > 127 ? b - 256 : b`
///
/// 这不是线性量化到 [-1, 1]，参考 SSD 模型就是按这种方式训练的。
#[inline]
pub fn quantize_u8(b: u8) -> i8 {
  b as i8
}

/// 浮点输入的数值范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalization {
  /// 保持 0-255
  Raw,
  /// 缩放到 0-1
  #[default]
  UnitRange,
}

impl Normalization {
  #[inline]
  pub fn apply(self, b: u8) -> f32 {
    match self {
      Normalization::Raw => b as f32,
      Normalization::UnitRange => b as f32 / 255.0,
    }
  }
}

fn check_len(expected: usize, actual: usize) -> Result<(), TensorError> {
  if expected != actual {
    return Err(TensorError::LengthMismatch { expected, actual });
  }
  Ok(())
}

/// `[H][W][3]` 有符号 8 位输入张量
#[derive(Debug, Clone)]
pub struct Int8NhwcTensor<const W: u32, const H: u32> {
  data: Box<[i8]>,
}

impl<const W: u32, const H: u32> Int8NhwcTensor<W, H> {
  pub const SHAPE: TensorShape = TensorShape::nhwc(1, H as usize, W as usize, RGB_CHANNELS);

  pub fn shape(&self) -> TensorShape {
    Self::SHAPE
  }

  pub fn pack(&mut self, pixels: &[u8]) -> Result<(), TensorError> {
    check_len(self.data.len(), pixels.len())?;
    for (dst, &src) in self.data.iter_mut().zip(pixels) {
      *dst = quantize_u8(src);
    }
    Ok(())
  }

  /// 按 `[y][x][c]` 取值
  pub fn get(&self, y: usize, x: usize, c: usize) -> i8 {
    self.data[(y * W as usize + x) * RGB_CHANNELS + c]
  }

  pub fn as_slice(&self) -> &[i8] {
    &self.data
  }

  pub fn as_bytes(&self) -> &[u8] {
    bytemuck::cast_slice(&self.data)
  }
}

impl<const W: u32, const H: u32> Default for Int8NhwcTensor<W, H> {
  fn default() -> Self {
    Self {
      data: vec![0i8; Self::SHAPE.element_count()].into_boxed_slice(),
    }
  }
}

/// `[H][W][3]` 浮点输入张量
#[derive(Debug, Clone)]
pub struct F32NhwcTensor<const W: u32, const H: u32> {
  data: Box<[f32]>,
}

impl<const W: u32, const H: u32> F32NhwcTensor<W, H> {
  pub const SHAPE: TensorShape = TensorShape::nhwc(1, H as usize, W as usize, RGB_CHANNELS);

  pub fn shape(&self) -> TensorShape {
    Self::SHAPE
  }

  pub fn pack(&mut self, pixels: &[u8], normalization: Normalization) -> Result<(), TensorError> {
    check_len(self.data.len(), pixels.len())?;
    for (dst, &src) in self.data.iter_mut().zip(pixels) {
      *dst = normalization.apply(src);
    }
    Ok(())
  }

  pub fn get(&self, y: usize, x: usize, c: usize) -> f32 {
    self.data[(y * W as usize + x) * RGB_CHANNELS + c]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn as_bytes(&self) -> &[u8] {
    bytemuck::cast_slice(&self.data)
  }
}

impl<const W: u32, const H: u32> Default for F32NhwcTensor<W, H> {
  fn default() -> Self {
    Self {
      data: vec![0f32; Self::SHAPE.element_count()].into_boxed_slice(),
    }
  }
}
