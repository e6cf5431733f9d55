// 该文件是 Beifeng （北风） 项目的一部分。
// src/sampler.rs - 图像采样（缩放与翻转）
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

use std::{borrow::Cow, str::FromStr};

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, error};

use crate::frame::{FrameError, RGB_CHANNELS, RgbNhwcFrame};

#[derive(Error, Debug)]
pub enum SamplerError {
  #[error("目标尺寸无效: {width}x{height}")]
  InvalidDimensions { width: u32, height: u32 },
  #[error("源图像为空: {width}x{height}")]
  EmptySource { width: u32, height: u32 },
  #[error("表面尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  SurfaceSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("帧错误: {0}")]
  FrameError(#[from] FrameError),
}

/// 采样时的翻转设置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flip {
  pub x: bool,
  pub y: bool,
}

impl Flip {
  /// 触屏/移动设备上镜像水平方向，垂直方向总是翻转
  pub fn for_platform(mobile: bool) -> Self {
    Flip { x: mobile, y: true }
  }
}

impl Default for Flip {
  fn default() -> Self {
    Flip::for_platform(false)
  }
}

/// 源图像宽高比与表面不一致时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectMode {
  /// 拉伸到整个表面
  #[default]
  Stretch,
  /// 保持比例完整缩入，居中，空白处填黑
  Fit,
  /// 保持比例铺满，居中裁剪多出的部分
  Fill,
}

impl FromStr for AspectMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "stretch" => Ok(AspectMode::Stretch),
      "fit" => Ok(AspectMode::Fit),
      "fill" => Ok(AspectMode::Fill),
      other => Err(format!("未知的缩放方式: {}", other)),
    }
  }
}

/// 渲染表面能力接口
///
/// 表面以左下角为原点，`read_pixels` 按纹理读回的顺序返回 RGB24 数据，即从最底行开始。
pub trait GpuSurface: Sized {
  fn with_size(width: u32, height: u32) -> Result<Self, SamplerError>;
  fn width(&self) -> u32;
  fn height(&self) -> u32;
  /// 将源图像（左上角为原点）按 `aspect` 缩放绘制到整个表面
  fn blit(&mut self, src: &RgbImage, flip: Flip, aspect: AspectMode) -> Result<(), SamplerError>;
  fn read_pixels(&self) -> &[u8];
}

/// CPU 上的参考表面实现
#[derive(Debug, Clone)]
pub struct CpuSurface {
  width: u32,
  height: u32,
  // 第 0 行是表面的最底行
  texels: Box<[u8]>,
}

impl GpuSurface for CpuSurface {
  fn with_size(width: u32, height: u32) -> Result<Self, SamplerError> {
    if width == 0 || height == 0 {
      error!("无法创建 {}x{} 的表面", width, height);
      return Err(SamplerError::InvalidDimensions { width, height });
    }

    let len = width as usize * height as usize * RGB_CHANNELS;
    Ok(CpuSurface {
      width,
      height,
      texels: vec![0u8; len].into_boxed_slice(),
    })
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn blit(&mut self, src: &RgbImage, flip: Flip, aspect: AspectMode) -> Result<(), SamplerError> {
    let (src_w, src_h) = src.dimensions();
    if src_w == 0 || src_h == 0 {
      return Err(SamplerError::EmptySource {
        width: src_w,
        height: src_h,
      });
    }

    let resized = fit_to_surface(src, self.width, self.height, aspect);

    let w = self.width as usize;
    let h = self.height as usize;
    let raw = resized.as_raw();
    let row_len = w * RGB_CHANNELS;

    // v 从底部计数；源图像的行从顶部计数
    for v in 0..h {
      let src_row = if flip.y { v } else { h - 1 - v };
      let src_line = &raw[src_row * row_len..(src_row + 1) * row_len];
      let dst_line = &mut self.texels[v * row_len..(v + 1) * row_len];

      if flip.x {
        for x in 0..w {
          let sx = w - 1 - x;
          dst_line[x * RGB_CHANNELS..(x + 1) * RGB_CHANNELS]
            .copy_from_slice(&src_line[sx * RGB_CHANNELS..(sx + 1) * RGB_CHANNELS]);
        }
      } else {
        dst_line.copy_from_slice(src_line);
      }
    }

    Ok(())
  }

  fn read_pixels(&self) -> &[u8] {
    &self.texels
  }
}

fn resize_to(src: &RgbImage, width: u32, height: u32) -> Cow<'_, RgbImage> {
  if src.dimensions() == (width, height) {
    return Cow::Borrowed(src);
  }
  debug!(
    "缩放图像 {}x{} -> {}x{}",
    src.width(),
    src.height(),
    width,
    height
  );
  Cow::Owned(image::imageops::resize(src, width, height, FilterType::Triangle))
}

/// 生成与表面同尺寸、左上角为原点的图像
fn fit_to_surface(src: &RgbImage, width: u32, height: u32, aspect: AspectMode) -> Cow<'_, RgbImage> {
  let (src_w, src_h) = src.dimensions();
  let scale_x = width as f64 / src_w as f64;
  let scale_y = height as f64 / src_h as f64;

  match aspect {
    AspectMode::Stretch => resize_to(src, width, height),
    AspectMode::Fit => {
      let scale = scale_x.min(scale_y);
      let content_w = ((src_w as f64 * scale).round() as u32).clamp(1, width);
      let content_h = ((src_h as f64 * scale).round() as u32).clamp(1, height);
      if (content_w, content_h) == (width, height) {
        return resize_to(src, width, height);
      }

      let content = resize_to(src, content_w, content_h);
      let mut canvas = RgbImage::new(width, height);
      image::imageops::replace(
        &mut canvas,
        &*content,
        ((width - content_w) / 2) as i64,
        ((height - content_h) / 2) as i64,
      );
      Cow::Owned(canvas)
    }
    AspectMode::Fill => {
      let scale = scale_x.max(scale_y);
      let crop_w = ((width as f64 / scale).round() as u32).clamp(1, src_w);
      let crop_h = ((height as f64 / scale).round() as u32).clamp(1, src_h);
      if (crop_w, crop_h) == (src_w, src_h) {
        return resize_to(src, width, height);
      }

      let cropped = image::imageops::crop_imm(
        src,
        (src_w - crop_w) / 2,
        (src_h - crop_h) / 2,
        crop_w,
        crop_h,
      )
      .to_image();
      Cow::Owned(resize_to(&cropped, width, height).into_owned())
    }
  }
}

/// 将任意尺寸的图像采样到 W×H 的缓存表面
pub struct ImageSampler<const W: u32, const H: u32, S: GpuSurface = CpuSurface> {
  surface: S,
  flip: Flip,
  aspect: AspectMode,
}

impl<const W: u32, const H: u32, S: GpuSurface> ImageSampler<W, H, S> {
  pub fn new(flip: Flip) -> Result<Self, SamplerError> {
    let surface = S::with_size(W, H)?;
    Self::from_surface(surface, flip)
  }

  /// 使用外部创建的表面，尺寸必须为 W×H
  pub fn from_surface(surface: S, flip: Flip) -> Result<Self, SamplerError> {
    if W == 0 || H == 0 {
      error!("无法创建 {}x{} 的采样器", W, H);
      return Err(SamplerError::InvalidDimensions {
        width: W,
        height: H,
      });
    }
    let actual = (surface.width(), surface.height());
    if actual != (W, H) {
      error!("表面尺寸 {:?} 与采样尺寸 {}x{} 不符", actual, W, H);
      return Err(SamplerError::SurfaceSizeMismatch {
        expected: (W, H),
        actual,
      });
    }
    debug!("创建 {}x{} 采样表面, 翻转设置: {:?}", W, H, flip);
    Ok(ImageSampler {
      surface,
      flip,
      aspect: AspectMode::default(),
    })
  }

  pub fn with_aspect_mode(mut self, aspect: AspectMode) -> Self {
    self.aspect = aspect;
    self
  }

  pub fn flip(&self) -> Flip {
    self.flip
  }

  pub fn aspect_mode(&self) -> AspectMode {
    self.aspect
  }

  pub fn surface(&self) -> &S {
    &self.surface
  }

  pub fn sample(&mut self, src: &RgbImage) -> Result<&S, SamplerError> {
    self.surface.blit(src, self.flip, self.aspect)?;
    Ok(&self.surface)
  }

  /// 采样并把表面内容读回到帧缓冲中
  pub fn sample_into(
    &mut self,
    src: &RgbImage,
    frame: &mut RgbNhwcFrame<W, H>,
  ) -> Result<(), SamplerError> {
    self.surface.blit(src, self.flip, self.aspect)?;
    frame.copy_from(self.surface.read_pixels())?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  const RED: Rgb<u8> = Rgb([255, 0, 0]);
  const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

  fn top_red_bottom_blue() -> RgbImage {
    RgbImage::from_fn(4, 4, |_, y| if y < 2 { RED } else { BLUE })
  }

  fn left_red_right_blue() -> RgbImage {
    RgbImage::from_fn(4, 4, |x, _| if x < 2 { RED } else { BLUE })
  }

  #[test]
  fn zero_dimension_fails_fast() {
    assert!(matches!(
      ImageSampler::<0, 4>::new(Flip::default()),
      Err(SamplerError::InvalidDimensions {
        width: 0,
        height: 4
      })
    ));
    assert!(ImageSampler::<4, 0>::new(Flip::default()).is_err());
  }

  #[test]
  fn platform_flip_always_flips_vertically() {
    assert_eq!(Flip::for_platform(false), Flip { x: false, y: true });
    assert_eq!(Flip::for_platform(true), Flip { x: true, y: true });
  }

  #[test]
  fn vertical_flip_reads_back_source_top_first() {
    let mut sampler = ImageSampler::<4, 4>::new(Flip::for_platform(false)).unwrap();
    let pixels = sampler.sample(&top_red_bottom_blue()).unwrap().read_pixels();
    assert_eq!(&pixels[..3], &RED.0);
    assert_eq!(&pixels[pixels.len() - 3..], &BLUE.0);
  }

  #[test]
  fn without_vertical_flip_reads_back_source_bottom_first() {
    let mut sampler = ImageSampler::<4, 4>::new(Flip { x: false, y: false }).unwrap();
    let pixels = sampler.sample(&top_red_bottom_blue()).unwrap().read_pixels();
    assert_eq!(&pixels[..3], &BLUE.0);
  }

  #[test]
  fn horizontal_flip_mirrors_columns() {
    let mut sampler = ImageSampler::<4, 4>::new(Flip::for_platform(true)).unwrap();
    let pixels = sampler.sample(&left_red_right_blue()).unwrap().read_pixels();
    assert_eq!(&pixels[..3], &BLUE.0);
    assert_eq!(&pixels[9..12], &RED.0);
  }

  #[test]
  fn sampling_is_deterministic() {
    let src = RgbImage::from_fn(37, 23, |x, y| Rgb([(x * 7) as u8, (y * 11) as u8, (x ^ y) as u8]));
    let mut sampler = ImageSampler::<16, 12>::new(Flip::default()).unwrap();
    let first = sampler.sample(&src).unwrap().read_pixels().to_vec();
    let second = sampler.sample(&src).unwrap().read_pixels().to_vec();
    assert_eq!(first.len(), 16 * 12 * 3);
    assert_eq!(first, second);
  }

  #[test]
  fn sample_into_fills_frame() {
    let src = RgbImage::from_pixel(10, 10, Rgb([9, 8, 7]));
    let mut sampler = ImageSampler::<5, 5>::new(Flip::default()).unwrap();
    let mut frame = RgbNhwcFrame::<5, 5>::default();
    sampler.sample_into(&src, &mut frame).unwrap();
    assert!(frame.to_rgb_image().pixels().all(|p| *p == Rgb([9, 8, 7])));
  }

  fn wide_left_red_right_blue() -> RgbImage {
    RgbImage::from_fn(32, 16, |x, _| if x < 16 { RED } else { BLUE })
  }

  fn pixel(pixels: &[u8], width: usize, x: usize, row: usize) -> [u8; 3] {
    let i = (row * width + x) * RGB_CHANNELS;
    [pixels[i], pixels[i + 1], pixels[i + 2]]
  }

  fn is_red(p: [u8; 3]) -> bool {
    p[0] > 200 && p[2] < 50
  }

  fn is_blue(p: [u8; 3]) -> bool {
    p[2] > 200 && p[0] < 50
  }

  #[test]
  fn stretch_fills_whole_surface() {
    let mut sampler = ImageSampler::<16, 16>::new(Flip::default()).unwrap();
    assert_eq!(sampler.aspect_mode(), AspectMode::Stretch);
    let pixels = sampler.sample(&wide_left_red_right_blue()).unwrap().read_pixels();
    assert!(is_red(pixel(pixels, 16, 0, 0)));
    assert!(is_blue(pixel(pixels, 16, 15, 0)));
  }

  #[test]
  fn fit_letterboxes_wide_source() {
    let mut sampler = ImageSampler::<16, 16>::new(Flip::default())
      .unwrap()
      .with_aspect_mode(AspectMode::Fit);
    let pixels = sampler.sample(&wide_left_red_right_blue()).unwrap().read_pixels();

    // 2:1 的内容缩放为 16x8，上下各留 4 行黑边
    for row in (0..4).chain(12..16) {
      assert!((0..16).all(|x| pixel(pixels, 16, x, row) == [0, 0, 0]), "row {}", row);
    }
    for row in 4..12 {
      assert!(is_red(pixel(pixels, 16, 0, row)));
      assert!(is_blue(pixel(pixels, 16, 15, row)));
    }
  }

  #[test]
  fn fill_crops_wide_source_centre() {
    // 左 8 列红、中 16 列蓝、右 8 列红，裁剪后只剩中间的蓝色
    let src = RgbImage::from_fn(32, 16, |x, _| if (8..24).contains(&x) { BLUE } else { RED });
    let mut sampler = ImageSampler::<16, 16>::new(Flip::default())
      .unwrap()
      .with_aspect_mode(AspectMode::Fill);
    let pixels = sampler.sample(&src).unwrap().read_pixels();
    assert!(pixels.chunks_exact(3).all(|p| p == BLUE.0));
  }

  #[test]
  fn aspect_mode_parses_names() {
    assert_eq!("fit".parse::<AspectMode>(), Ok(AspectMode::Fit));
    assert_eq!("FILL".parse::<AspectMode>(), Ok(AspectMode::Fill));
    assert_eq!("stretch".parse::<AspectMode>(), Ok(AspectMode::Stretch));
    assert!("crop".parse::<AspectMode>().is_err());
  }

  #[test]
  fn foreign_surface_must_match_size() {
    let surface = CpuSurface::with_size(8, 8).unwrap();
    assert!(matches!(
      ImageSampler::<16, 16>::from_surface(surface, Flip::default()),
      Err(SamplerError::SurfaceSizeMismatch {
        expected: (16, 16),
        actual: (8, 8)
      })
    ));
  }

  #[test]
  fn empty_source_is_rejected() {
    let mut sampler = ImageSampler::<4, 4>::new(Flip::default()).unwrap();
    assert!(matches!(
      sampler.sample(&RgbImage::new(0, 0)),
      Err(SamplerError::EmptySource { .. })
    ));
  }
}
