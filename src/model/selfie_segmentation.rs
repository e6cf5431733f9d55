// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/selfie_segmentation.rs - 人像分割模型
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

use image::{GrayImage, RgbImage};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  filter::{FilterParams, GpuFilter},
  frame::{AsNhwcFrame, RgbNhwcFrame},
  interpreter::{Delegate, Interpreter, InterpreterError, InterpreterOptions, TensorData},
  model::{Model, ModelError, check_counts, check_shape},
  sampler::{AspectMode, CpuSurface, Flip, GpuSurface, ImageSampler},
  tensor::{F32NhwcTensor, Normalization, TensorShape},
};

const SEGMENTATION_NUM_INPUTS: usize = 1;
const SEGMENTATION_NUM_OUTPUTS: usize = 1;

/// 把 `[H][W][1]` 输出张量按行优先顺序复制到长度为 H×W 的标签缓冲
///
/// 不做任何数值或坐标变换，显示用的翻转由滤波器在生成纹理时完成。
pub fn marshal_labels(
  output: &[f32],
  shape: TensorShape,
  labels: &mut [f32],
) -> Result<(), ModelError> {
  let texels = shape.height() * shape.width();
  let expected = TensorShape::nhwc(1, shape.height(), shape.width(), 1);
  if shape != expected {
    return Err(ModelError::ShapeMismatch {
      kind: "输出",
      index: 0,
      expected,
      actual: shape,
    });
  }
  if output.len() != texels || labels.len() != texels {
    return Err(
      InterpreterError::LengthMismatch {
        index: 0,
        expected: texels,
        actual: if output.len() != texels {
          output.len()
        } else {
          labels.len()
        },
      }
      .into(),
    );
  }
  labels.copy_from_slice(output);
  Ok(())
}

/// 一次分割的结果
#[derive(Debug, Clone)]
pub struct SegmentationResult {
  pub width: u32,
  pub height: u32,
  /// 行优先的标签缓冲，第 0 行对应图像顶部
  pub labels: Box<[f32]>,
  /// 滤波后的掩码纹理，左下角为原点
  pub mask: GrayImage,
}

impl SegmentationResult {
  /// 转换为左上角为原点的图像，便于保存或与源图像叠加
  pub fn mask_image(&self) -> GrayImage {
    image::imageops::flip_vertical(&self.mask)
  }
}

pub struct SelfieSegmentation<
  I: Interpreter,
  F: GpuFilter,
  const W: u32,
  const H: u32,
  S: GpuSurface = CpuSurface,
> {
  interpreter: I,
  filter: F,
  params: FilterParams,
  normalization: Normalization,
  sampler: ImageSampler<W, H, S>,
  fetch: RgbNhwcFrame<W, H>,
  inputs: F32NhwcTensor<W, H>,
  output0: Box<[f32]>,
  labels: Box<[f32]>,
}

impl<I: Interpreter, F: GpuFilter, const W: u32, const H: u32> SelfieSegmentation<I, F, W, H> {
  /// 使用 CPU 表面，源图像按 `AspectMode::Fit` 缩入
  pub fn new(
    interpreter: I,
    filter: F,
    params: FilterParams,
    normalization: Normalization,
    flip: Flip,
  ) -> Result<Self, ModelError> {
    let sampler = ImageSampler::new(flip)?.with_aspect_mode(AspectMode::Fit);
    Self::with_sampler(interpreter, filter, params, normalization, sampler)
  }
}

impl<I: Interpreter, F: GpuFilter, const W: u32, const H: u32, S: GpuSurface>
  SelfieSegmentation<I, F, W, H, S>
{
  pub const OUTPUT_SHAPE: TensorShape = TensorShape::nhwc(1, H as usize, W as usize, 1);

  pub fn with_sampler(
    mut interpreter: I,
    filter: F,
    params: FilterParams,
    normalization: Normalization,
    sampler: ImageSampler<W, H, S>,
  ) -> Result<Self, ModelError> {
    check_counts(
      &interpreter,
      SEGMENTATION_NUM_INPUTS,
      SEGMENTATION_NUM_OUTPUTS,
      false,
    )?;

    let input_shape = F32NhwcTensor::<W, H>::SHAPE;
    if interpreter.input_shape(0).is_none() {
      interpreter.resize_input(0, input_shape)?;
    }
    check_shape("输入", 0, input_shape, interpreter.input_shape(0))?;
    check_shape("输出", 0, Self::OUTPUT_SHAPE, interpreter.output_shape(0))?;

    if (params.width, params.height) != (W, H) {
      error!(
        "滤波参数尺寸 {}x{} 与模型 {}x{} 不符",
        params.width, params.height, W, H
      );
      return Err(ModelError::ShapeMismatch {
        kind: "滤波",
        index: 0,
        expected: Self::OUTPUT_SHAPE,
        actual: TensorShape::nhwc(1, params.height as usize, params.width as usize, 1),
      });
    }

    let texels = W as usize * H as usize;
    info!("分割模型就绪, 输入 {}, 输出 {}", input_shape, Self::OUTPUT_SHAPE);

    Ok(SelfieSegmentation {
      interpreter,
      filter,
      params,
      normalization,
      sampler,
      fetch: RgbNhwcFrame::default(),
      inputs: F32NhwcTensor::default(),
      output0: vec![0f32; texels].into_boxed_slice(),
      labels: vec![0f32; texels].into_boxed_slice(),
    })
  }

  pub fn params(&self) -> &FilterParams {
    &self.params
  }

  /// 更新平滑强度，下一次生成掩码时生效
  pub fn set_sigma_color(&mut self, sigma_color: f32) {
    self.params = self.params.sigma_color(sigma_color);
  }

  pub fn filter(&self) -> &F {
    &self.filter
  }

  /// 从解释器读取原始输出并整理为标签缓冲
  pub fn post_process(&mut self) -> Result<&[f32], ModelError> {
    self.interpreter.get_output(0, &mut self.output0)?;
    marshal_labels(&self.output0, Self::OUTPUT_SHAPE, &mut self.labels)?;
    Ok(&self.labels)
  }

  /// 标签转纹理，再做双边滤波
  pub fn result_texture(&mut self) -> Result<&GrayImage, ModelError> {
    let (gx, gy, gz) = self.params.dispatch();
    debug!("滤波线程组: {}x{}x{}", gx, gy, gz);
    self.filter.upload_labels(&self.labels)?;
    self.filter.set_params(&self.params);
    self.filter.label_to_texture()?;
    self.filter.bilateral_filter()?;
    Ok(self.filter.mask())
  }
}

impl<I: Interpreter, F: GpuFilter, const W: u32, const H: u32, S: GpuSurface> Model
  for SelfieSegmentation<I, F, W, H, S>
{
  type Input = RgbImage;
  type Output = SegmentationResult;
  type Error = ModelError;

  fn invoke(&mut self, input: &Self::Input) -> Result<(), Self::Error> {
    self.sampler.sample_into(input, &mut self.fetch)?;
    self.inputs.pack(self.fetch.as_nhwc(), self.normalization)?;

    debug!("设置模型输入");
    self
      .interpreter
      .set_input(0, TensorData::Float32(self.inputs.as_slice()))?;
    debug!("执行模型推理");
    self.interpreter.invoke()?;
    Ok(())
  }

  fn results(&mut self) -> Result<Self::Output, Self::Error> {
    self.post_process()?;
    let mask = self.result_texture()?.clone();
    Ok(SegmentationResult {
      width: W,
      height: H,
      labels: self.labels.clone(),
      mask,
    })
  }
}

const SEGMENTATION_SCHEME: &str = "segmentation";

/// `segmentation:///path/to/model?sigma_color=1.0&delegate=gpu&normalization=raw`
#[derive(Debug, Clone)]
pub struct SelfieSegmentationBuilder {
  model_path: PathBuf,
  options: InterpreterOptions,
  sigma_color: Option<f32>,
  normalization: Normalization,
  aspect: AspectMode,
  flip: Flip,
}

impl FromUrlWithScheme for SelfieSegmentationBuilder {
  const SCHEME: &'static str = SEGMENTATION_SCHEME;
}

impl FromUrl for SelfieSegmentationBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let normalization = match crate::query_param::<String>(url, "normalization").as_deref() {
      Some("raw") => Normalization::Raw,
      _ => Normalization::UnitRange,
    };

    Ok(SelfieSegmentationBuilder {
      model_path: PathBuf::from(url.path()),
      options: InterpreterOptions::default()
        .delegate(Delegate::Gpu)
        .with_url(url),
      sigma_color: crate::query_param(url, "sigma_color"),
      normalization,
      aspect: crate::query_param(url, "aspect").unwrap_or(AspectMode::Fit),
      flip: Flip::for_platform(crate::query_flag(url, "mobile")),
    })
  }
}

impl SelfieSegmentationBuilder {
  pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
    SelfieSegmentationBuilder {
      model_path: model_path.as_ref().to_path_buf(),
      options: InterpreterOptions::default().delegate(Delegate::Gpu),
      sigma_color: None,
      normalization: Normalization::UnitRange,
      aspect: AspectMode::Fit,
      flip: Flip::default(),
    }
  }

  pub fn options(mut self, options: InterpreterOptions) -> Self {
    self.options = options;
    self
  }

  pub fn sigma_color(mut self, sigma_color: f32) -> Self {
    self.sigma_color = Some(sigma_color);
    self
  }

  pub fn normalization(mut self, normalization: Normalization) -> Self {
    self.normalization = normalization;
    self
  }

  pub fn aspect_mode(mut self, aspect: AspectMode) -> Self {
    self.aspect = aspect;
    self
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  pub fn interpreter_options(&self) -> InterpreterOptions {
    self.options
  }

  pub fn filter_params(&self, width: u32, height: u32) -> FilterParams {
    let params = FilterParams::new(width, height);
    match self.sigma_color {
      Some(sigma_color) => params.sigma_color(sigma_color),
      None => params,
    }
  }

  pub fn build_with<I, F, L, const W: u32, const H: u32>(
    self,
    load: L,
    filter: F,
  ) -> Result<SelfieSegmentation<I, F, W, H>, ModelError>
  where
    I: Interpreter,
    F: GpuFilter,
    L: FnOnce(&Path, InterpreterOptions) -> Result<I, InterpreterError>,
  {
    if !self.model_path.is_file() {
      error!("模型文件不存在: {}", self.model_path.display());
      return Err(ModelError::ModelPathError(format!(
        "模型文件不存在: {}",
        self.model_path.display()
      )));
    }
    let interpreter = load(&self.model_path, self.options)?;
    let params = self.filter_params(W, H);
    let sampler = ImageSampler::new(self.flip)?.with_aspect_mode(self.aspect);
    SelfieSegmentation::with_sampler(interpreter, filter, params, self.normalization, sampler)
  }

  #[cfg(feature = "rknpu")]
  pub fn build<F: GpuFilter, const W: u32, const H: u32>(
    self,
    filter: F,
  ) -> Result<SelfieSegmentation<crate::interpreter::RknpuInterpreter, F, W, H>, ModelError> {
    self.build_with(crate::interpreter::RknpuInterpreter::load, filter)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn marshal_copies_uniform_tensor() {
    let shape = TensorShape::nhwc(1, 4, 6, 1);
    let output = vec![0.75f32; 24];
    let mut labels = vec![0f32; 24];
    marshal_labels(&output, shape, &mut labels).unwrap();
    assert_eq!(labels.len(), 24);
    assert!(labels.iter().all(|&v| v == 0.75));
  }

  #[test]
  fn marshal_preserves_row_major_order() {
    let shape = TensorShape::nhwc(1, 2, 3, 1);
    let output: Vec<f32> = (0..6).map(|v| v as f32).collect();
    let mut labels = vec![0f32; 6];
    marshal_labels(&output, shape, &mut labels).unwrap();
    assert_eq!(labels, output);
  }

  #[test]
  fn marshal_rejects_multi_channel() {
    let shape = TensorShape::nhwc(1, 2, 2, 2);
    let mut labels = vec![0f32; 4];
    assert!(matches!(
      marshal_labels(&[0.0; 8], shape, &mut labels),
      Err(ModelError::ShapeMismatch { .. })
    ));
  }

  #[test]
  fn marshal_rejects_short_buffer() {
    let shape = TensorShape::nhwc(1, 2, 2, 1);
    let mut labels = vec![0f32; 4];
    assert!(marshal_labels(&[0.0; 3], shape, &mut labels).is_err());
  }

  #[test]
  fn builder_reads_url() {
    let url =
      Url::parse("segmentation:///models/selfie.tflite?sigma_color=2.5&normalization=raw").unwrap();
    let builder = SelfieSegmentationBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), Path::new("/models/selfie.tflite"));
    assert_eq!(builder.interpreter_options().delegate, Delegate::Gpu);
    assert_eq!(builder.normalization, Normalization::Raw);
    assert_eq!(builder.filter_params(256, 256).sigma_color, 2.5);
    assert_eq!(builder.aspect, AspectMode::Fit);
  }

  #[test]
  fn builder_reads_aspect_mode() {
    let url = Url::parse("segmentation:///models/selfie.tflite?aspect=fill").unwrap();
    let builder = SelfieSegmentationBuilder::from_url(&url).unwrap();
    assert_eq!(builder.aspect, AspectMode::Fill);

    let url = Url::parse("segmentation:///models/selfie.tflite?aspect=bogus").unwrap();
    let builder = SelfieSegmentationBuilder::from_url(&url).unwrap();
    assert_eq!(builder.aspect, AspectMode::Fit);
  }
}
