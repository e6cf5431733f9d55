// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/ssd.rs - SSD 目标检测模型
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

use image::RgbImage;
use serde::Serialize;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{AsNhwcFrame, RgbNhwcFrame},
  interpreter::{Interpreter, InterpreterError, InterpreterOptions, TensorData},
  model::{Model, ModelError, WithLabel, check_counts, check_shape},
  sampler::{CpuSurface, Flip, GpuSurface, ImageSampler},
  tensor::{Int8NhwcTensor, TensorShape},
};

pub const SSD_INPUT_W: u32 = 300;
pub const SSD_INPUT_H: u32 = 300;
pub const SSD_CHANNELS: usize = 3;
pub const SSD_MAX_DETECTIONS: usize = 10;
pub const SSD_THREADS: usize = 2;

const SSD_NUM_INPUTS: usize = 1;
// 框、类别、分数；部分导出的模型还带有检测数量输出
const SSD_NUM_OUTPUTS: usize = 3;
const SSD_BOXES_OUTPUT: usize = 0;
const SSD_CLASSES_OUTPUT: usize = 1;
const SSD_SCORES_OUTPUT: usize = 2;

/// 显示坐标系（左下角为原点）下的归一化矩形
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Rect {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl Rect {
  pub fn x_max(&self) -> f32 {
    self.x + self.width
  }

  /// 矩形的下边，`y` 是上边
  pub fn y_min(&self) -> f32 {
    self.y - self.height
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SsdResult {
  pub class_id: i32,
  pub score: f32,
  pub rect: Rect,
}

impl SsdResult {
  pub fn label<T: WithLabel>(&self) -> T {
    T::from_label_id(self.class_id)
  }
}

pub type SsdDetections = [SsdResult; SSD_MAX_DETECTIONS];

/// 将原始输出转换为显示坐标下的检测结果
///
/// 框按 `[top, left, bottom, right]` 排列。纵轴翻转为 `1 - v` 以适配左下角原点，
/// 类别编号截断取整，不按分数过滤，总是输出 N 条结果。
pub fn unpack_detections<const N: usize>(
  boxes: &[[f32; 4]; N],
  classes: &[f32; N],
  scores: &[f32; N],
  results: &mut [SsdResult; N],
) {
  for (i, result) in results.iter_mut().enumerate() {
    let [top, left, bottom, right] = boxes[i];
    let top = 1.0 - top;
    let bottom = 1.0 - bottom;

    *result = SsdResult {
      class_id: classes[i] as i32,
      score: scores[i],
      rect: Rect {
        x: left,
        y: top,
        width: right - left,
        height: top - bottom,
      },
    };
  }
}

pub struct Ssd<I: Interpreter, S: GpuSurface = CpuSurface> {
  interpreter: I,
  sampler: ImageSampler<SSD_INPUT_W, SSD_INPUT_H, S>,
  fetch: RgbNhwcFrame<SSD_INPUT_W, SSD_INPUT_H>,
  inputs: Int8NhwcTensor<SSD_INPUT_W, SSD_INPUT_H>,
  boxes: [[f32; 4]; SSD_MAX_DETECTIONS],
  classes: [f32; SSD_MAX_DETECTIONS],
  scores: [f32; SSD_MAX_DETECTIONS],
  results: SsdDetections,
}

impl<I: Interpreter> Ssd<I> {
  pub fn new(interpreter: I, flip: Flip) -> Result<Self, ModelError> {
    Self::with_sampler(interpreter, ImageSampler::new(flip)?)
  }
}

impl<I: Interpreter, S: GpuSurface> Ssd<I, S> {
  /// 使用给定的采样器（及其表面）构建模型
  pub fn with_sampler(
    mut interpreter: I,
    sampler: ImageSampler<SSD_INPUT_W, SSD_INPUT_H, S>,
  ) -> Result<Self, ModelError> {
    check_counts(&interpreter, SSD_NUM_INPUTS, SSD_NUM_OUTPUTS, true)?;

    let input_shape = Int8NhwcTensor::<SSD_INPUT_W, SSD_INPUT_H>::SHAPE;
    interpreter.resize_input(0, input_shape)?;
    check_shape("输入", 0, input_shape, interpreter.input_shape(0))?;

    // 不同导出工具的维度排列不同，只比较元素个数
    for (index, expected) in [
      (SSD_BOXES_OUTPUT, TensorShape::nhwc(1, 1, SSD_MAX_DETECTIONS, 4)),
      (SSD_CLASSES_OUTPUT, TensorShape::nhwc(1, 1, 1, SSD_MAX_DETECTIONS)),
      (SSD_SCORES_OUTPUT, TensorShape::nhwc(1, 1, 1, SSD_MAX_DETECTIONS)),
    ] {
      if let Some(actual) = interpreter.output_shape(index)
        && actual.element_count() != expected.element_count()
      {
        error!("输出 {} 形状 {} 与 {} 不符", index, actual, expected);
        return Err(ModelError::ShapeMismatch {
          kind: "输出",
          index,
          expected,
          actual,
        });
      }
    }

    info!("SSD 模型就绪, 输入 {}", input_shape);

    Ok(Ssd {
      interpreter,
      sampler,
      fetch: RgbNhwcFrame::default(),
      inputs: Int8NhwcTensor::default(),
      boxes: [[0.0; 4]; SSD_MAX_DETECTIONS],
      classes: [0.0; SSD_MAX_DETECTIONS],
      scores: [0.0; SSD_MAX_DETECTIONS],
      results: [SsdResult::default(); SSD_MAX_DETECTIONS],
    })
  }

  pub fn interpreter(&self) -> &I {
    &self.interpreter
  }

  /// 最近一次采样读回的模型输入图像
  pub fn input_frame(&self) -> &RgbNhwcFrame<SSD_INPUT_W, SSD_INPUT_H> {
    &self.fetch
  }

  pub fn input_tensor(&self) -> &Int8NhwcTensor<SSD_INPUT_W, SSD_INPUT_H> {
    &self.inputs
  }
}

impl<I: Interpreter, S: GpuSurface> Model for Ssd<I, S> {
  type Input = RgbImage;
  type Output = SsdDetections;
  type Error = ModelError;

  fn invoke(&mut self, input: &Self::Input) -> Result<(), Self::Error> {
    self.sampler.sample_into(input, &mut self.fetch)?;
    self.inputs.pack(self.fetch.as_nhwc())?;

    debug!("设置模型输入");
    self
      .interpreter
      .set_input(0, TensorData::Int8(self.inputs.as_slice()))?;
    debug!("执行模型推理");
    self.interpreter.invoke()?;

    debug!("获取模型输出");
    self
      .interpreter
      .get_output(SSD_BOXES_OUTPUT, self.boxes.as_flattened_mut())?;
    self
      .interpreter
      .get_output(SSD_CLASSES_OUTPUT, &mut self.classes)?;
    self
      .interpreter
      .get_output(SSD_SCORES_OUTPUT, &mut self.scores)?;
    Ok(())
  }

  fn results(&mut self) -> Result<Self::Output, Self::Error> {
    unpack_detections(&self.boxes, &self.classes, &self.scores, &mut self.results);
    debug!("检测结果: {:?}", self.results);
    Ok(self.results)
  }
}

const SSD_SCHEME: &str = "ssd";

/// `ssd:///path/to/model?threads=2&delegate=npu&mobile`
#[derive(Debug, Clone)]
pub struct SsdBuilder {
  model_path: PathBuf,
  options: InterpreterOptions,
  flip: Flip,
}

impl FromUrlWithScheme for SsdBuilder {
  const SCHEME: &'static str = SSD_SCHEME;
}

impl FromUrl for SsdBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(SsdBuilder {
      model_path: PathBuf::from(url.path()),
      options: InterpreterOptions::default()
        .threads(SSD_THREADS)
        .with_url(url),
      flip: Flip::for_platform(crate::query_flag(url, "mobile")),
    })
  }
}

impl SsdBuilder {
  pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
    SsdBuilder {
      model_path: model_path.as_ref().to_path_buf(),
      options: InterpreterOptions::default().threads(SSD_THREADS),
      flip: Flip::default(),
    }
  }

  pub fn options(mut self, options: InterpreterOptions) -> Self {
    self.options = options;
    self
  }

  pub fn flip(mut self, flip: Flip) -> Self {
    self.flip = flip;
    self
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  pub fn interpreter_options(&self) -> InterpreterOptions {
    self.options
  }

  /// 用给定的加载函数创建解释器并构建模型
  pub fn build_with<I, F>(self, load: F) -> Result<Ssd<I>, ModelError>
  where
    I: Interpreter,
    F: FnOnce(&Path, InterpreterOptions) -> Result<I, InterpreterError>,
  {
    if !self.model_path.is_file() {
      error!("模型文件不存在: {}", self.model_path.display());
      return Err(ModelError::ModelPathError(format!(
        "模型文件不存在: {}",
        self.model_path.display()
      )));
    }
    let interpreter = load(&self.model_path, self.options)?;
    Ssd::new(interpreter, self.flip)
  }

  #[cfg(feature = "rknpu")]
  pub fn build(self) -> Result<Ssd<crate::interpreter::RknpuInterpreter>, ModelError> {
    self.build_with(crate::interpreter::RknpuInterpreter::load)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-6
  }

  #[test]
  fn unpack_flips_vertical_axis() {
    let mut boxes = [[0.0; 4]; 1];
    boxes[0] = [0.2, 0.1, 0.6, 0.4];
    let mut results = [SsdResult::default(); 1];
    unpack_detections(&boxes, &[1.0], &[0.9], &mut results);

    let rect = results[0].rect;
    assert!(approx(rect.x, 0.1));
    assert!(approx(rect.y, 0.8));
    assert!(approx(rect.width, 0.3));
    assert!(approx(rect.height, 0.4));
    assert!(approx(rect.y_min(), 0.4));
    assert!(approx(rect.x_max(), 0.4));
  }

  #[test]
  fn class_id_is_truncated() {
    let boxes = [[0.0; 4]; 2];
    let mut results = [SsdResult::default(); 2];
    unpack_detections(&boxes, &[3.9, 0.99], &[0.5, 0.5], &mut results);
    assert_eq!(results[0].class_id, 3);
    assert_eq!(results[1].class_id, 0);
  }

  #[test]
  fn always_produces_every_record() {
    let boxes = [[0.0; 4]; SSD_MAX_DETECTIONS];
    let classes = [0.0; SSD_MAX_DETECTIONS];
    let scores = [0.0; SSD_MAX_DETECTIONS];
    let mut results = [SsdResult {
      class_id: -7,
      ..Default::default()
    }; SSD_MAX_DETECTIONS];
    unpack_detections(&boxes, &classes, &scores, &mut results);
    assert_eq!(results.len(), SSD_MAX_DETECTIONS);
    assert!(results.iter().all(|r| r.score == 0.0 && r.class_id == 0));
    assert!(results.iter().all(|r| r.rect.y == 1.0));
  }

  #[test]
  fn builder_reads_url() {
    let url = Url::parse("ssd:///models/ssd.tflite?threads=4&mobile").unwrap();
    let builder = SsdBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), Path::new("/models/ssd.tflite"));
    assert_eq!(builder.interpreter_options().threads, 4);
    assert_eq!(builder.flip, Flip { x: true, y: true });
  }

  #[test]
  fn builder_defaults_to_two_threads() {
    let url = Url::parse("ssd:///models/ssd.tflite").unwrap();
    let builder = SsdBuilder::from_url(&url).unwrap();
    assert_eq!(builder.interpreter_options().threads, SSD_THREADS);
    assert_eq!(builder.flip, Flip { x: false, y: true });
  }

  #[test]
  fn builder_rejects_other_scheme() {
    let url = Url::parse("segmentation:///models/ssd.tflite").unwrap();
    assert!(matches!(
      SsdBuilder::from_url(&url),
      Err(ModelError::ModelPathError(_))
    ));
  }
}
