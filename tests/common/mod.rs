// 该文件是 Beifeng （北风） 项目的一部分。
// tests/common/mod.rs - 测试用解释器与滤波器
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

#![allow(dead_code)]

use std::{
  collections::VecDeque,
  sync::{Arc, Mutex},
};

use beifeng::{
  filter::{FilterError, FilterParams, GpuFilter},
  interpreter::{Interpreter, InterpreterError, TensorData},
  sampler::{AspectMode, Flip, GpuSurface, SamplerError},
  tensor::TensorShape,
};
use image::{GrayImage, Luma, RgbImage};

/// 解释器收到的输入与调用次数
#[derive(Debug, Default)]
pub struct Journal {
  pub int8_input: Option<Vec<i8>>,
  pub f32_input: Option<Vec<f32>>,
  pub resized: Vec<(usize, TensorShape)>,
  pub invocations: usize,
}

/// 按脚本返回输出的解释器，每次 `invoke` 取出下一组输出
pub struct ScriptedInterpreter {
  input_shapes: Vec<Option<TensorShape>>,
  output_shapes: Vec<Option<TensorShape>>,
  script: VecDeque<Vec<Vec<f32>>>,
  current: Option<Vec<Vec<f32>>>,
  pub journal: Arc<Mutex<Journal>>,
}

impl ScriptedInterpreter {
  pub fn new(inputs: usize, output_shapes: Vec<Option<TensorShape>>) -> Self {
    ScriptedInterpreter {
      input_shapes: vec![None; inputs],
      output_shapes,
      script: VecDeque::new(),
      current: None,
      journal: Arc::default(),
    }
  }

  pub fn with_input_shape(mut self, index: usize, shape: TensorShape) -> Self {
    self.input_shapes[index] = Some(shape);
    self
  }

  pub fn then_output(mut self, outputs: Vec<Vec<f32>>) -> Self {
    self.script.push_back(outputs);
    self
  }

  /// 10 条检测的 SSD 解释器
  pub fn ssd() -> Self {
    ScriptedInterpreter::new(
      1,
      vec![
        Some(TensorShape::nhwc(1, 1, 10, 4)),
        Some(TensorShape::nhwc(1, 1, 1, 10)),
        Some(TensorShape::nhwc(1, 1, 1, 10)),
        Some(TensorShape::nhwc(1, 1, 1, 1)),
      ],
    )
  }

  pub fn segmentation(width: usize, height: usize) -> Self {
    ScriptedInterpreter::new(1, vec![Some(TensorShape::nhwc(1, height, width, 1))])
  }
}

/// 组装一组 SSD 输出，第 0 条检测使用给定值，其余为零
pub fn ssd_outputs(detection: Option<([f32; 4], f32, f32)>) -> Vec<Vec<f32>> {
  let mut boxes = vec![0f32; 40];
  let mut classes = vec![0f32; 10];
  let mut scores = vec![0f32; 10];
  if let Some((bbox, class, score)) = detection {
    boxes[..4].copy_from_slice(&bbox);
    classes[0] = class;
    scores[0] = score;
  }
  vec![boxes, classes, scores, vec![10.0]]
}

impl Interpreter for ScriptedInterpreter {
  fn input_count(&self) -> usize {
    self.input_shapes.len()
  }

  fn output_count(&self) -> usize {
    self.output_shapes.len()
  }

  fn input_shape(&self, index: usize) -> Option<TensorShape> {
    self.input_shapes.get(index).copied().flatten()
  }

  fn output_shape(&self, index: usize) -> Option<TensorShape> {
    self.output_shapes.get(index).copied().flatten()
  }

  fn resize_input(&mut self, index: usize, shape: TensorShape) -> Result<(), InterpreterError> {
    let count = self.input_shapes.len();
    let slot = self
      .input_shapes
      .get_mut(index)
      .ok_or(InterpreterError::IndexOutOfRange { index, count })?;
    *slot = Some(shape);
    self.journal.lock().unwrap().resized.push((index, shape));
    Ok(())
  }

  fn set_input(&mut self, index: usize, data: TensorData<'_>) -> Result<(), InterpreterError> {
    if index >= self.input_shapes.len() {
      return Err(InterpreterError::IndexOutOfRange {
        index,
        count: self.input_shapes.len(),
      });
    }
    let mut journal = self.journal.lock().unwrap();
    match data {
      TensorData::Int8(data) => journal.int8_input = Some(data.to_vec()),
      TensorData::Float32(data) => journal.f32_input = Some(data.to_vec()),
    }
    Ok(())
  }

  fn invoke(&mut self) -> Result<(), InterpreterError> {
    if let Some(next) = self.script.pop_front() {
      self.current = Some(next);
    }
    self.journal.lock().unwrap().invocations += 1;
    Ok(())
  }

  fn get_output(&self, index: usize, out: &mut [f32]) -> Result<(), InterpreterError> {
    let outputs = self.current.as_ref().ok_or(InterpreterError::NotInvoked)?;
    let data = outputs.get(index).ok_or(InterpreterError::IndexOutOfRange {
      index,
      count: outputs.len(),
    })?;
    if data.len() != out.len() {
      return Err(InterpreterError::LengthMismatch {
        index,
        expected: data.len(),
        actual: out.len(),
      });
    }
    out.copy_from_slice(data);
    Ok(())
  }
}

/// 记录调用顺序的滤波器，掩码直接由标签生成
pub struct RecordingFilter {
  width: u32,
  height: u32,
  labels: Vec<f32>,
  mask: GrayImage,
  pub calls: Arc<Mutex<Vec<&'static str>>>,
  pub params: Arc<Mutex<Option<FilterParams>>>,
}

impl RecordingFilter {
  pub fn new(width: u32, height: u32) -> Self {
    RecordingFilter {
      width,
      height,
      labels: Vec::new(),
      mask: GrayImage::new(width, height),
      calls: Arc::default(),
      params: Arc::default(),
    }
  }
}

impl GpuFilter for RecordingFilter {
  fn set_params(&mut self, params: &FilterParams) {
    self.calls.lock().unwrap().push("set_params");
    *self.params.lock().unwrap() = Some(*params);
  }

  fn upload_labels(&mut self, labels: &[f32]) -> Result<(), FilterError> {
    self.calls.lock().unwrap().push("upload_labels");
    self.labels = labels.to_vec();
    Ok(())
  }

  fn label_to_texture(&mut self) -> Result<(), FilterError> {
    self.calls.lock().unwrap().push("label_to_texture");
    let width = self.width as usize;
    for (x, y, texel) in self.mask.enumerate_pixels_mut() {
      let v = self.labels[(self.height - 1 - y) as usize * width + x as usize];
      *texel = Luma([(v.clamp(0.0, 1.0) * 255.0).round() as u8]);
    }
    Ok(())
  }

  fn bilateral_filter(&mut self) -> Result<(), FilterError> {
    self.calls.lock().unwrap().push("bilateral_filter");
    Ok(())
  }

  fn mask(&self) -> &GrayImage {
    self.calls.lock().unwrap().push("mask");
    &self.mask
  }
}

/// 记录 `blit` 参数的表面，读回内容固定为 `fill` 颜色
pub struct RecordingSurface {
  width: u32,
  height: u32,
  fill: [u8; 3],
  texels: Vec<u8>,
  pub blits: Arc<Mutex<Vec<(Flip, AspectMode, (u32, u32))>>>,
}

impl RecordingSurface {
  pub fn filled(width: u32, height: u32, fill: [u8; 3]) -> Self {
    RecordingSurface {
      width,
      height,
      fill,
      texels: vec![0; width as usize * height as usize * 3],
      blits: Arc::default(),
    }
  }
}

impl GpuSurface for RecordingSurface {
  fn with_size(width: u32, height: u32) -> Result<Self, SamplerError> {
    Ok(RecordingSurface::filled(width, height, [0, 0, 0]))
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn blit(&mut self, src: &RgbImage, flip: Flip, aspect: AspectMode) -> Result<(), SamplerError> {
    self
      .blits
      .lock()
      .unwrap()
      .push((flip, aspect, src.dimensions()));
    for texel in self.texels.chunks_exact_mut(3) {
      texel.copy_from_slice(&self.fill);
    }
    Ok(())
  }

  fn read_pixels(&self) -> &[u8] {
    &self.texels
  }
}
