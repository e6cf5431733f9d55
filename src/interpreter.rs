// 该文件是 Beifeng （北风） 项目的一部分。
// src/interpreter.rs - 推理引擎接口
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

use std::str::FromStr;

use thiserror::Error;

use crate::tensor::TensorShape;

#[cfg(feature = "rknpu")]
mod rknpu_backend;
#[cfg(feature = "rknpu")]
pub use self::rknpu_backend::RknpuInterpreter;

#[derive(Error, Debug)]
pub enum InterpreterError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("张量索引越界: {index}, 共 {count} 个")]
  IndexOutOfRange { index: usize, count: usize },
  #[error("张量 {index} 形状不匹配: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch {
    index: usize,
    expected: TensorShape,
    actual: TensorShape,
  },
  #[error("张量 {index} 长度不匹配: 期望 {expected}, 实际 {actual}")]
  LengthMismatch {
    index: usize,
    expected: usize,
    actual: usize,
  },
  #[error("尚未执行推理")]
  NotInvoked,
  #[error("不支持的操作: {0}")]
  Unsupported(String),
  #[error("后端错误: {0}")]
  Backend(String),
}

/// 推理后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delegate {
  #[default]
  Cpu,
  Gpu,
  Npu,
}

impl FromStr for Delegate {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "cpu" => Ok(Delegate::Cpu),
      "gpu" => Ok(Delegate::Gpu),
      "npu" => Ok(Delegate::Npu),
      other => Err(format!("未知的推理后端: {}", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterOptions {
  pub threads: usize,
  pub delegate: Delegate,
}

impl Default for InterpreterOptions {
  fn default() -> Self {
    InterpreterOptions {
      threads: 1,
      delegate: Delegate::Cpu,
    }
  }
}

impl InterpreterOptions {
  pub fn threads(mut self, threads: usize) -> Self {
    self.threads = threads.max(1);
    self
  }

  pub fn delegate(mut self, delegate: Delegate) -> Self {
    self.delegate = delegate;
    self
  }

  /// 从模型 URL 的 `threads` 与 `delegate` 查询参数覆盖设置
  pub fn with_url(mut self, url: &url::Url) -> Self {
    if let Some(threads) = crate::query_param::<usize>(url, "threads") {
      self = self.threads(threads);
    }
    if let Some(delegate) = crate::query_param::<Delegate>(url, "delegate") {
      self = self.delegate(delegate);
    }
    self
  }
}

/// 写入输入张量的数据
#[derive(Debug, Clone, Copy)]
pub enum TensorData<'a> {
  Int8(&'a [i8]),
  Float32(&'a [f32]),
}

impl TensorData<'_> {
  pub fn len(&self) -> usize {
    match self {
      TensorData::Int8(data) => data.len(),
      TensorData::Float32(data) => data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 外部推理引擎契约，张量按索引访问
pub trait Interpreter {
  fn input_count(&self) -> usize;
  fn output_count(&self) -> usize;
  /// 后端无法在推理前给出形状时返回 `None`
  fn input_shape(&self, index: usize) -> Option<TensorShape>;
  fn output_shape(&self, index: usize) -> Option<TensorShape>;
  fn resize_input(&mut self, index: usize, shape: TensorShape) -> Result<(), InterpreterError>;
  fn set_input(&mut self, index: usize, data: TensorData<'_>) -> Result<(), InterpreterError>;
  fn invoke(&mut self) -> Result<(), InterpreterError>;
  fn get_output(&self, index: usize, out: &mut [f32]) -> Result<(), InterpreterError>;
}

impl<I: Interpreter + ?Sized> Interpreter for Box<I> {
  fn input_count(&self) -> usize {
    (**self).input_count()
  }

  fn output_count(&self) -> usize {
    (**self).output_count()
  }

  fn input_shape(&self, index: usize) -> Option<TensorShape> {
    (**self).input_shape(index)
  }

  fn output_shape(&self, index: usize) -> Option<TensorShape> {
    (**self).output_shape(index)
  }

  fn resize_input(&mut self, index: usize, shape: TensorShape) -> Result<(), InterpreterError> {
    (**self).resize_input(index, shape)
  }

  fn set_input(&mut self, index: usize, data: TensorData<'_>) -> Result<(), InterpreterError> {
    (**self).set_input(index, data)
  }

  fn invoke(&mut self) -> Result<(), InterpreterError> {
    (**self).invoke()
  }

  fn get_output(&self, index: usize, out: &mut [f32]) -> Result<(), InterpreterError> {
    (**self).get_output(index, out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn options_read_url_query() {
    let url = url::Url::parse("ssd:///m.rknn?threads=4&delegate=NPU").unwrap();
    let options = InterpreterOptions::default().with_url(&url);
    assert_eq!(options.threads, 4);
    assert_eq!(options.delegate, Delegate::Npu);
  }

  #[test]
  fn options_keep_defaults_on_bad_values() {
    let url = url::Url::parse("ssd:///m.rknn?threads=abc&delegate=tpu").unwrap();
    let options = InterpreterOptions::default().threads(2).with_url(&url);
    assert_eq!(options, InterpreterOptions::default().threads(2));
  }

  #[test]
  fn zero_threads_is_clamped() {
    assert_eq!(InterpreterOptions::default().threads(0).threads, 1);
  }
}
