// 该文件是 Beifeng （北风） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;
use tracing::error;

use crate::{
  filter::FilterError,
  frame::FrameError,
  interpreter::{Interpreter, InterpreterError},
  sampler::SamplerError,
  tensor::{TensorError, TensorShape},
};

/// 模型推理分两步：`invoke` 写入缓存的输出张量，`results` 解析缓存
pub trait Model {
  type Input: ?Sized;
  type Output;
  type Error;

  fn invoke(&mut self, input: &Self::Input) -> Result<(), Self::Error>;
  fn results(&mut self) -> Result<Self::Output, Self::Error>;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.invoke(input)?;
    self.results()
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("采样错误: {0}")]
  SamplerError(#[from] SamplerError),
  #[error("张量错误: {0}")]
  TensorError(#[from] TensorError),
  #[error("帧错误: {0}")]
  FrameError(#[from] FrameError),
  #[error("推理错误: {0}")]
  InterpreterError(#[from] InterpreterError),
  #[error("滤波错误: {0}")]
  FilterError(#[from] FilterError),
  #[error("模型{kind}数量不匹配: 期望 {expected}, 实际 {actual}")]
  CountMismatch {
    kind: &'static str,
    expected: usize,
    actual: usize,
  },
  #[error("模型{kind} {index} 形状不匹配: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch {
    kind: &'static str,
    index: usize,
    expected: TensorShape,
    actual: TensorShape,
  },
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

/// 检查解释器的输入/输出数量，`at_least` 为真时允许多出的张量
pub(crate) fn check_counts<I: Interpreter>(
  interpreter: &I,
  inputs: usize,
  outputs: usize,
  at_least: bool,
) -> Result<(), ModelError> {
  let num_inputs = interpreter.input_count();
  if num_inputs != inputs {
    error!("预期模型输入数量为 {}, 实际为 {}", inputs, num_inputs);
    return Err(ModelError::CountMismatch {
      kind: "输入",
      expected: inputs,
      actual: num_inputs,
    });
  }

  let num_outputs = interpreter.output_count();
  let outputs_ok = if at_least {
    num_outputs >= outputs
  } else {
    num_outputs == outputs
  };
  if !outputs_ok {
    error!("预期模型输出数量为 {}, 实际为 {}", outputs, num_outputs);
    return Err(ModelError::CountMismatch {
      kind: "输出",
      expected: outputs,
      actual: num_outputs,
    });
  }
  Ok(())
}

/// 后端能报告形状时检查，否则留到读取输出时按长度检查
pub(crate) fn check_shape(
  kind: &'static str,
  index: usize,
  expected: TensorShape,
  actual: Option<TensorShape>,
) -> Result<(), ModelError> {
  match actual {
    Some(actual) if actual != expected => {
      error!("模型{} {} 形状不匹配: 期望 {}, 实际 {}", kind, index, expected, actual);
      Err(ModelError::ShapeMismatch {
        kind,
        index,
        expected,
        actual,
      })
    }
    _ => Ok(()),
  }
}

mod labels;
pub use self::labels::{CocoLabel, WithLabel};

mod ssd;
pub use self::ssd::{
  Rect, SSD_CHANNELS, SSD_INPUT_H, SSD_INPUT_W, SSD_MAX_DETECTIONS, SSD_THREADS, Ssd, SsdBuilder,
  SsdDetections, SsdResult, unpack_detections,
};

mod selfie_segmentation;
pub use self::selfie_segmentation::{
  SegmentationResult, SelfieSegmentation, SelfieSegmentationBuilder, marshal_labels,
};
