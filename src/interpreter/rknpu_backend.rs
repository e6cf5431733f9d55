// 该文件是 Beifeng （北风） 项目的一部分。
// src/interpreter/rknpu_backend.rs - RKNPU 推理后端
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

use std::path::Path;

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info, warn};

use super::{Interpreter, InterpreterError, InterpreterOptions, TensorData};
use crate::tensor::TensorShape;

impl From<rknpu::Error> for InterpreterError {
  fn from(err: rknpu::Error) -> Self {
    InterpreterError::Backend(err.to_string())
  }
}

/// 基于 RKNN 运行时的解释器
///
/// RKNN 模型的输入形状在转换时已固定，`resize_input` 只做校验记录；
/// 输出在 `invoke` 后缓存，直到下一次推理覆盖。
pub struct RknpuInterpreter {
  context: Context,
  num_inputs: usize,
  num_outputs: usize,
  input_shapes: Vec<Option<TensorShape>>,
  outputs: Option<rknpu::Output>,
}

impl RknpuInterpreter {
  pub fn load<P: AsRef<Path>>(
    path: P,
    options: InterpreterOptions,
  ) -> Result<Self, InterpreterError> {
    info!("加载模型文件: {}", path.as_ref().display());
    let model_data = std::fs::read(path.as_ref())?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );
    Self::from_bytes(&model_data, options)
  }

  pub fn from_bytes(model_data: &[u8], options: InterpreterOptions) -> Result<Self, InterpreterError> {
    if options.threads > 1 {
      debug!("RKNN 后端不使用线程数设置: {}", options.threads);
    }
    debug!("推理后端: {:?}", options.delegate);

    info!("创建 RKNN 推理上下文");
    let context = Context::new(model_data, InitFlags::default())?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(e.into());
      }
    }

    let num_inputs = context.num_inputs()? as usize;
    let num_outputs = context.num_outputs()? as usize;
    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);
    info!("模型加载完成");

    Ok(RknpuInterpreter {
      context,
      num_inputs,
      num_outputs,
      input_shapes: vec![None; num_inputs],
      outputs: None,
    })
  }

  fn check_input(&self, index: usize) -> Result<(), InterpreterError> {
    if index >= self.num_inputs {
      return Err(InterpreterError::IndexOutOfRange {
        index,
        count: self.num_inputs,
      });
    }
    Ok(())
  }
}

impl Interpreter for RknpuInterpreter {
  fn input_count(&self) -> usize {
    self.num_inputs
  }

  fn output_count(&self) -> usize {
    self.num_outputs
  }

  fn input_shape(&self, index: usize) -> Option<TensorShape> {
    self.input_shapes.get(index).copied().flatten()
  }

  fn output_shape(&self, _index: usize) -> Option<TensorShape> {
    None
  }

  fn resize_input(&mut self, index: usize, shape: TensorShape) -> Result<(), InterpreterError> {
    self.check_input(index)?;
    warn!("RKNN 模型输入形状固定, 按 {} 使用输入 {}", shape, index);
    self.input_shapes[index] = Some(shape);
    Ok(())
  }

  fn set_input(&mut self, index: usize, data: TensorData<'_>) -> Result<(), InterpreterError> {
    self.check_input(index)?;
    if let Some(shape) = self.input_shape(index)
      && shape.element_count() != data.len()
    {
      return Err(InterpreterError::LengthMismatch {
        index,
        expected: shape.element_count(),
        actual: data.len(),
      });
    }

    match data {
      TensorData::Int8(values) => self.context.set_input(
        index as _,
        bytemuck::cast_slice(values),
        TensorFormat::NHWC,
        TensorType::Int8,
      )?,
      TensorData::Float32(values) => self.context.set_input(
        index as _,
        bytemuck::cast_slice(values),
        TensorFormat::NHWC,
        TensorType::Float32,
      )?,
    }
    Ok(())
  }

  fn invoke(&mut self) -> Result<(), InterpreterError> {
    debug!("执行模型推理");
    self.context.run()?;
    self.outputs = Some(self.context.get_outputs()?);
    Ok(())
  }

  fn get_output(&self, index: usize, out: &mut [f32]) -> Result<(), InterpreterError> {
    if index >= self.num_outputs {
      return Err(InterpreterError::IndexOutOfRange {
        index,
        count: self.num_outputs,
      });
    }
    let outputs = self.outputs.as_ref().ok_or(InterpreterError::NotInvoked)?;
    let data = outputs.get_f32(index)?;
    if data.len() != out.len() {
      error!(
        "输出 {} 长度不匹配: 期望 {}, 实际 {}",
        index,
        out.len(),
        data.len()
      );
      return Err(InterpreterError::LengthMismatch {
        index,
        expected: out.len(),
        actual: data.len(),
      });
    }
    out.copy_from_slice(data);
    Ok(())
  }
}
