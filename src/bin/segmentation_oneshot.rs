// 该文件是 Beifeng （北风） 项目的一部分。
// src/bin/segmentation_oneshot.rs - 人像分割单张图像推理
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use beifeng::{
  FromUrl,
  filter::PassthroughFilter,
  input::InputWrapper,
  model::SelfieSegmentationBuilder,
  output::OutputWrapper,
  task::{OneShotTask, Task},
};
use tracing::info;

/// 人像分割单帧推理
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径，例如 segmentation:///models/selfie.rknn?sigma_color=1.0
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 使用 256x144 横屏模型
  #[arg(long)]
  pub landscape: bool,
}

fn run<const W: u32, const H: u32>(args: &Args) -> Result<()> {
  let input = InputWrapper::from_url(&args.input)?;
  let filter = PassthroughFilter::new(W, H)?;
  let model = SelfieSegmentationBuilder::from_url(&args.model)?.build::<_, W, H>(filter)?;
  let output = OutputWrapper::from_url(&args.output)?;

  OneShotTask.run_task(input, model, output)
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  if args.landscape {
    run::<256, 144>(&args)
  } else {
    run::<256, 256>(&args)
  }
}
