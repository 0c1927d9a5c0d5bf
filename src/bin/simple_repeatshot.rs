// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/simple_repeatshot.rs - 重复检测同一张图像并统计耗时
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
use image::DynamicImage;
use url::Url;

use shanan_detect::{
  FromUrl,
  input::ImageFileInput,
  model::{CocoLabel, RknnEngineBuilder, Yolov8, Yolov8Config},
  output::OutputWrapper,
  task::{RepeatShotTask, Task},
};
use tracing::info;

/// Shanan 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// RKNN 模型路径，例如 rknn:///path/yolov8n.rknn?side=640
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像，例如 image:///path/car.png
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径（stdout: / image:///out.png / json:///out.json），默认打印到终端
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 置信度阈值 (0.0 - 1.0)，覆盖模型 URL 中的设置
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,
  /// NMS IOU 阈值 (0.0 - 1.0)，覆盖模型 URL 中的设置
  #[arg(long, value_name = "THRESHOLD")]
  pub nms_threshold: Option<f32>,
  /// 重复推理次数
  #[arg(long, default_value_t = RepeatShotTask::DEFAULT_TIMES, value_name = "COUNT")]
  pub repeat: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("重复次数: {}", args.repeat);

  let mut config = Yolov8Config::from_url(&args.model)?;
  if let Some(confidence) = args.confidence {
    config = config.with_confidence_threshold(confidence);
  }
  if let Some(nms) = args.nms_threshold {
    config = config.with_nms_threshold(nms);
  }

  let input_image = ImageFileInput::from_url(&args.input)?;
  let engine = RknnEngineBuilder::from_url(&args.model)?
    .layout(config.layout)
    .build()?;
  let model: Yolov8<_, DynamicImage, CocoLabel> = Yolov8::new(engine, config)?;
  let output = match &args.output {
    Some(url) => OutputWrapper::from_url(url)?,
    None => OutputWrapper::default(),
  };

  RepeatShotTask::default()
    .with_times(args.repeat)
    .run_task(input_image, model, output)?;

  Ok(())
}
