// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/rknn.rs - RKNN 推理引擎
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::nchw_len,
  model::{ConfigError, InferenceEngine, Yolov8Config, postprocess::OutputLayout},
};

const RKNN_NUM_INPUTS: u32 = 1;
const RKNN_NUM_OUTPUTS: u32 = 1;

#[derive(Error, Debug)]
pub enum RknnEngineError {
  #[error("模型加载错误: {0}")]
  ModelLoad(#[from] std::io::Error),
  #[error("模型无效: {what}, 错误: {source}")]
  ModelInvalid {
    what: String,
    #[source]
    source: rknpu::Error,
  },
  #[error("RKNN 错误: {0}")]
  Rknn(#[from] rknpu::Error),
  #[error("模型路径必须使用 {expected} 方案，实际为 {actual}")]
  SchemeMismatch { expected: &'static str, actual: String },
  #[error("模型参数错误: {0}")]
  Config(#[from] ConfigError),
  #[error("输入张量长度应为 {expected}，实际为 {actual}")]
  InputShape { expected: usize, actual: usize },
  #[error("输出张量长度至少为 {expected}，实际为 {actual}")]
  OutputShape { expected: usize, actual: usize },
}

impl RknnEngineError {
  pub fn invalid(what: impl Into<String>, source: rknpu::Error) -> Self {
    RknnEngineError::ModelInvalid {
      what: what.into(),
      source,
    }
  }
}

/// 单输入、单输出的 RKNN 模型，输入输出按 `OutputLayout` 校验长度
pub struct RknnEngine {
  context: Context,
  input_len: usize,
  output_len: usize,
}

impl RknnEngine {
  pub fn input_len(&self) -> usize {
    self.input_len
  }

  pub fn output_len(&self) -> usize {
    self.output_len
  }
}

pub struct RknnEngineBuilder {
  model_path: String,
  flags: InitFlags,
  layout: OutputLayout,
}

impl FromUrlWithScheme for RknnEngineBuilder {
  const SCHEME: &'static str = "rknn";
}

/// `rknn:///path/model.rknn?side=640&classes=80&anchors=8400`，
/// 查询参数与 `Yolov8Config` 相同
impl FromUrl for RknnEngineBuilder {
  type Error = RknnEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnEngineError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }
    let config = Yolov8Config::from_url(url)?;

    Ok(RknnEngineBuilder {
      model_path: url.path().to_string(),
      flags: InitFlags::default(),
      layout: config.layout,
    })
  }
}

impl RknnEngineBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  /// 覆盖期望的张量布局，应与 `Yolov8Config::layout` 一致
  pub fn layout(mut self, layout: OutputLayout) -> Self {
    self.layout = layout;
    self
  }

  pub fn model_path(&self) -> &str {
    &self.model_path
  }

  fn tensor_lens(&self) -> Result<(usize, usize), RknnEngineError> {
    let input_len = nchw_len(self.layout.input_side).ok_or(ConfigError::TooLarge("input"))?;
    let output_len = self.layout.checked_len().ok_or(ConfigError::TooLarge("output"))?;
    Ok((input_len, output_len))
  }

  pub fn build(self) -> Result<RknnEngine, RknnEngineError> {
    let (input_len, output_len) = self.tensor_lens()?;

    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    let context = Context::new(&model_data, self.flags)?;
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
        return Err(RknnEngineError::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknnEngineError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknnEngineError::invalid("无法获取输出数量", e))?;
    for (what, expected, actual) in [
      ("输入", RKNN_NUM_INPUTS, num_inputs),
      ("输出", RKNN_NUM_OUTPUTS, num_outputs),
    ] {
      if expected != actual {
        let msg = format!("预期模型{}数量为 {}, 实际为 {}", what, expected, actual);
        error!("{}", msg);
        return Err(RknnEngineError::invalid(msg, rknpu::Error::InvalidModel));
      }
    }

    info!(
      "模型加载完成: 输入 [3, {side}, {side}], 输出 [{}, {}]",
      self.layout.rows(),
      self.layout.num_anchors,
      side = self.layout.input_side
    );
    Ok(RknnEngine {
      context,
      input_len,
      output_len,
    })
  }
}

impl InferenceEngine for RknnEngine {
  type Error = RknnEngineError;

  fn run(&self, input: &[f32]) -> Result<Vec<f32>, Self::Error> {
    if input.len() != self.input_len {
      return Err(RknnEngineError::InputShape {
        expected: self.input_len,
        actual: input.len(),
      });
    }
    let bytes: Vec<u8> = input.iter().flat_map(|v| v.to_ne_bytes()).collect();

    debug!("设置模型输入 ({} 字节)", bytes.len());
    self
      .context
      .set_input(0, &bytes, TensorFormat::NCHW, TensorType::Float32)?;

    self.context.run()?;

    let output = self.context.get_outputs()?;
    let data = output.get_f32(0)?;
    if data.len() < self.output_len {
      error!("模型输出 {} 个元素，少于 {}", data.len(), self.output_len);
      return Err(RknnEngineError::OutputShape {
        expected: self.output_len,
        actual: data.len(),
      });
    }
    Ok(data.to_vec())
  }
}
