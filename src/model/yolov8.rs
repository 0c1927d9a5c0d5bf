// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 检测流程
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::marker::PhantomData;

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl,
  error::DetectError,
  frame::{NchwTensor, RgbPixels, nchw_len},
  model::{
    DetectResult, InferenceEngine, Model, WithLabel,
    postprocess::{OutputLayout, postprocess},
  },
};

const YOLOV8_INPUT_SIDE: u32 = 640;
const YOLOV8_CLASS_NUM: usize = 80;
const YOLOV8_ANCHOR_NUM: usize = 8400;
const YOLOV8_OBJECT_THRESH: f32 = 0.5;
const YOLOV8_NMS_THRESH: f32 = 0.7;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("阈值 {name} 无效: {value}，应在 0.0 - 1.0 之间")]
  InvalidThreshold { name: &'static str, value: f32 },
  #[error("尺寸 {0} 不能为 0")]
  ZeroSize(&'static str),
  #[error("无法解析参数 {key}={value}")]
  InvalidParam { key: String, value: String },
  #[error("{0} 张量尺寸超出范围")]
  TooLarge(&'static str),
}

/// YOLOv8 模型配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Yolov8Config {
  pub layout: OutputLayout,
  pub confidence_threshold: f32,
  pub nms_threshold: f32,
}

impl Default for Yolov8Config {
  fn default() -> Self {
    Self {
      layout: OutputLayout {
        input_side: YOLOV8_INPUT_SIDE,
        num_classes: YOLOV8_CLASS_NUM,
        num_anchors: YOLOV8_ANCHOR_NUM,
      },
      confidence_threshold: YOLOV8_OBJECT_THRESH,
      nms_threshold: YOLOV8_NMS_THRESH,
    }
  }
}

impl Yolov8Config {
  pub fn with_input_side(mut self, side: u32) -> Self {
    self.layout.input_side = side;
    self
  }

  pub fn with_num_classes(mut self, num_classes: usize) -> Self {
    self.layout.num_classes = num_classes;
    self
  }

  pub fn with_num_anchors(mut self, num_anchors: usize) -> Self {
    self.layout.num_anchors = num_anchors;
    self
  }

  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_nms_threshold(mut self, threshold: f32) -> Self {
    self.nms_threshold = threshold;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    for (name, value) in [
      ("confidence", self.confidence_threshold),
      ("nms", self.nms_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidThreshold { name, value });
      }
    }
    if self.layout.input_side == 0 {
      return Err(ConfigError::ZeroSize("side"));
    }
    if self.layout.num_classes == 0 {
      return Err(ConfigError::ZeroSize("classes"));
    }
    if self.layout.num_anchors == 0 {
      return Err(ConfigError::ZeroSize("anchors"));
    }
    if nchw_len(self.layout.input_side).is_none() {
      return Err(ConfigError::TooLarge("input"));
    }
    if self.layout.checked_len().is_none() {
      return Err(ConfigError::TooLarge("output"));
    }
    Ok(())
  }

  /// 输入张量元素个数，溢出时为 `usize::MAX`
  pub fn input_len(&self) -> usize {
    nchw_len(self.layout.input_side).unwrap_or(usize::MAX)
  }
}

fn parse_param<V: std::str::FromStr>(key: &str, value: &str) -> Result<V, ConfigError> {
  value.parse().map_err(|_| ConfigError::InvalidParam {
    key: key.to_string(),
    value: value.to_string(),
  })
}

/// 从模型 URL 的查询参数读取配置，
/// 例如 `rknn:///model.rknn?side=640&classes=80&anchors=8400&confidence=0.5&nms=0.7`
impl FromUrl for Yolov8Config {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let mut config = Yolov8Config::default();
    for (k, v) in url.query_pairs() {
      match &*k {
        "side" => config.layout.input_side = parse_param(&k, &v)?,
        "classes" => config.layout.num_classes = parse_param(&k, &v)?,
        "anchors" => config.layout.num_anchors = parse_param(&k, &v)?,
        "confidence" => config.confidence_threshold = parse_param(&k, &v)?,
        "nms" => config.nms_threshold = parse_param(&k, &v)?,
        _ => debug!("忽略未知参数: {}={}", k, v),
      }
    }
    config.validate()?;
    Ok(config)
  }
}

/// YOLOv8 检测模型：预处理 -> 推理引擎 -> 解码与非极大值抑制
pub struct Yolov8<E, Frame, T> {
  engine: E,
  config: Yolov8Config,
  _phantom: PhantomData<(fn(&Frame), T)>,
}

impl<E: InferenceEngine, Frame, T> Yolov8<E, Frame, T> {
  pub fn new(engine: E, config: Yolov8Config) -> Result<Self, ConfigError> {
    config.validate()?;
    info!(
      "YOLOv8 配置: 输入 {}x{}, 类别 {}, 锚点 {}, 置信度阈值 {}, NMS 阈值 {}",
      config.layout.input_side,
      config.layout.input_side,
      config.layout.num_classes,
      config.layout.num_anchors,
      config.confidence_threshold,
      config.nms_threshold
    );
    Ok(Self {
      engine,
      config,
      _phantom: PhantomData,
    })
  }

  pub fn config(&self) -> &Yolov8Config {
    &self.config
  }

  pub fn engine(&self) -> &E {
    &self.engine
  }
}

impl<E: InferenceEngine, Frame: RgbPixels, T: WithLabel> Model for Yolov8<E, Frame, T> {
  type Input = Frame;
  type Output = DetectResult<T>;
  type Error = DetectError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let original_size = input.size();

    debug!("预处理输入图像 {}x{}", original_size.0, original_size.1);
    let tensor = NchwTensor::from_pixels(input, self.config.layout.input_side)?;

    debug!("执行模型推理");
    let output = self.engine.run(tensor.as_ref()).map_err(|e| {
      error!("推理失败: {}", e);
      DetectError::inference(e)
    })?;
    debug!("模型输出 {} 个元素", output.len());

    debug!("后处理模型输出");
    postprocess(
      &output,
      &self.config.layout,
      self.config.confidence_threshold,
      self.config.nms_threshold,
      original_size,
    )
  }
}
