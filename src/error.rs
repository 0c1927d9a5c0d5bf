// 该文件是 Shanan （山南西风） 项目的一部分。
// src/error.rs - 预处理与后处理错误
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

#[derive(Error, Debug)]
pub enum DetectError {
  /// 缓冲区长度小于算法需要的长度
  #[error("张量形状不匹配: 期望至少 {expected} 个元素, 实际 {actual} 个")]
  ShapeMismatch { expected: usize, actual: usize },
  /// 图像无法使用（尺寸为零等）
  #[error("图像无效: {0}")]
  InvalidImage(String),
  /// 推理引擎返回的错误
  #[error("推理错误: {0}")]
  Inference(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DetectError {
  pub fn shape_mismatch(expected: usize, actual: usize) -> Self {
    DetectError::ShapeMismatch { expected, actual }
  }

  pub fn invalid_image(msg: impl Into<String>) -> Self {
    DetectError::InvalidImage(msg.into())
  }

  pub fn inference<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    DetectError::Inference(Box::new(err))
  }
}
