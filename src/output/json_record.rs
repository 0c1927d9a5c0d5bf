// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/json_record.rs - 以 JSON 记录检测结果
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectResult, WithLabel},
  output::Render,
};

#[derive(Error, Debug)]
pub enum JsonRecordError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

pub struct JsonRecordOutput {
  path: PathBuf,
}

impl FromUrlWithScheme for JsonRecordOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonRecordOutput {
  type Error = JsonRecordError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonRecordError::SchemeMismatch);
    }
    Ok(JsonRecordOutput::new(uri.path()))
  }
}

/// 检测结果的 JSON 表示
pub fn to_json<T: WithLabel>(result: &DetectResult<T>) -> Value {
  Value::Array(
    result
      .iter()
      .map(|item| {
        json!({
          "label": item.kind.to_label_str(),
          "class_id": item.kind.to_label_id(),
          "confidence": item.score,
          "bbox": item.bbox,
        })
      })
      .collect(),
  )
}

impl JsonRecordOutput {
  pub fn new<P: AsRef<Path>>(path: P) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
    }
  }
}

impl<F, T: WithLabel> Render<F, DetectResult<T>> for JsonRecordOutput {
  type Error = JsonRecordError;

  fn render_result(&self, _frame: &F, result: &DetectResult<T>) -> Result<(), Self::Error> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(&to_json(result))?;
    std::fs::write(&self.path, text)?;
    info!("记录 {} 个检测结果到 {}", result.len(), self.path.display());
    Ok(())
  }
}
