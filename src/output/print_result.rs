// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/print_result.rs - 在终端打印检测结果
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::convert::Infallible;

use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectResult, WithLabel},
  output::{OutputError, Render},
};

/// 每行一个检测框
pub fn format_detections<T: WithLabel>(result: &DetectResult<T>) -> Vec<String> {
  result
    .iter()
    .enumerate()
    .map(|(i, item)| format!("Box {}: {}", i, item))
    .collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PrintOutput;

impl FromUrlWithScheme for PrintOutput {
  const SCHEME: &'static str = "stdout";
}

impl FromUrl for PrintOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(PrintOutput)
  }
}

impl<F, T: WithLabel> Render<F, DetectResult<T>> for PrintOutput {
  type Error = Infallible;

  fn render_result(&self, _frame: &F, result: &DetectResult<T>) -> Result<(), Self::Error> {
    for line in format_detections(result) {
      println!("{}", line);
    }
    Ok(())
  }
}
