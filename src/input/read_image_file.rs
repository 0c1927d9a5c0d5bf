// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use image::{DynamicImage, GenericImageView, ImageReader};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, error::DetectError};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error(transparent)]
  Invalid(#[from] DetectError),
}

/// 从文件读取的单张图像，迭代一次后耗尽
pub struct ImageFileInput {
  image: Option<DynamicImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(url.path())
  }
}

impl ImageFileInput {
  /// 打开并解码图像文件（PNG / JPEG / GIF）
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Self::from_image(image).inspect(|input| {
      if let Some((w, h)) = input.dimensions() {
        info!("读取图像 {}: {}x{}", path.display(), w, h);
      }
    })
  }

  pub fn from_image(image: DynamicImage) -> Result<Self, ImageFileInputError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(DetectError::invalid_image(format!("图像尺寸为 {}x{}", width, height)).into());
    }
    Ok(ImageFileInput { image: Some(image) })
  }

  /// 图像尚未被取走时返回其尺寸
  pub fn dimensions(&self) -> Option<(u32, u32)> {
    self.image.as_ref().map(|image| image.dimensions())
  }
}

impl Iterator for ImageFileInput {
  type Item = DynamicImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}
