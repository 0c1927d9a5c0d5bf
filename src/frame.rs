// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - 像素访问与 NCHW 输入张量
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

use image::{
  DynamicImage, GenericImageView, GrayImage, ImageBuffer, Rgb, RgbImage, RgbaImage,
  imageops::{self, FilterType},
};
use tracing::debug;

use crate::error::DetectError;

pub const RGB_CHANNELS: usize = 3;

/// 可按像素读取 RGB 的图像
///
/// 带透明通道的像素按预乘 alpha 返回，完全透明的像素读作黑色。
pub trait RgbPixels {
  /// (宽, 高)
  fn size(&self) -> (u32, u32);
  fn rgb(&self, x: u32, y: u32) -> [u8; 3];
}

fn premultiply(c: u8, a: u8) -> u8 {
  // 先扩展到 16 位再乘 alpha，最后取高 8 位
  ((c as u32 * 257 * a as u32 / 255) >> 8) as u8
}

impl RgbPixels for RgbImage {
  fn size(&self) -> (u32, u32) {
    self.dimensions()
  }

  fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
    self.get_pixel(x, y).0
  }
}

impl RgbPixels for RgbaImage {
  fn size(&self) -> (u32, u32) {
    self.dimensions()
  }

  fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
    let [r, g, b, a] = self.get_pixel(x, y).0;
    [premultiply(r, a), premultiply(g, a), premultiply(b, a)]
  }
}

impl RgbPixels for GrayImage {
  fn size(&self) -> (u32, u32) {
    self.dimensions()
  }

  fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
    let [v] = self.get_pixel(x, y).0;
    [v, v, v]
  }
}

impl RgbPixels for DynamicImage {
  fn size(&self) -> (u32, u32) {
    GenericImageView::dimensions(self)
  }

  fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
    let [r, g, b, a] = GenericImageView::get_pixel(self, x, y).0;
    [premultiply(r, a), premultiply(g, a), premultiply(b, a)]
  }
}

/// 将任意像素源复制为 RgbImage
pub fn to_rgb_image<P: RgbPixels + ?Sized>(pixels: &P) -> RgbImage {
  let (width, height) = pixels.size();
  ImageBuffer::from_fn(width, height, |x, y| Rgb(pixels.rgb(x, y)))
}

/// `[3, side, side]` 张量的元素个数，超出 `usize` 表示范围时为 None
pub fn nchw_len(side: u32) -> Option<usize> {
  let side = usize::try_from(side).ok()?;
  side.checked_mul(side)?.checked_mul(RGB_CHANNELS)
}

/// 将图像缩放到 `side x side` 并以 NCHW 排布写入 `dst`，取值范围 [0, 1]
///
/// 缩放为直接拉伸（不保持宽高比），使用 Lanczos3 滤波。
pub fn fill_nchw<P: RgbPixels + ?Sized>(
  pixels: &P,
  side: u32,
  dst: &mut [f32],
) -> Result<(), DetectError> {
  let Some(expected) = nchw_len(side) else {
    return Err(DetectError::invalid_image(format!("目标尺寸 {} 过大", side)));
  };
  let plane = expected / RGB_CHANNELS;
  if dst.len() < expected {
    return Err(DetectError::shape_mismatch(expected, dst.len()));
  }

  let (width, height) = pixels.size();
  if width == 0 || height == 0 {
    return Err(DetectError::invalid_image(format!(
      "图像尺寸为 {}x{}",
      width, height
    )));
  }
  if side == 0 {
    return Err(DetectError::invalid_image("目标尺寸为 0"));
  }

  let source = to_rgb_image(pixels);
  let resized = if (width, height) == (side, side) {
    source
  } else {
    debug!("缩放图像 {}x{} -> {}x{}", width, height, side, side);
    imageops::resize(&source, side, side, FilterType::Lanczos3)
  };

  let (red, rest) = dst.split_at_mut(plane);
  let (green, rest) = rest.split_at_mut(plane);
  let blue = &mut rest[..plane];

  for (i, pixel) in resized.pixels().enumerate() {
    red[i] = pixel[0] as f32 / 255.0;
    green[i] = pixel[1] as f32 / 255.0;
    blue[i] = pixel[2] as f32 / 255.0;
  }

  Ok(())
}

/// `[3, side, side]` 的浮点输入张量
#[derive(Debug, Clone)]
pub struct NchwTensor {
  side: u32,
  data: Box<[f32]>,
}

impl NchwTensor {
  pub fn with_side(side: u32) -> Result<Self, DetectError> {
    let size = nchw_len(side)
      .ok_or_else(|| DetectError::invalid_image(format!("目标尺寸 {} 过大", side)))?;
    Ok(Self {
      side,
      data: vec![0f32; size].into_boxed_slice(),
    })
  }

  pub fn from_pixels<P: RgbPixels + ?Sized>(pixels: &P, side: u32) -> Result<Self, DetectError> {
    let mut tensor = Self::with_side(side)?;
    fill_nchw(pixels, side, &mut tensor.data)?;
    Ok(tensor)
  }

  pub fn side(&self) -> u32 {
    self.side
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn shape(&self) -> [usize; 3] {
    [RGB_CHANNELS, self.side as usize, self.side as usize]
  }
}

impl AsRef<[f32]> for NchwTensor {
  fn as_ref(&self) -> &[f32] {
    &self.data
  }
}

impl AsMut<[f32]> for NchwTensor {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Luma, Rgba};

  #[test]
  fn test_fill_rejects_small_buffer() {
    let image = RgbImage::new(8, 8);
    let mut dst = vec![0f32; 3 * 4 * 4 - 1];
    match fill_nchw(&image, 4, &mut dst) {
      Err(DetectError::ShapeMismatch { expected, actual }) => {
        assert_eq!(expected, 48);
        assert_eq!(actual, 47);
      }
      other => panic!("unexpected result: {:?}", other),
    }
  }

  #[test]
  fn test_fill_rejects_empty_image() {
    let image = RgbImage::new(0, 5);
    let mut dst = vec![0f32; 3 * 4 * 4];
    assert!(matches!(
      fill_nchw(&image, 4, &mut dst),
      Err(DetectError::InvalidImage(_))
    ));
  }

  #[test]
  fn test_planar_layout_without_resize() {
    let mut image = RgbImage::new(2, 2);
    image.put_pixel(0, 0, Rgb([255, 0, 0]));
    image.put_pixel(1, 0, Rgb([0, 255, 0]));
    image.put_pixel(0, 1, Rgb([0, 0, 255]));
    image.put_pixel(1, 1, Rgb([51, 102, 153]));

    let tensor = NchwTensor::from_pixels(&image, 2).unwrap();
    let data = tensor.as_ref();
    assert_eq!(tensor.shape(), [3, 2, 2]);
    assert_eq!(&data[0..4], &[1.0, 0.0, 0.0, 0.2]);
    assert_eq!(&data[4..8], &[0.0, 1.0, 0.0, 0.4]);
    assert_eq!(&data[8..12], &[0.0, 0.0, 1.0, 0.6]);
  }

  #[test]
  fn test_resized_values_are_normalized() {
    let image = RgbImage::from_fn(37, 23, |x, y| {
      Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, ((x + y) * 13 % 256) as u8])
    });
    let tensor = NchwTensor::from_pixels(&image, 16).unwrap();
    assert_eq!(tensor.as_ref().len(), 3 * 16 * 16);
    assert!(tensor.as_ref().iter().all(|v| (0.0..=1.0).contains(v)));
  }

  #[test]
  fn test_uniform_image_stays_uniform() {
    let image = RgbImage::from_pixel(10, 30, Rgb([255, 128, 0]));
    let tensor = NchwTensor::from_pixels(&image, 8).unwrap();
    let plane = 8 * 8;
    let data = tensor.as_ref();
    assert!(data[..plane].iter().all(|v| (v - 1.0).abs() <= 1.0 / 255.0));
    assert!(data[plane..2 * plane].iter().all(|v| (v - 128.0 / 255.0).abs() <= 1.0 / 255.0));
    assert!(data[2 * plane..].iter().all(|v| v.abs() <= 1.0 / 255.0));
  }

  #[test]
  fn test_larger_buffer_is_accepted() {
    let image = RgbImage::from_pixel(3, 3, Rgb([255, 255, 255]));
    let mut dst = vec![-1f32; 3 * 9 + 5];
    fill_nchw(&image, 3, &mut dst).unwrap();
    assert!(dst[..27].iter().all(|v| *v == 1.0));
    assert!(dst[27..].iter().all(|v| *v == -1.0));
  }

  #[test]
  fn test_alpha_is_premultiplied() {
    let mut image = RgbaImage::new(2, 1);
    image.put_pixel(0, 0, Rgba([200, 100, 50, 255]));
    image.put_pixel(1, 0, Rgba([200, 100, 50, 0]));
    assert_eq!(image.rgb(0, 0), [200, 100, 50]);
    assert_eq!(image.rgb(1, 0), [0, 0, 0]);

    let dynamic = DynamicImage::ImageRgba8(image);
    assert_eq!(dynamic.rgb(0, 0), [200, 100, 50]);
    assert_eq!(dynamic.rgb(1, 0), [0, 0, 0]);
  }

  #[test]
  fn test_gray_expands_to_rgb() {
    let image = GrayImage::from_pixel(1, 1, Luma([77]));
    assert_eq!(image.rgb(0, 0), [77, 77, 77]);
    assert_eq!(to_rgb_image(&image).get_pixel(0, 0).0, [77, 77, 77]);
  }

  #[test]
  fn test_oversized_side_is_rejected() {
    assert_eq!(nchw_len(640), Some(3 * 640 * 640));
    assert_eq!(nchw_len(u32::MAX), None);
    assert!(matches!(
      NchwTensor::with_side(u32::MAX),
      Err(DetectError::InvalidImage(_))
    ));
    let image = RgbImage::new(4, 4);
    assert!(matches!(
      fill_nchw(&image, u32::MAX, &mut []),
      Err(DetectError::InvalidImage(_))
    ));
  }
}
