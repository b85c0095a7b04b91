// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 上传图像解码
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

use std::{io::Cursor, sync::Arc};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, warn};

use crate::handle::ImageHandle;

#[cfg(feature = "read_image_file")]
mod read_image_file;

#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("上传文件为空")]
  Empty,
  #[error("无法识别的图像格式")]
  UnknownFormat,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("图像尺寸为零: {width}x{height}")]
  ZeroSized { width: u32, height: u32 },
  #[error("解码任务中断: {0}")]
  Interrupted(#[from] tokio::task::JoinError),
}

/// 解码上传的文件，得到原始分辨率的 RGB 图像
pub fn decode_upload(source: impl Into<Arc<[u8]>>) -> Result<ImageHandle, DecodeError> {
  let source: Arc<[u8]> = source.into();
  if source.is_empty() {
    return Err(DecodeError::Empty);
  }

  let reader = ImageReader::new(Cursor::new(&source[..])).with_guessed_format()?;
  let Some(format) = reader.format() else {
    warn!("无法识别上传文件的图像格式 ({} 字节)", source.len());
    return Err(DecodeError::UnknownFormat);
  };

  let pixels = reader.decode()?.to_rgb8();
  let (width, height) = pixels.dimensions();
  if width == 0 || height == 0 {
    return Err(DecodeError::ZeroSized { width, height });
  }

  debug!("解码上传图像: {:?} {}x{}", format, width, height);
  Ok(ImageHandle::from_parts(source, pixels))
}

/// 在阻塞线程池中解码，调用方在此挂起而不阻塞调度线程
pub async fn decode_upload_async(source: Arc<[u8]>) -> Result<ImageHandle, DecodeError> {
  tokio::task::spawn_blocking(move || decode_upload(source)).await?
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use image::{ImageFormat, Rgb, RgbImage};

  /// 生成带渐变的测试图像并编码为指定格式
  pub(crate) fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
      Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut bytes = Vec::new();
    image
      .write_to(&mut Cursor::new(&mut bytes), format)
      .expect("encode test image");
    bytes
  }

  #[test]
  fn decodes_png_upload_at_natural_size() {
    let handle = decode_upload(encoded_image(800, 600, ImageFormat::Png)).unwrap();
    assert!(handle.is_loaded());
    assert_eq!(handle.natural().map(|d| (d.width, d.height)), Some((800, 600)));
  }

  #[test]
  fn decodes_jpeg_upload() {
    let handle = decode_upload(encoded_image(33, 17, ImageFormat::Jpeg)).unwrap();
    assert_eq!(handle.natural().map(|d| (d.width, d.height)), Some((33, 17)));
  }

  #[test]
  fn rejects_empty_and_unknown_uploads() {
    assert!(matches!(decode_upload(Vec::new()), Err(DecodeError::Empty)));
    assert!(matches!(
      decode_upload(b"definitely not an image".to_vec()),
      Err(DecodeError::UnknownFormat)
    ));
  }

  #[test]
  fn rejects_truncated_image() {
    let mut bytes = encoded_image(64, 64, ImageFormat::Png);
    bytes.truncate(bytes.len() / 2);
    assert!(matches!(
      decode_upload(bytes),
      Err(DecodeError::ImageError(_))
    ));
  }

  #[tokio::test]
  async fn decodes_off_the_scheduler_thread() {
    let source: Arc<[u8]> = encoded_image(10, 20, ImageFormat::Png).into();
    let handle = decode_upload_async(source).await.unwrap();
    assert_eq!(handle.natural().map(|d| (d.width, d.height)), Some((10, 20)));
  }
}
