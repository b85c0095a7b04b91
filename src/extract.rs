// 该文件是 Shanan （山南西风） 项目的一部分。
// src/extract.rs - 目标区域裁剪与编码
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

use std::sync::Arc;

use image::{RgbImage, codecs::jpeg::JpegEncoder, imageops};
use thiserror::Error;
use tracing::debug;

use crate::{
  geometry::{Dimensions, clamp_box},
  handle::ImageHandle,
};

pub const DEFAULT_JPEG_QUALITY: u8 = 92;

#[derive(Error, Debug)]
pub enum ExtractionError {
  #[error("图像尚未加载完成")]
  NotLoaded,
  #[error("裁剪区域为空: {width}x{height}")]
  EmptyRegion { width: u32, height: u32 },
  #[error("图像编码错误: {0}")]
  EncodeError(#[from] image::ImageError),
  #[error("裁剪任务中断: {0}")]
  Interrupted(#[from] tokio::task::JoinError),
}

/// 单次检索请求使用的裁剪结果
#[derive(Debug, Clone)]
pub struct CroppedArtifact {
  pub bytes: Vec<u8>,
  pub width: u32,
  pub height: u32,
}

impl CroppedArtifact {
  pub fn dimensions(&self) -> Dimensions {
    Dimensions::new(self.width, self.height)
  }
}

/// 原始像素下的裁剪矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

impl CropRect {
  /// 裁剪后取整：左上角向下取整，宽高取 `x2 - x1`、`y2 - y1` 的整数部分
  ///
  /// 宽或高不足一个像素的区域视为空区域。
  pub fn from_box(bbox: &[f32; 4], natural: Dimensions) -> Result<Self, ExtractionError> {
    let [x1, y1, x2, y2] = clamp_box(bbox, natural);
    let x = x1.floor() as u32;
    let y = y1.floor() as u32;
    let width = ((x2 - x1) as u32).min(natural.width.saturating_sub(x));
    let height = ((y2 - y1) as u32).min(natural.height.saturating_sub(y));

    if width == 0 || height == 0 {
      return Err(ExtractionError::EmptyRegion { width, height });
    }

    Ok(Self {
      x,
      y,
      width,
      height,
    })
  }
}

#[derive(Debug, Clone, Copy)]
pub struct RegionExtractor {
  quality: u8,
}

impl Default for RegionExtractor {
  fn default() -> Self {
    Self {
      quality: DEFAULT_JPEG_QUALITY,
    }
  }
}

impl RegionExtractor {
  pub fn with_quality(mut self, quality: u8) -> Self {
    self.quality = quality.clamp(1, 100);
    self
  }

  pub fn quality(&self) -> u8 {
    self.quality
  }

  /// 从原始分辨率图像中裁剪出目标框并编码为 JPEG
  ///
  /// 源矩形和输出尺寸都使用原始像素坐标，与当前显示尺寸无关。
  pub async fn extract(
    &self,
    handle: &ImageHandle,
    bbox: &[f32; 4],
  ) -> Result<CroppedArtifact, ExtractionError> {
    let pixels = handle.pixels().cloned().ok_or(ExtractionError::NotLoaded)?;
    let natural = Dimensions::new(pixels.width(), pixels.height());
    if natural.is_empty() {
      return Err(ExtractionError::NotLoaded);
    }

    let rect = CropRect::from_box(bbox, natural)?;
    debug!(
      "裁剪区域 ({}, {}) {}x{}, 原始尺寸 {}",
      rect.x, rect.y, rect.width, rect.height, natural
    );

    let quality = self.quality;
    tokio::task::spawn_blocking(move || encode_region(&pixels, rect, quality)).await?
  }
}

fn encode_region(
  pixels: &Arc<RgbImage>,
  rect: CropRect,
  quality: u8,
) -> Result<CroppedArtifact, ExtractionError> {
  let region = imageops::crop_imm(&**pixels, rect.x, rect.y, rect.width, rect.height).to_image();

  let mut bytes = Vec::new();
  JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(&region)?;

  Ok(CroppedArtifact {
    bytes,
    width: region.width(),
    height: region.height(),
  })
}
