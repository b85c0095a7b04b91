// 该文件是 Shanan （山南西风） 项目的一部分。
// src/handle.rs - 已上传图像句柄
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

use image::RgbImage;

use crate::geometry::Dimensions;

/// 当前加载的源图像
///
/// 原始尺寸由解码后的像素决定，在一次上传的生命周期内不变；
/// 显示尺寸随布局变化，可随时更新。
#[derive(Debug, Clone)]
pub struct ImageHandle {
  /// 上传的原始文件字节
  source: Arc<[u8]>,
  /// 原始分辨率像素，解码完成前为空
  pixels: Option<Arc<RgbImage>>,
  /// 当前显示尺寸
  rendered: Option<Dimensions>,
}

impl ImageHandle {
  /// 尚未解码的句柄
  pub fn pending(source: impl Into<Arc<[u8]>>) -> Self {
    Self {
      source: source.into(),
      pixels: None,
      rendered: None,
    }
  }

  pub fn from_parts(source: impl Into<Arc<[u8]>>, pixels: RgbImage) -> Self {
    Self {
      source: source.into(),
      pixels: Some(Arc::new(pixels)),
      rendered: None,
    }
  }

  pub fn source(&self) -> &[u8] {
    &self.source
  }

  pub fn pixels(&self) -> Option<&Arc<RgbImage>> {
    self.pixels.as_ref()
  }

  pub fn is_loaded(&self) -> bool {
    self.natural().is_some_and(|dims| !dims.is_empty())
  }

  /// 原始尺寸，每次都从像素读取
  pub fn natural(&self) -> Option<Dimensions> {
    self
      .pixels
      .as_ref()
      .map(|pixels| Dimensions::new(pixels.width(), pixels.height()))
  }

  /// 当前显示尺寸，未设置时退化为原始尺寸
  pub fn rendered(&self) -> Option<Dimensions> {
    self.rendered.or_else(|| self.natural())
  }

  pub fn set_rendered(&mut self, rendered: Dimensions) {
    self.rendered = Some(rendered);
  }

  /// 沿用另一个句柄上显式设置过的显示尺寸
  pub(crate) fn inherit_rendered(&mut self, other: &ImageHandle) {
    if let Some(rendered) = other.rendered {
      self.rendered = Some(rendered);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pending_handle_has_no_dimensions() {
    let handle = ImageHandle::pending(vec![1u8, 2, 3]);
    assert!(!handle.is_loaded());
    assert_eq!(handle.natural(), None);
    assert_eq!(handle.rendered(), None);
    assert_eq!(handle.source(), &[1, 2, 3]);
  }

  #[test]
  fn rendered_size_changes_but_natural_does_not() {
    let mut handle = ImageHandle::from_parts(Vec::new(), RgbImage::new(800, 600));
    assert_eq!(handle.rendered(), Some(Dimensions::new(800, 600)));

    handle.set_rendered(Dimensions::new(400, 300));
    assert_eq!(handle.rendered(), Some(Dimensions::new(400, 300)));
    handle.set_rendered(Dimensions::new(1200, 900));
    assert_eq!(handle.rendered(), Some(Dimensions::new(1200, 900)));
    assert_eq!(handle.natural(), Some(Dimensions::new(800, 600)));
  }

  #[test]
  fn decoded_handle_keeps_display_size_of_pending_one() {
    let mut pending = ImageHandle::pending(Vec::new());
    pending.set_rendered(Dimensions::new(320, 240));

    let mut decoded = ImageHandle::from_parts(Vec::new(), RgbImage::new(64, 48));
    decoded.inherit_rendered(&pending);
    assert_eq!(decoded.rendered(), Some(Dimensions::new(320, 240)));
  }
}
