// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/overlay_image.rs - 保存带目标框叠加层的预览图
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

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  geometry::Dimensions,
  handle::ImageHandle,
  output::Render,
  session::{OverlayRegion, SessionView},
};

const BOX_COLOR: [u8; 3] = [239, 68, 68]; // 红色
const SELECTED_COLOR: [u8; 3] = [59, 130, 246]; // 蓝色
const DEFAULT_THICKNESS: u32 = 2;

#[derive(Error, Debug)]
pub enum OverlayImageError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效的线宽: {0}")]
  InvalidThickness(String),
  #[error("图像尚未加载完成")]
  NotLoaded,
}

/// 将叠加层画到原始分辨率图像上并保存
///
/// 地址形如 `image:///tmp/overlay.png?thickness=3`。
pub struct OverlayImageOutput {
  path: PathBuf,
  thickness: u32,
}

impl FromUrlWithScheme for OverlayImageOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for OverlayImageOutput {
  type Error = OverlayImageError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(OverlayImageError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let mut thickness = DEFAULT_THICKNESS;
    for (k, v) in uri.query_pairs() {
      if k == "thickness" {
        thickness = v
          .parse::<u32>()
          .ok()
          .filter(|t| *t > 0)
          .ok_or_else(|| OverlayImageError::InvalidThickness(v.to_string()))?;
      }
    }

    Ok(OverlayImageOutput {
      path: PathBuf::from(uri.path()),
      thickness,
    })
  }
}

impl OverlayImageOutput {
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 在原始尺寸图像上绘制所有区域，选中的区域使用另一种颜色
  pub fn draw(&self, pixels: &RgbImage, view: &SessionView) -> RgbImage {
    let mut image = pixels.clone();
    let natural = Dimensions::new(image.width(), image.height());

    for OverlayRegion { index, region, .. } in &view.regions {
      let color = if view.selected == Some(*index) {
        SELECTED_COLOR
      } else {
        BOX_COLOR
      };

      let [x1, y1, x2, y2] = region.to_rendered(natural);
      let (x, y) = (x1.round() as i32, y1.round() as i32);
      let (w, h) = ((x2 - x1).round() as u32, (y2 - y1).round() as u32);

      // 由外向内逐圈加粗
      for t in 0..self.thickness {
        let (tw, th) = (w.saturating_sub(2 * t), h.saturating_sub(2 * t));
        if tw == 0 || th == 0 {
          break;
        }
        let rect = Rect::at(x + t as i32, y + t as i32).of_size(tw, th);
        draw_hollow_rect_mut(&mut image, rect, Rgb(color));
      }
    }

    image
  }

  fn save_image(&self, image: RgbImage) -> Result<(), OverlayImageError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    warn!("保存叠加层预览到文件: {}", self.path.display());
    Ok(())
  }
}

impl Render<ImageHandle, SessionView> for OverlayImageOutput {
  type Error = OverlayImageError;

  fn render_result(&self, frame: &ImageHandle, result: &SessionView) -> Result<(), Self::Error> {
    let pixels = frame.pixels().ok_or(OverlayImageError::NotLoaded)?;
    let image = self.draw(pixels, result);
    self.save_image(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::{DetectionBox, to_normalized};
  use crate::session::Phase;

  fn view_with(boxes: &[DetectionBox], natural: Dimensions, selected: Option<usize>) -> SessionView {
    SessionView {
      phase: Phase::Ready,
      natural: Some(natural),
      rendered: Some(natural),
      regions: boxes
        .iter()
        .enumerate()
        .map(|(index, det)| OverlayRegion {
          index,
          label: det.label.clone(),
          score: det.score,
          region: to_normalized(&det.bbox, natural),
        })
        .collect(),
      selected,
      ..Default::default()
    }
  }

  #[test]
  fn parses_output_url() {
    let output =
      OverlayImageOutput::from_url(&Url::parse("image:///tmp/shanan/overlay.png?thickness=4").unwrap())
        .unwrap();
    assert_eq!(output.path(), Path::new("/tmp/shanan/overlay.png"));
    assert_eq!(output.thickness, 4);

    assert!(matches!(
      OverlayImageOutput::from_url(&Url::parse("folder:///tmp").unwrap()),
      Err(OverlayImageError::SchemeMismatch(_))
    ));
    assert!(matches!(
      OverlayImageOutput::from_url(&Url::parse("image:///tmp/a.png?thickness=0").unwrap()),
      Err(OverlayImageError::InvalidThickness(_))
    ));
  }

  #[test]
  fn draws_box_edges_at_natural_positions() {
    let natural = Dimensions::new(100, 80);
    let pixels = RgbImage::new(natural.width, natural.height);
    let boxes = [
      DetectionBox::new("a", 0.9, [10.0, 10.0, 50.0, 40.0]),
      DetectionBox::new("b", 0.7, [60.0, 20.0, 90.0, 70.0]),
    ];
    let output = OverlayImageOutput {
      path: PathBuf::from("unused.png"),
      thickness: 1,
    };

    let image = output.draw(&pixels, &view_with(&boxes, natural, Some(1)));
    assert_eq!(*image.get_pixel(10, 10), Rgb(BOX_COLOR));
    assert_eq!(*image.get_pixel(30, 10), Rgb(BOX_COLOR));
    assert_eq!(*image.get_pixel(30, 25), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(60, 20), Rgb(SELECTED_COLOR));
  }

  #[test]
  fn saves_preview_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("overlay.png");
    let output =
      OverlayImageOutput::from_url(&Url::parse(&format!("image://{}", path.display())).unwrap())
        .unwrap();

    let natural = Dimensions::new(32, 24);
    let handle = ImageHandle::from_parts(Vec::<u8>::new(), RgbImage::new(natural.width, natural.height));
    let boxes = [DetectionBox::new("a", 0.9, [4.0, 4.0, 20.0, 20.0])];
    output
      .render_result(&handle, &view_with(&boxes, natural, None))
      .unwrap();

    let saved = image::open(&path).unwrap();
    assert_eq!((saved.width(), saved.height()), (32, 24));
  }

  #[test]
  fn pending_image_cannot_be_rendered() {
    let output = OverlayImageOutput {
      path: PathBuf::from("unused.png"),
      thickness: 1,
    };
    let handle = ImageHandle::pending(vec![0u8; 8]);
    assert!(matches!(
      output.render_result(&handle, &SessionView::default()),
      Err(OverlayImageError::NotLoaded)
    ));
  }
}
