// 该文件是 Shanan （山南西风） 项目的一部分。
// src/geometry.rs - 原始像素坐标与显示坐标映射
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

use std::{fmt, str::FromStr};

use serde::Deserialize;
use thiserror::Error;

/// 图像尺寸（像素）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
  pub width: u32,
  pub height: u32,
}

impl Dimensions {
  pub const fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  /// 任一边为 0 即视为空
  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }
}

impl fmt::Display for Dimensions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseDimensionsError {
  #[error("尺寸格式应为 <宽>x<高>, 实际为 '{0}'")]
  Format(String),
  #[error("无效的尺寸数值: {0}")]
  Number(#[from] std::num::ParseIntError),
}

impl FromStr for Dimensions {
  type Err = ParseDimensionsError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (width, height) = s
      .split_once(['x', 'X'])
      .ok_or_else(|| ParseDimensionsError::Format(s.to_string()))?;
    Ok(Self::new(width.trim().parse()?, height.trim().parse()?))
  }
}

/// 检测后端返回的目标框
///
/// `bbox` 为原始像素坐标 `[x_min, y_min, x_max, y_max]`，对应接口中的 `box` 字段。
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectionBox {
  pub label: String,
  pub score: f32,
  #[serde(rename = "box")]
  pub bbox: [f32; 4],
}

impl DetectionBox {
  pub fn new(label: impl Into<String>, score: f32, bbox: [f32; 4]) -> Self {
    Self {
      label: label.into(),
      score,
      bbox,
    }
  }

  pub fn width(&self) -> f32 {
    self.bbox[2] - self.bbox[0]
  }

  pub fn height(&self) -> f32 {
    self.bbox[3] - self.bbox[1]
  }
}

/// 相对原始尺寸的归一化区域，各分量取值 [0, 1]
///
/// 只用于叠加层定位，每次渲染时重新计算，不作为数据源保存。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NormalizedRegion {
  pub left: f32,
  pub top: f32,
  pub width: f32,
  pub height: f32,
}

impl NormalizedRegion {
  pub const EMPTY: Self = Self {
    left: 0.0,
    top: 0.0,
    width: 0.0,
    height: 0.0,
  };

  /// 百分比形式 `[left%, top%, width%, height%]`
  pub fn as_percent(&self) -> [f32; 4] {
    [
      self.left * 100.0,
      self.top * 100.0,
      self.width * 100.0,
      self.height * 100.0,
    ]
  }

  /// 换算为显示尺寸下的像素矩形 `[x_min, y_min, x_max, y_max]`
  pub fn to_rendered(&self, rendered: Dimensions) -> [f32; 4] {
    let (w, h) = (rendered.width as f32, rendered.height as f32);
    [
      self.left * w,
      self.top * h,
      (self.left + self.width) * w,
      (self.top + self.height) * h,
    ]
  }
}

// NaN 视为 0，无穷大交给 clamp 处理
fn finite_or_zero(v: f32) -> f32 {
  if v.is_nan() { 0.0 } else { v }
}

/// 将目标框裁剪到 `[0, W] × [0, H]` 范围内，并保证 `x_min <= x_max`、`y_min <= y_max`
pub fn clamp_box(bbox: &[f32; 4], natural: Dimensions) -> [f32; 4] {
  let (w, h) = (natural.width as f32, natural.height as f32);
  let x1 = finite_or_zero(bbox[0]).clamp(0.0, w);
  let y1 = finite_or_zero(bbox[1]).clamp(0.0, h);
  let x2 = finite_or_zero(bbox[2]).clamp(0.0, w);
  let y2 = finite_or_zero(bbox[3]).clamp(0.0, h);
  [x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)]
}

/// 原始像素坐标转换为归一化区域
pub fn to_normalized(bbox: &[f32; 4], natural: Dimensions) -> NormalizedRegion {
  if natural.is_empty() {
    return NormalizedRegion::EMPTY;
  }

  let (w, h) = (natural.width as f32, natural.height as f32);
  let [x1, y1, x2, y2] = clamp_box(bbox, natural);
  let left = x1 / w;
  let top = y1 / h;

  NormalizedRegion {
    left,
    top,
    width: ((x2 - x1) / w).min(1.0 - left),
    height: ((y2 - y1) / h).min(1.0 - top),
  }
}

/// 显示坐标到原始坐标的缩放系数 `(sx, sy)`
///
/// 显示尺寸为 0 时返回 1.0。
pub fn scale_factor(natural: Dimensions, rendered: Dimensions) -> (f32, f32) {
  let axis = |natural: u32, rendered: u32| {
    if rendered == 0 {
      1.0
    } else {
      natural as f32 / rendered as f32
    }
  };
  (
    axis(natural.width, rendered.width),
    axis(natural.height, rendered.height),
  )
}

/// 将显示坐标下绘制的矩形换算回原始像素坐标，结果已裁剪到图像范围内
pub fn rendered_to_natural(rect: &[f32; 4], natural: Dimensions, rendered: Dimensions) -> [f32; 4] {
  let (sx, sy) = scale_factor(natural, rendered);
  let scaled = [rect[0] * sx, rect[1] * sy, rect[2] * sx, rect[3] * sy];
  clamp_box(&scaled, natural)
}
