// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/simple_search.rs - 检测、裁剪与检索测试代码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::Parser;
use url::Url;

use shanan_search::{
  FromUrl,
  controller::{Outcome, SessionController},
  gateway::{DEFAULT_BACKEND, HttpGateway},
  geometry::Dimensions,
  input::ImageFileInput,
  session::{SessionMode, SessionView},
};
use tracing::{info, warn};

/// 以图搜物参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测与检索服务地址
  #[arg(long, value_name = "BACKEND", default_value = DEFAULT_BACKEND)]
  pub backend: Url,
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 模拟的显示尺寸，例如 400x300
  #[arg(long, value_name = "WxH")]
  pub display: Option<Dimensions>,
  /// 检索第几个检测框
  #[arg(long, value_name = "INDEX", conflicts_with = "whole")]
  pub region: Option<usize>,
  /// 跳过检测，直接检索整张图像
  #[arg(long)]
  pub whole: bool,
  /// 叠加层预览输出路径
  #[cfg(feature = "overlay_preview")]
  #[arg(long, value_name = "OUTPUT")]
  pub overlay: Option<Url>,
}

fn report(view: &SessionView) {
  for region in &view.regions {
    let [left, top, width, height] = region.region.as_percent();
    info!(
      "#{} {} ({:.2}) 位置 {:.1}% {:.1}% 大小 {:.1}% x {:.1}%",
      region.index, region.label, region.score, left, top, width, height
    );
  }
  for (rank, item) in view.matches.iter().enumerate() {
    info!(
      "{}. {} ¥{:.2} {}",
      rank + 1,
      item.metadata.name,
      item.metadata.price,
      item.metadata.image_url
    );
  }
  if let Some(message) = &view.message {
    warn!("{}", message);
  }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("后端地址: {}", args.backend);
  info!("输入来源: {}", args.input);

  let gateway = HttpGateway::from_url(&args.backend)?;
  let mode = if args.whole {
    SessionMode::WholeImage
  } else {
    SessionMode::DetectThenCrop
  };
  let controller = SessionController::new(gateway).with_mode(mode);

  let input = ImageFileInput::from_url(&args.input)?;

  let now = std::time::Instant::now();
  let mut view = match controller.load_image(input.into_bytes()).await {
    Outcome::Applied(view) => view,
    Outcome::Discarded => anyhow::bail!("图像加载结果被丢弃"),
  };
  info!("加载完成，耗时: {:.2?}，状态: {}", now.elapsed(), view.phase);
  if let Some(dims) = args.display {
    controller.resize(dims);
    view = controller.view();
    info!("显示尺寸: {}", dims);
  }
  report(&view);

  if let Some(index) = args.region {
    info!("检索第 {} 个区域", index);
    if let Outcome::Applied(searched) = controller.select_box(index).await? {
      view = searched;
      report(&view);
    }
  }

  #[cfg(feature = "overlay_preview")]
  if let Some(overlay) = &args.overlay {
    use shanan_search::output::{OverlayImageOutput, Render};

    let output = OverlayImageOutput::from_url(overlay)?;
    if let Some(handle) = controller.handle() {
      output.render_result(&handle, &view)?;
    }
  }

  Ok(())
}
