// 该文件是 Shanan （山南西风） 项目的一部分。
// src/session.rs - 上传到检索结果的会话状态机
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

//! 会话状态机只做同步的状态转换，不做 I/O。
//!
//! 每个异步步骤开始时领取一张 [`Ticket`]，完成时带着它回来；
//! 票据与当前会话身份不一致的响应一律丢弃，不会覆盖新图像的目标框或检索结果。

use std::{fmt, sync::Arc};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  extract::{CroppedArtifact, ExtractionError},
  gateway::{GatewayError, MatchResult, Operation},
  geometry::{Dimensions, DetectionBox, NormalizedRegion, rendered_to_natural, to_normalized},
  handle::ImageHandle,
  input::DecodeError,
};

/// 会话阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
  #[default]
  Idle,
  Detecting,
  Ready,
  Extracting,
  Searching,
  Resolved,
}

impl Phase {
  pub fn as_str(&self) -> &'static str {
    match self {
      Phase::Idle => "idle",
      Phase::Detecting => "detecting",
      Phase::Ready => "ready",
      Phase::Extracting => "extracting",
      Phase::Searching => "searching",
      Phase::Resolved => "resolved",
    }
  }

  /// 是否有请求在途
  pub fn is_busy(&self) -> bool {
    matches!(
      self,
      Phase::Detecting | Phase::Extracting | Phase::Searching
    )
  }

  fn accepts_selection(&self) -> bool {
    matches!(self, Phase::Ready | Phase::Resolved)
  }
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 工作流模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
  /// 先检测，再由用户选框裁剪检索
  #[default]
  DetectThenCrop,
  /// 跳过检测，直接用整张上传图像检索
  WholeImage,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
  #[error("当前阶段 {phase} 不允许执行 {action}")]
  InvalidTransition { action: &'static str, phase: Phase },
  #[error("目标框序号 {index} 超出范围（共 {len} 个）")]
  BoxOutOfRange { index: usize, len: usize },
  #[error("尚未加载图像")]
  NoImage,
}

/// 异步请求发出时的会话身份
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
  generation: u64,
  request: u64,
}

/// 需要发往后端的请求
#[derive(Debug, Clone)]
pub struct Request {
  pub ticket: Ticket,
  pub operation: Operation,
  pub image: Vec<u8>,
}

/// 需要执行的裁剪任务
#[derive(Debug, Clone)]
pub struct ExtractJob {
  pub ticket: Ticket,
  pub handle: ImageHandle,
  pub bbox: [f32; 4],
}

/// 完成回调的处理结果
#[derive(Debug)]
pub enum Step<T> {
  /// 继续下一步
  Next(T),
  /// 已写入会话，流程结束
  Settled,
  /// 响应已过期，会话未改动
  Stale,
}

impl<T> Step<T> {
  pub fn is_stale(&self) -> bool {
    matches!(self, Step::Stale)
  }
}

/// 叠加层上的一个可选区域
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayRegion {
  pub index: usize,
  pub label: String,
  pub score: f32,
  pub region: NormalizedRegion,
}

/// 交给展示层的会话快照
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionView {
  pub phase: Phase,
  pub natural: Option<Dimensions>,
  pub rendered: Option<Dimensions>,
  pub regions: Vec<OverlayRegion>,
  pub matches: Vec<MatchResult>,
  pub selected: Option<usize>,
  pub message: Option<String>,
}

impl SessionView {
  pub fn is_busy(&self) -> bool {
    self.phase.is_busy()
  }
}

#[derive(Debug, Default)]
pub struct Session {
  mode: SessionMode,
  phase: Phase,
  handle: Option<ImageHandle>,
  boxes: Vec<DetectionBox>,
  matches: Vec<MatchResult>,
  selected: Option<usize>,
  message: Option<String>,
  generation: u64,
  request: u64,
}

impl Session {
  pub fn new(mode: SessionMode) -> Self {
    Self {
      mode,
      ..Default::default()
    }
  }

  pub fn phase(&self) -> Phase {
    self.phase
  }

  pub fn handle(&self) -> Option<&ImageHandle> {
    self.handle.as_ref()
  }

  pub fn boxes(&self) -> &[DetectionBox] {
    &self.boxes
  }

  pub fn matches(&self) -> &[MatchResult] {
    &self.matches
  }

  pub fn selected(&self) -> Option<usize> {
    self.selected
  }

  pub fn message(&self) -> Option<&str> {
    self.message.as_deref()
  }

  fn next_ticket(&mut self) -> Ticket {
    self.request += 1;
    Ticket {
      generation: self.generation,
      request: self.request,
    }
  }

  fn is_current(&self, ticket: Ticket, expected: Phase) -> bool {
    let current = ticket.generation == self.generation
      && ticket.request == self.request
      && self.phase == expected;
    if !current {
      warn!(
        "丢弃过期响应: 票据 {}/{}, 当前 {}/{} ({})",
        ticket.generation, ticket.request, self.generation, self.request, self.phase
      );
    }
    current
  }

  /// 选区失败：保留目标框，清空结果，回到 Ready
  fn fail_selection(&mut self, message: String) {
    warn!("{}", message);
    self.phase = Phase::Ready;
    self.matches.clear();
    self.selected = None;
    self.message = Some(message);
  }

  /// 上传新图像，旧图像的目标框与检索结果一并清空
  pub fn begin_load(&mut self, source: impl Into<Arc<[u8]>>) -> Ticket {
    self.generation += 1;
    let ticket = self.next_ticket();

    self.handle = Some(ImageHandle::pending(source));
    self.boxes.clear();
    self.matches.clear();
    self.selected = None;
    self.message = None;
    self.phase = Phase::Detecting;

    info!("加载第 {} 张图像", self.generation);
    ticket
  }

  /// 图像解码完成
  pub fn complete_decode(
    &mut self,
    ticket: Ticket,
    result: Result<ImageHandle, DecodeError>,
  ) -> Step<Request> {
    if !self.is_current(ticket, Phase::Detecting) {
      return Step::Stale;
    }

    let mut handle = match result {
      Ok(handle) => handle,
      Err(e) => {
        warn!("上传图像解码失败: {}", e);
        self.handle = None;
        self.phase = Phase::Idle;
        self.message = Some(format!("无法读取该图像，请换一张试试: {e}"));
        return Step::Settled;
      }
    };

    if let Some(pending) = &self.handle {
      handle.inherit_rendered(pending);
    }
    let image = handle.source().to_vec();
    if let Some(natural) = handle.natural() {
      debug!("图像原始尺寸: {}", natural);
    }
    self.handle = Some(handle);

    let operation = match self.mode {
      SessionMode::DetectThenCrop => Operation::Detect,
      SessionMode::WholeImage => {
        self.phase = Phase::Searching;
        Operation::Search
      }
    };
    Step::Next(Request {
      ticket,
      operation,
      image,
    })
  }

  /// 检测响应到达
  pub fn complete_detect(
    &mut self,
    ticket: Ticket,
    result: Result<Vec<DetectionBox>, GatewayError>,
  ) -> Step<()> {
    if !self.is_current(ticket, Phase::Detecting) {
      return Step::Stale;
    }

    self.phase = Phase::Ready;
    match result {
      Ok(boxes) => {
        info!("检测到 {} 个目标", boxes.len());
        self.boxes = boxes;
      }
      Err(e) => {
        warn!("目标检测失败: {}", e);
        self.boxes.clear();
        self.message = Some(format!("未能检测到目标，请重试: {e}"));
      }
    }
    Step::Settled
  }

  fn check_selectable(&self, action: &'static str) -> Result<&ImageHandle, SessionError> {
    if !self.phase.accepts_selection() {
      return Err(SessionError::InvalidTransition {
        action,
        phase: self.phase,
      });
    }
    self
      .handle
      .as_ref()
      .filter(|handle| handle.is_loaded())
      .ok_or(SessionError::NoImage)
  }

  fn start_extract(
    &mut self,
    handle: ImageHandle,
    bbox: [f32; 4],
    selected: Option<usize>,
  ) -> ExtractJob {
    let ticket = self.next_ticket();
    self.phase = Phase::Extracting;
    self.matches.clear();
    self.selected = selected;
    self.message = None;

    ExtractJob {
      ticket,
      handle,
      bbox,
    }
  }

  /// 选择第 `index` 个检测框
  pub fn begin_select(&mut self, index: usize) -> Result<ExtractJob, SessionError> {
    let handle = self.check_selectable("select")?.clone();
    let bbox = self
      .boxes
      .get(index)
      .map(|det| det.bbox)
      .ok_or(SessionError::BoxOutOfRange {
        index,
        len: self.boxes.len(),
      })?;

    info!("选择目标框 #{}: {:?}", index, bbox);
    Ok(self.start_extract(handle, bbox, Some(index)))
  }

  /// 选择在显示坐标下手动绘制的矩形
  pub fn begin_select_drawn(&mut self, rect: [f32; 4]) -> Result<ExtractJob, SessionError> {
    let handle = self.check_selectable("select")?.clone();
    let (Some(natural), Some(rendered)) = (handle.natural(), handle.rendered()) else {
      return Err(SessionError::NoImage);
    };
    let bbox = rendered_to_natural(&rect, natural, rendered);

    info!("选择手动区域 {:?} -> 原始坐标 {:?}", rect, bbox);
    Ok(self.start_extract(handle, bbox, None))
  }

  /// 以整张上传图像发起检索
  pub fn begin_whole_search(&mut self) -> Result<Request, SessionError> {
    let image = self.check_selectable("search")?.source().to_vec();
    let ticket = self.next_ticket();
    self.phase = Phase::Searching;
    self.matches.clear();
    self.selected = None;
    self.message = None;

    info!("整图检索 ({} 字节)", image.len());
    Ok(Request {
      ticket,
      operation: Operation::Search,
      image,
    })
  }

  /// 裁剪完成
  pub fn complete_extract(
    &mut self,
    ticket: Ticket,
    result: Result<CroppedArtifact, ExtractionError>,
  ) -> Step<Request> {
    if !self.is_current(ticket, Phase::Extracting) {
      return Step::Stale;
    }

    match result {
      Ok(artifact) => {
        debug!(
          "裁剪完成: {} ({} 字节)",
          artifact.dimensions(),
          artifact.bytes.len()
        );
        self.phase = Phase::Searching;
        Step::Next(Request {
          ticket,
          operation: Operation::Search,
          image: artifact.bytes,
        })
      }
      Err(e) => {
        self.fail_selection(format!("无法裁剪所选区域: {e}"));
        Step::Settled
      }
    }
  }

  /// 检索响应到达
  pub fn complete_search(
    &mut self,
    ticket: Ticket,
    result: Result<Vec<MatchResult>, GatewayError>,
  ) -> Step<()> {
    if !self.is_current(ticket, Phase::Searching) {
      return Step::Stale;
    }

    match result {
      Ok(matches) => {
        info!("检索返回 {} 个结果", matches.len());
        self.phase = Phase::Resolved;
        self.matches = matches;
      }
      Err(e) => self.fail_selection(format!("检索失败，请稍后重试: {e}")),
    }
    Step::Settled
  }

  /// 布局变化后更新显示尺寸
  pub fn set_rendered(&mut self, rendered: Dimensions) {
    if let Some(handle) = self.handle.as_mut() {
      handle.set_rendered(rendered);
    }
  }

  /// 当前状态快照，归一化区域在此按原始尺寸重新计算
  pub fn view(&self) -> SessionView {
    let natural = self.handle.as_ref().and_then(ImageHandle::natural);
    let regions = natural
      .map(|natural| {
        self
          .boxes
          .iter()
          .enumerate()
          .map(|(index, det)| OverlayRegion {
            index,
            label: det.label.clone(),
            score: det.score,
            region: to_normalized(&det.bbox, natural),
          })
          .collect()
      })
      .unwrap_or_default();

    SessionView {
      phase: self.phase,
      natural,
      rendered: self.handle.as_ref().and_then(ImageHandle::rendered),
      regions,
      matches: self.matches.clone(),
      selected: self.selected,
      message: self.message.clone(),
    }
  }
}
