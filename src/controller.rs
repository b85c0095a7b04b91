// 该文件是 Shanan （山南西风） 项目的一部分。
// src/controller.rs - 会话驱动
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

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::{
  extract::RegionExtractor,
  gateway::{Gateway, Operation},
  geometry::Dimensions,
  handle::ImageHandle,
  input::decode_upload_async,
  session::{ExtractJob, Request, Session, SessionError, SessionMode, SessionView, Step},
};

/// 展示层发来的事件
#[derive(Debug, Clone)]
pub enum UiEvent {
  FileSelected(Vec<u8>),
  RegionChosen(usize),
  /// 显示坐标下手动绘制的矩形
  RegionDrawn([f32; 4]),
  Resized(Dimensions),
}

/// 一次操作的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
  /// 结果已写入会话
  Applied(SessionView),
  /// 期间会话已切换到新的图像或请求，结果被丢弃
  Discarded,
}

impl Outcome {
  pub fn view(&self) -> Option<&SessionView> {
    match self {
      Outcome::Applied(view) => Some(view),
      Outcome::Discarded => None,
    }
  }
}

/// 持有会话与各个协作者，按状态机推进异步步骤
///
/// 会话锁只在同步转换期间持有，不跨越任何挂起点，
/// 因此多个操作可以同时在途，由票据决定谁的结果生效。
pub struct SessionController<G> {
  gateway: G,
  extractor: RegionExtractor,
  session: Mutex<Session>,
}

impl<G: Gateway> SessionController<G> {
  pub fn new(gateway: G) -> Self {
    Self {
      gateway,
      extractor: RegionExtractor::default(),
      session: Mutex::new(Session::default()),
    }
  }

  pub fn with_mode(self, mode: SessionMode) -> Self {
    Self {
      session: Mutex::new(Session::new(mode)),
      ..self
    }
  }

  pub fn with_extractor(mut self, extractor: RegionExtractor) -> Self {
    self.extractor = extractor;
    self
  }

  pub fn gateway(&self) -> &G {
    &self.gateway
  }

  fn session(&self) -> MutexGuard<'_, Session> {
    self.session.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn view(&self) -> SessionView {
    self.session().view()
  }

  /// 当前图像句柄的副本
  pub fn handle(&self) -> Option<ImageHandle> {
    self.session().handle().cloned()
  }

  pub fn resize(&self, rendered: Dimensions) {
    debug!("显示尺寸变为 {}", rendered);
    self.session().set_rendered(rendered);
  }

  /// 上传新图像：解码后检测（或整图检索）
  pub async fn load_image(&self, file: Vec<u8>) -> Outcome {
    let source: Arc<[u8]> = file.into();
    let ticket = self.session().begin_load(Arc::clone(&source));

    let decoded = decode_upload_async(source).await;
    let step = self.session().complete_decode(ticket, decoded);
    self.follow(step).await
  }

  /// 选择检测框，裁剪后检索
  pub async fn select_box(&self, index: usize) -> Result<Outcome, SessionError> {
    let job = self.session().begin_select(index)?;
    Ok(self.run_extract(job).await)
  }

  /// 选择显示坐标下绘制的矩形，裁剪后检索
  pub async fn select_drawn(&self, rect: [f32; 4]) -> Result<Outcome, SessionError> {
    let job = self.session().begin_select_drawn(rect)?;
    Ok(self.run_extract(job).await)
  }

  /// 不裁剪，直接以整张图像检索
  pub async fn search_whole_image(&self) -> Result<Outcome, SessionError> {
    let request = self.session().begin_whole_search()?;
    Ok(self.run_request(request).await)
  }

  /// 处理展示层事件
  pub async fn dispatch(&self, event: UiEvent) -> Result<Outcome, SessionError> {
    match event {
      UiEvent::FileSelected(file) => Ok(self.load_image(file).await),
      UiEvent::RegionChosen(index) => self.select_box(index).await,
      UiEvent::RegionDrawn(rect) => self.select_drawn(rect).await,
      UiEvent::Resized(rendered) => {
        self.resize(rendered);
        Ok(Outcome::Applied(self.view()))
      }
    }
  }

  async fn run_extract(&self, job: ExtractJob) -> Outcome {
    let artifact = self.extractor.extract(&job.handle, &job.bbox).await;
    let step = self.session().complete_extract(job.ticket, artifact);
    self.follow(step).await
  }

  async fn run_request(&self, request: Request) -> Outcome {
    let Request {
      ticket,
      operation,
      image,
    } = request;
    info!("发送 {} 请求 ({} 字节)", operation, image.len());

    let step = match operation {
      Operation::Detect => {
        let result = self.gateway.detect(image).await;
        self.session().complete_detect(ticket, result)
      }
      Operation::Search => {
        let result = self.gateway.search(image).await;
        self.session().complete_search(ticket, result)
      }
    };
    self.settle(step)
  }

  async fn follow(&self, step: Step<Request>) -> Outcome {
    match step {
      Step::Next(request) => self.run_request(request).await,
      Step::Settled => Outcome::Applied(self.view()),
      Step::Stale => Outcome::Discarded,
    }
  }

  fn settle(&self, step: Step<()>) -> Outcome {
    match step {
      Step::Stale => Outcome::Discarded,
      Step::Next(()) | Step::Settled => Outcome::Applied(self.view()),
    }
  }
}
