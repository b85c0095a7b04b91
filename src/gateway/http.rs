// 该文件是 Shanan （山南西风） 项目的一部分。
// src/gateway/http.rs - 基于 HTTP multipart 的后端网关
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

use std::time::{Duration, Instant};

use reqwest::{
  Client, StatusCode,
  multipart::{Form, Part},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::{Gateway, GatewayError, MatchResult, Operation, parse_detections, parse_matches};
use crate::{FromUrl, geometry::DetectionBox};

pub const DEFAULT_BACKEND: &str = "http://127.0.0.1:8000/";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const HTTP_SCHEMES: [&str; 2] = ["http", "https"];
const FILE_PART: &str = "file";

#[derive(Error, Debug)]
pub enum GatewayConfigError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效的查询参数 {key}={value}")]
  InvalidQuery { key: String, value: String },
  #[error("地址解析错误: {0}")]
  UrlError(#[from] url::ParseError),
  #[error("HTTP 客户端创建失败: {0}")]
  ClientError(#[from] reqwest::Error),
}

/// 后端地址配置
///
/// 由形如 `http://127.0.0.1:8000/?search=http://10.0.0.2:9000/&timeout=10` 的地址构造：
/// 路径部分为检测服务基地址，`search` 可指定独立的检索服务，`timeout` 为请求超时秒数。
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
  pub detect_base: Url,
  pub search_base: Url,
  pub timeout: Duration,
}

fn base_url(url: &Url) -> Result<Url, GatewayConfigError> {
  if !HTTP_SCHEMES.contains(&url.scheme()) {
    return Err(GatewayConfigError::SchemeMismatch(format!(
      "期望 http 或 https, 实际为 '{}'",
      url.scheme()
    )));
  }

  let mut base = url.clone();
  base.set_query(None);
  base.set_fragment(None);
  // 保证以 '/' 结尾，join 时才会保留原有路径
  if !base.path().ends_with('/') {
    let path = format!("{}/", base.path());
    base.set_path(&path);
  }
  Ok(base)
}

impl FromUrl for GatewayConfig {
  type Error = GatewayConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let detect_base = base_url(url)?;
    let mut search_base = detect_base.clone();
    let mut timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);

    for (key, value) in url.query_pairs() {
      match &*key {
        "search" => {
          search_base = base_url(&Url::parse(&value)?)?;
        }
        "timeout" => {
          let secs = value
            .parse::<u64>()
            .map_err(|_| GatewayConfigError::InvalidQuery {
              key: key.to_string(),
              value: value.to_string(),
            })?;
          timeout = Duration::from_secs(secs);
        }
        _ => warn!("忽略未知的后端参数: {}={}", key, value),
      }
    }

    Ok(GatewayConfig {
      detect_base,
      search_base,
      timeout,
    })
  }
}

impl GatewayConfig {
  pub fn endpoint(&self, operation: Operation) -> Result<Url, url::ParseError> {
    match operation {
      Operation::Detect => self.detect_base.join(operation.name()),
      Operation::Search => self.search_base.join(operation.name()),
    }
  }
}

/// 通过 HTTP POST multipart 调用检测与检索服务
pub struct HttpGateway {
  client: Client,
  config: GatewayConfig,
}

impl FromUrl for HttpGateway {
  type Error = GatewayConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    HttpGateway::new(GatewayConfig::from_url(url)?)
  }
}

impl HttpGateway {
  pub fn new(config: GatewayConfig) -> Result<Self, GatewayConfigError> {
    let client = Client::builder().timeout(config.timeout).build()?;
    info!(
      "后端网关: 检测 {}, 检索 {}, 超时 {:?}",
      config.detect_base, config.search_base, config.timeout
    );
    Ok(Self { client, config })
  }

  pub fn config(&self) -> &GatewayConfig {
    &self.config
  }

  async fn post(&self, operation: Operation, image: Vec<u8>) -> Result<Vec<u8>, GatewayError> {
    let endpoint = self
      .config
      .endpoint(operation)
      .map_err(|e| GatewayError::transport(operation, e))?;
    let part = file_part(image).map_err(|e| GatewayError::transport(operation, e))?;
    let form = Form::new().part(FILE_PART, part);

    debug!("POST {}", endpoint);
    let now = Instant::now();
    let response = self
      .client
      .post(endpoint)
      .multipart(form)
      .send()
      .await
      .map_err(|e| GatewayError::transport(operation, e))?;

    check_status(operation, response.status())?;
    let body = response
      .bytes()
      .await
      .map_err(|e| GatewayError::transport(operation, e))?;
    info!("{} 请求完成，耗时: {:.2?}", operation, now.elapsed());

    Ok(body.to_vec())
  }
}

impl Gateway for HttpGateway {
  async fn detect(&self, image: Vec<u8>) -> Result<Vec<DetectionBox>, GatewayError> {
    let body = self.post(Operation::Detect, image).await?;
    parse_detections(&body)
  }

  async fn search(&self, image: Vec<u8>) -> Result<Vec<MatchResult>, GatewayError> {
    let body = self.post(Operation::Search, image).await?;
    parse_matches(&body)
  }
}

fn check_status(operation: Operation, status: StatusCode) -> Result<(), GatewayError> {
  if status.is_success() {
    Ok(())
  } else {
    warn!("{} 服务返回状态码: {}", operation, status);
    Err(GatewayError::status(operation, status.as_u16()))
  }
}

/// 按内容猜测格式，为上传的图像设置文件名与 MIME 类型
fn file_part(image: Vec<u8>) -> Result<Part, reqwest::Error> {
  let format = image::guess_format(&image).ok();
  let mime = format.map_or("application/octet-stream", |f| f.to_mime_type());
  let extension = format
    .and_then(|f| f.extensions_str().first().copied())
    .unwrap_or("bin");

  Part::bytes(image)
    .file_name(format!("upload.{extension}"))
    .mime_str(mime)
}
