// 该文件是 Shanan （山南西风） 项目的一部分。
// src/gateway.rs - 检测与检索后端接口
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

use std::{fmt, future::Future};

use serde::{Deserialize, Deserializer, de};
use thiserror::Error;

use crate::geometry::DetectionBox;

mod http;
pub use self::http::{DEFAULT_BACKEND, GatewayConfig, GatewayConfigError, HttpGateway};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 后端操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
  Detect,
  Search,
}

impl Operation {
  pub fn name(&self) -> &'static str {
    match self {
      Operation::Detect => "detect",
      Operation::Search => "search",
    }
  }
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Error, Debug)]
pub enum GatewayErrorKind {
  #[error("网络传输错误: {0}")]
  Transport(#[source] BoxError),
  #[error("服务端返回状态码 {0}")]
  Status(u16),
  #[error("响应体不是预期的 JSON: {0}")]
  Body(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
#[error("{operation} 请求失败: {kind}")]
pub struct GatewayError {
  pub operation: Operation,
  #[source]
  pub kind: GatewayErrorKind,
}

impl GatewayError {
  pub fn new(operation: Operation, kind: GatewayErrorKind) -> Self {
    Self { operation, kind }
  }

  pub fn transport(operation: Operation, err: impl Into<BoxError>) -> Self {
    Self::new(operation, GatewayErrorKind::Transport(err.into()))
  }

  pub fn status(operation: Operation, status: u16) -> Self {
    Self::new(operation, GatewayErrorKind::Status(status))
  }
}

/// 检索结果元数据
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MatchMetadata {
  pub name: String,
  #[serde(deserialize_with = "number_or_numeric_text")]
  pub price: f64,
  pub image_url: String,
}

/// 价格可能以数字或数字字符串的形式出现
fn number_or_numeric_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Price {
    Number(f64),
    Text(String),
  }

  match Price::deserialize(deserializer)? {
    Price::Number(value) => Ok(value),
    Price::Text(text) => text
      .trim()
      .parse()
      .map_err(|_| de::Error::custom(format!("无效的价格: {text:?}"))),
  }
}

/// 检索结果，顺序即相关度排名
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MatchResult {
  pub id: String,
  #[serde(default)]
  pub score: Option<f32>,
  pub metadata: MatchMetadata,
}

/// 检测与检索两个后端调用
///
/// 实现方不做重试，失败时返回带操作名的 [`GatewayError`]。
pub trait Gateway: Send + Sync {
  fn detect(
    &self,
    image: Vec<u8>,
  ) -> impl Future<Output = Result<Vec<DetectionBox>, GatewayError>> + Send;

  fn search(
    &self,
    image: Vec<u8>,
  ) -> impl Future<Output = Result<Vec<MatchResult>, GatewayError>> + Send;
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
  detections: Vec<DetectionBox>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
  matches: Vec<MatchResult>,
}

pub(crate) fn parse_detections(body: &[u8]) -> Result<Vec<DetectionBox>, GatewayError> {
  serde_json::from_slice::<DetectResponse>(body)
    .map(|response| response.detections)
    .map_err(|e| GatewayError::new(Operation::Detect, e.into()))
}

pub(crate) fn parse_matches(body: &[u8]) -> Result<Vec<MatchResult>, GatewayError> {
  serde_json::from_slice::<SearchResponse>(body)
    .map(|response| response.matches)
    .map_err(|e| GatewayError::new(Operation::Search, e.into()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_detections() {
    let body = br#"{"detections":[
      {"label":"sofa","score":0.91,"box":[12.5,40,310,220]},
      {"label":"lamp","score":0.4,"box":[400,10,460,200]}
    ]}"#;
    let boxes = parse_detections(body).unwrap();
    assert_eq!(boxes.len(), 2);
    assert_eq!(boxes[0].label, "sofa");
    assert_eq!(boxes[0].bbox, [12.5, 40.0, 310.0, 220.0]);
    assert_eq!(boxes[1].score, 0.4);
  }

  #[test]
  fn empty_detection_list_is_not_an_error() {
    assert!(parse_detections(br#"{"detections":[]}"#).unwrap().is_empty());
  }

  #[test]
  fn keeps_match_ranking_order() {
    let body = br#"{"matches":[
      {"id":"sku-9","score":0.97,"values":[],"metadata":{"name":"Oak chair","price":129.0,"image_url":"https://cdn/9.jpg","category":"chair"}},
      {"id":"sku-2","metadata":{"name":"Pine chair","price":59.5,"image_url":"https://cdn/2.jpg"}},
      {"id":"sku-5","score":0.61,"metadata":{"name":"Stool","price":20,"image_url":"https://cdn/5.jpg"}}
    ]}"#;
    let matches = parse_matches(body).unwrap();
    let ids: Vec<_> = matches.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["sku-9", "sku-2", "sku-5"]);
    assert_eq!(matches[0].score, Some(0.97));
    assert_eq!(matches[1].score, None);
    assert_eq!(matches[1].metadata.price, 59.5);
    assert_eq!(matches[2].metadata.image_url, "https://cdn/5.jpg");
  }

  #[test]
  fn parses_string_price() {
    let body = br#"{"matches":[
      {"id":"B0X","score":0.9,"values":[],"metadata":{"name":"Chair","price":"129.99","image_url":"u"}},
      {"id":"B0Y","metadata":{"name":"Desk","price":" 40 ","image_url":"v"}}
    ]}"#;
    let matches = parse_matches(body).unwrap();
    assert_eq!(matches[0].metadata.price, 129.99);
    assert_eq!(matches[1].metadata.price, 40.0);

    let err = parse_matches(
      br#"{"matches":[{"id":"B0Z","metadata":{"name":"Lamp","price":"ask","image_url":"w"}}]}"#,
    )
    .unwrap_err();
    assert!(matches!(err.kind, GatewayErrorKind::Body(_)));
  }

  #[test]
  fn non_json_body_names_the_operation() {
    let err = parse_matches(b"<html>502 Bad Gateway</html>").unwrap_err();
    assert_eq!(err.operation, Operation::Search);
    assert!(matches!(err.kind, GatewayErrorKind::Body(_)));

    let err = parse_detections(br#"{"boxes":[]}"#).unwrap_err();
    assert_eq!(err.operation, Operation::Detect);
    assert!(err.to_string().starts_with("detect"));
  }

  #[test]
  fn transport_error_keeps_cause() {
    let err = GatewayError::transport(Operation::Search, "connection refused");
    assert!(err.to_string().contains("connection refused"));
    assert!(std::error::Error::source(&err).is_some());
  }
}
