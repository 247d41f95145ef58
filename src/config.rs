// 该文件是 Wenwu （文物识别） 项目的一部分。
// src/config.rs - 流水线配置与类别标签表
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

use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::preprocess::TargetSize;

/// 检测模型的类别标签（按类别通道顺序）
pub const ARTIFACT_LABELS: [&str; 7] = [
  "蟠龍方壺",
  "虎形尊",
  "獸形器座",
  "青花花鳥八角盒",
  "三彩馬",
  "金柄銅短劍",
  "三彩加藍人面鎮墓獸",
];

pub const DETECTOR_INPUT_SIZE: TargetSize = TargetSize::square(640);
pub const DEGLARE_INPUT_SIZE: TargetSize = TargetSize::square(256);
pub const DETECTION_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("标签表为空")]
  EmptyLabels,
  #[error("阈值无效: {0}")]
  InvalidThreshold(f32),
}

/// 有序的类别标签表，第 i 项对应检测输出的第 4+i 个通道
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
  labels: Box<[String]>,
}

impl Default for LabelTable {
  fn default() -> Self {
    Self {
      labels: ARTIFACT_LABELS.iter().map(|s| s.to_string()).collect(),
    }
  }
}

impl LabelTable {
  pub fn new<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Result<Self, ConfigError> {
    let labels: Box<[String]> = labels.into_iter().map(Into::into).collect();
    if labels.is_empty() {
      return Err(ConfigError::EmptyLabels);
    }
    Ok(Self { labels })
  }

  /// 从 JSON 字符串数组文件加载，例如 `["蟠龍方壺", "虎形尊"]`
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let labels: Vec<String> = serde_json::from_str(&content)?;
    Self::new(labels)
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.labels.get(index).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.labels.iter().map(String::as_str)
  }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub detector_size: TargetSize,
  pub deglare_size: TargetSize,
  pub threshold: f32,
  pub labels: LabelTable,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      detector_size: DETECTOR_INPUT_SIZE,
      deglare_size: DEGLARE_INPUT_SIZE,
      threshold: DETECTION_THRESHOLD,
      labels: LabelTable::default(),
    }
  }
}

impl PipelineConfig {
  pub fn with_threshold(mut self, threshold: f32) -> Result<Self, ConfigError> {
    if !(0.0..=1.0).contains(&threshold) {
      return Err(ConfigError::InvalidThreshold(threshold));
    }
    self.threshold = threshold;
    Ok(self)
  }

  pub fn with_labels(mut self, labels: LabelTable) -> Self {
    self.labels = labels;
    self
  }
}
