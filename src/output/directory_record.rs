// 该文件是 Wenwu （文物识别） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Utc};
use image::RgbaImage;
use thiserror::Error;
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Gallery, Render, Report},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 按日期分目录保存消反光图像，并在旁边写入同名的 `.json` 识别记录：
/// `<root>/<年>/<月>/<日>/<时-分-秒>-<序号>.png`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  counter: Mutex<u16>,
  last_image: Mutex<Option<PathBuf>>,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    Ok(DirectoryRecordOutput {
      directory: crate::url_to_path(uri),
      counter: Mutex::new(0),
      last_image: Mutex::new(None),
    })
  }
}

impl DirectoryRecordOutput {
  fn record_id(&self) -> u16 {
    let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
    *counter = counter.wrapping_add(1);
    *counter
  }

  fn record_path(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.record_id()
    )))
  }
}

impl Gallery for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn store(&self, image: &RgbaImage) -> Result<(), Self::Error> {
    let path = self.record_path(Utc::now())?;
    image.save(&path)?;
    info!("消反光后的图片已保存: {}", path.display());
    *self.last_image.lock().unwrap_or_else(|e| e.into_inner()) = Some(path);
    Ok(())
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, report: &Report) -> Result<(), Self::Error> {
    let now = Utc::now();
    // 与本次保存的图像同名；若本次没有图像（例如消反光失败），单独生成记录
    let image_path = self
      .last_image
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .take();
    let path = match &image_path {
      Some(path) => path.with_extension("json"),
      None => self.record_path(now)?.with_extension("json"),
    };

    let record = serde_json::json!({
      "time": now.to_rfc3339(),
      "image": image_path.as_ref().map(|p| p.display().to_string()),
      "labels": report.labels,
      "error": report.error_message,
    });
    std::fs::write(&path, serde_json::to_string_pretty(&record)?)?;
    info!("识别记录已写入: {}", path.display());
    Ok(())
  }
}
