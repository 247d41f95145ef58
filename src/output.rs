// 该文件是 Wenwu （文物识别） 项目的一部分。
// src/output.rs - 输出定义（图库保存与结果呈现）
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

use image::RgbaImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::FromUrl;
#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
use crate::FromUrlWithScheme;
use crate::pipeline::{PipelineError, PipelineOutput};

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

/// 图库：接收消反光后的图像，调用方不关心结果
pub trait Gallery {
  type Error: std::error::Error;
  fn store(&self, image: &RgbaImage) -> Result<(), Self::Error>;
}

/// 交给呈现层的最终结果：有序标签列表，或一条错误信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
  pub labels: Vec<String>,
  pub error_message: Option<String>,
}

impl Report {
  pub fn from_outcome(outcome: &Result<PipelineOutput, PipelineError>) -> Self {
    match outcome {
      Ok(output) => Report {
        labels: output.labels.labels().to_vec(),
        error_message: None,
      },
      Err(e) => Report {
        labels: Vec::new(),
        error_message: Some(e.user_message()),
      },
    }
  }
}

pub trait Render: Sized {
  type Error;
  fn render_result(&self, report: &Report) -> Result<(), Self::Error>;
}

/// 将结果写入日志
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOutput;

impl Render for LogOutput {
  type Error = std::convert::Infallible;

  fn render_result(&self, report: &Report) -> Result<(), Self::Error> {
    match &report.error_message {
      Some(message) => warn!("识别失败: {}", message),
      None => info!("最终结果: {}", report.labels.join("、")),
    }
    Ok(())
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Gallery for OutputWrapper {
  type Error = OutputError;

  #[cfg_attr(
    not(any(feature = "save_image_file", feature = "directory_record")),
    allow(unused_variables)
  )]
  fn store(&self, image: &RgbaImage) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output.store(image).map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output.store(image).map_err(OutputError::from),
      #[allow(unreachable_patterns)]
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  #[cfg_attr(
    not(feature = "directory_record"),
    allow(unused_variables)
  )]
  fn render_result(&self, report: &Report) -> Result<(), Self::Error> {
    match self {
      // 单张图像输出只负责保存图像
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(_) => Ok(()),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output.render_result(report).map_err(OutputError::from),
      #[allow(unreachable_patterns)]
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}
