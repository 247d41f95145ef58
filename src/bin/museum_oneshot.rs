// 该文件是 Wenwu （文物识别） 项目的一部分。
// src/bin/museum_oneshot.rs - 单张照片文物识别
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

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use url::Url;

use wenwu::{
  FromUrl,
  config::{LabelTable, PipelineConfig},
  input::{Capture, ImageFileInput},
  model::{Deglare, Detector, DirectoryModelStore, ModelBuilder, RtenEngine},
  output::{LogOutput, OutputWrapper, Render, Report},
  pipeline::PipelineContext,
};

/// 文物识别参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型地址，例如 rten:///models/detector.rten 或 model://detector-v2
  #[arg(long, value_name = "MODEL")]
  pub detector: Url,
  /// 消反光模型地址，例如 model://deglare-v1
  #[arg(long, value_name = "MODEL")]
  pub deglare: Url,
  /// model:// 地址所在的模型目录
  #[arg(long, value_name = "DIR", default_value = "models")]
  pub model_dir: PathBuf,
  /// 输入照片，例如 image:///path/to/photo.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 消反光图像的保存位置（image:///file.png 或 folder:///dir）
  #[arg(long, value_name = "OUTPUT")]
  pub gallery: Option<Url>,
  /// 置信度阈值 (0.0 - 1.0)，严格大于才算检测到
  #[arg(long, default_value = "0.7", value_name = "THRESHOLD")]
  pub threshold: f32,
  /// 类别标签文件（JSON 字符串数组），缺省使用内置的文物列表
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("检测模型: {}", args.detector);
  info!("消反光模型: {}", args.deglare);
  info!("输入来源: {}", args.input);

  let mut config = PipelineConfig::default().with_threshold(args.threshold)?;
  if let Some(path) = &args.labels {
    config = config.with_labels(LabelTable::from_json_file(path)?);
  }

  // 模型只在启动时加载一次；加载失败时流水线会报告模型未就绪
  let store = DirectoryModelStore::new(&args.model_dir);
  let detector = ModelBuilder::from_url(&args.detector)?
    .input_size(config.detector_size)
    .build::<RtenEngine>("YOLO", &store)
    .and_then(|handle| Detector::new(handle, config.labels.clone(), config.threshold))
    .inspect_err(|e| error!("YOLO 模型加载失败: {}", e))
    .ok();
  let deglare = ModelBuilder::from_url(&args.deglare)?
    .input_size(config.deglare_size)
    .build::<RtenEngine>("消反光", &store)
    .and_then(Deglare::new)
    .inspect_err(|e| error!("消反光模型加载失败: {}", e))
    .ok();
  let context = PipelineContext::new(detector, deglare);

  let image = ImageFileInput::from_url(&args.input)?
    .request_capture()
    .inspect_err(|e| error!("获取照片失败: {}", e))
    .ok();

  let gallery = args
    .gallery
    .as_ref()
    .map(OutputWrapper::from_url)
    .transpose()?;

  let mut pipeline = context.pipeline();
  let outcome = match &gallery {
    Some(gallery) => pipeline.run_with_gallery(image, gallery),
    None => pipeline.run(image),
  };

  let report = Report::from_outcome(&outcome);
  LogOutput.render_result(&report)?;
  if let Some(gallery) = &gallery {
    gallery.render_result(&report)?;
  }

  for label in &report.labels {
    println!("{}", label);
  }
  if let Some(message) = &report.error_message {
    anyhow::bail!("{}", message);
  }

  Ok(())
}
