// 该文件是 Wenwu （文物识别） 项目的一部分。
// src/pipeline.rs - 双路检测流水线与结果融合
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

use std::fmt;

use image::{DynamicImage, RgbaImage};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  model::{
    Deglare, Detection, DetectionSet, Detector, InferenceEngine, InferenceError, Model,
    ReconstructError, UNKNOWN_LABEL,
  },
  output::Gallery,
  preprocess::{PreprocessError, prepare},
};

/// 流水线阶段，按执行顺序排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
  Idle,
  PreparingA,
  DetectingA,
  PreparingDeglare,
  Deglaring,
  ReconstructingImage,
  PreparingB,
  DetectingB,
  Fusing,
}

impl fmt::Display for PipelineStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      PipelineStage::Idle => "空闲",
      PipelineStage::PreparingA => "原图预处理",
      PipelineStage::DetectingA => "原图检测",
      PipelineStage::PreparingDeglare => "消反光预处理",
      PipelineStage::Deglaring => "消反光推理",
      PipelineStage::ReconstructingImage => "消反光图像重建",
      PipelineStage::PreparingB => "消反光图预处理",
      PipelineStage::DetectingB => "消反光图检测",
      PipelineStage::Fusing => "结果融合",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Running(PipelineStage),
  Done,
  Failed(PipelineStage),
}

impl Default for PipelineState {
  fn default() -> Self {
    PipelineState::Running(PipelineStage::Idle)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
  Detector,
  Deglare,
}

impl fmt::Display for ModelRole {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ModelRole::Detector => f.write_str("YOLO"),
      ModelRole::Deglare => f.write_str("消反光"),
    }
  }
}

#[derive(Error, Debug)]
pub enum StageError {
  #[error("没有获取到图像")]
  MissingImage,
  #[error("{0} 模型未初始化")]
  ModelNotReady(ModelRole),
  #[error("图像预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理失败: {0}")]
  Inference(#[from] InferenceError),
  #[error("图像重建失败: {0}")]
  Reconstruct(#[from] ReconstructError),
}

#[derive(Error, Debug)]
#[error("流水线在「{stage}」阶段失败: {source}")]
pub struct PipelineError {
  pub stage: PipelineStage,
  #[source]
  pub source: StageError,
}

impl PipelineError {
  /// 面向用户的单条错误信息
  pub fn user_message(&self) -> String {
    match (&self.source, self.stage) {
      (StageError::MissingImage, _) => "没有获取到图像".to_string(),
      (StageError::ModelNotReady(ModelRole::Detector), _) => "YOLO 解释器未初始化".to_string(),
      (StageError::ModelNotReady(ModelRole::Deglare), _) => "消反光解释器未初始化".to_string(),
      (StageError::Preprocess(_), PipelineStage::PreparingB) => {
        "消反光后的图像预处理失败".to_string()
      }
      (StageError::Preprocess(_), _) => "图像预处理失败".to_string(),
      (StageError::Inference(e), PipelineStage::DetectingA) => format!("YOLO 推理失败：{}", e),
      (StageError::Inference(e), PipelineStage::Deglaring) => format!("消反光推理失败：{}", e),
      (StageError::Inference(e), _) => format!("消反光后 YOLO 推理失败：{}", e),
      (StageError::Reconstruct(_), _) => "无法转换消反光模型输出为图片".to_string(),
    }
  }
}

/// 一次完整运行的结果
#[derive(Debug, Clone)]
pub struct PipelineOutput {
  pub labels: DetectionSet,
  pub original: Vec<Detection>,
  pub deglared: Vec<Detection>,
  pub deglared_image: RgbaImage,
}

/// 合并两路检测的标签：取并集；只要有真实标签就去掉哨兵，
/// 两路都没有真实标签时结果恰为 `{"unknown"}`。
pub fn fuse(a: &DetectionSet, b: &DetectionSet) -> DetectionSet {
  let mut combined: DetectionSet = a.labels().iter().chain(b.labels()).cloned().collect();

  if combined.labels().iter().any(|label| label != UNKNOWN_LABEL) {
    combined.remove(UNKNOWN_LABEL);
    combined
  } else {
    DetectionSet::unknown()
  }
}

/// 流水线上下文：启动时加载一次的模型句柄，由进程持有并在各次运行间共享
pub struct PipelineContext<D, G> {
  detector: Option<Detector<D>>,
  deglare: Option<Deglare<G>>,
}

impl<D: InferenceEngine, G: InferenceEngine> PipelineContext<D, G> {
  pub fn new(detector: Option<Detector<D>>, deglare: Option<Deglare<G>>) -> Self {
    Self { detector, deglare }
  }

  pub fn detector(&self) -> Option<&Detector<D>> {
    self.detector.as_ref()
  }

  pub fn deglare(&self) -> Option<&Deglare<G>> {
    self.deglare.as_ref()
  }

  pub fn pipeline(&self) -> Pipeline<'_, D, G> {
    Pipeline {
      context: self,
      state: PipelineState::default(),
      history: Vec::new(),
    }
  }
}

/// 单张照片的一次线性运行：任一阶段出错即进入 `Failed`，不再执行后续阶段
pub struct Pipeline<'a, D, G> {
  context: &'a PipelineContext<D, G>,
  state: PipelineState,
  history: Vec<PipelineState>,
}

impl<'a, D: InferenceEngine, G: InferenceEngine> Pipeline<'a, D, G> {
  pub fn state(&self) -> PipelineState {
    self.state
  }

  /// 依次经历过的状态（不含初始的 `Idle`）
  pub fn history(&self) -> &[PipelineState] {
    &self.history
  }

  fn transition(&mut self, state: PipelineState) {
    debug!("流水线状态: {:?} -> {:?}", self.state, state);
    self.state = state;
    self.history.push(state);
  }

  fn fail(&mut self, stage: PipelineStage, source: StageError) -> PipelineError {
    error!("流水线在「{}」阶段失败: {}", stage, source);
    self.transition(PipelineState::Failed(stage));
    PipelineError { stage, source }
  }

  fn step<T, E: Into<StageError>>(
    &mut self,
    stage: PipelineStage,
    f: impl FnOnce() -> Result<T, E>,
  ) -> Result<T, PipelineError> {
    self.transition(PipelineState::Running(stage));
    f().map_err(|e| self.fail(stage, e.into()))
  }

  /// 运行完整流水线，结果或首个错误
  pub fn run(&mut self, image: Option<DynamicImage>) -> Result<PipelineOutput, PipelineError> {
    self.execute(image, |_| {})
  }

  /// 同 [`Pipeline::run`]，并在重建后把消反光图像交给图库；图库失败只记录警告
  pub fn run_with_gallery<Gal: Gallery + ?Sized>(
    &mut self,
    image: Option<DynamicImage>,
    gallery: &Gal,
  ) -> Result<PipelineOutput, PipelineError> {
    self.execute(image, |deglared| match gallery.store(deglared) {
      Ok(()) => debug!("消反光后的图片已交给图库"),
      Err(e) => warn!("保存消反光图片失败: {}", e),
    })
  }

  fn execute(
    &mut self,
    image: Option<DynamicImage>,
    on_deglared: impl FnOnce(&RgbaImage),
  ) -> Result<PipelineOutput, PipelineError> {
    self.state = PipelineState::default();
    self.history.clear();

    let context = self.context;
    let image = image.ok_or_else(|| self.fail(PipelineStage::Idle, StageError::MissingImage))?;
    let detector = context.detector().ok_or_else(|| {
      self.fail(
        PipelineStage::Idle,
        StageError::ModelNotReady(ModelRole::Detector),
      )
    })?;
    let deglare = context.deglare().ok_or_else(|| {
      self.fail(
        PipelineStage::Idle,
        StageError::ModelNotReady(ModelRole::Deglare),
      )
    })?;

    info!("开始识别，图像尺寸: {}x{}", image.width(), image.height());
    let now = std::time::Instant::now();

    // 第一路：原图检测
    let input = self.step(PipelineStage::PreparingA, || {
      prepare(&image, detector.input_size())
    })?;
    let original = self.step(PipelineStage::DetectingA, || detector.infer(&input))?;
    for d in &original {
      info!("原图检测结果: {}，置信度: {}", d.label, d.confidence);
    }

    // 消反光
    let input = self.step(PipelineStage::PreparingDeglare, || {
      prepare(&image, deglare.input_size())
    })?;
    drop(image);
    let output = self.step(PipelineStage::Deglaring, || deglare.infer(&input))?;
    let deglared_image = self.step(PipelineStage::ReconstructingImage, || {
      deglare.reconstruct(&output)
    })?;
    on_deglared(&deglared_image);

    // 第二路：消反光图检测
    let input = self.step(PipelineStage::PreparingB, || {
      prepare(&deglared_image, detector.input_size())
    })?;
    let deglared = self.step(PipelineStage::DetectingB, || detector.infer(&input))?;
    for d in &deglared {
      info!("消反光后检测结果: {}，置信度: {}", d.label, d.confidence);
    }

    self.transition(PipelineState::Running(PipelineStage::Fusing));
    let labels = fuse(
      &DetectionSet::from_detections(&original),
      &DetectionSet::from_detections(&deglared),
    );
    info!(
      "最终结果: {:?}，耗时: {:.2?}",
      labels.labels(),
      now.elapsed()
    );
    self.transition(PipelineState::Done);

    Ok(PipelineOutput {
      labels,
      original,
      deglared,
      deglared_image,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn set(labels: &[&str]) -> DetectionSet {
    labels.iter().copied().collect()
  }

  #[test]
  fn both_unknown_fuse_to_unknown() {
    let fused = fuse(&DetectionSet::unknown(), &DetectionSet::unknown());
    assert_eq!(fused, DetectionSet::unknown());
  }

  #[test]
  fn known_label_replaces_unknown() {
    let fused = fuse(&DetectionSet::unknown(), &set(&["虎形尊"]));
    assert_eq!(fused, set(&["虎形尊"]));

    let fused = fuse(&set(&["三彩馬"]), &DetectionSet::unknown());
    assert_eq!(fused, set(&["三彩馬"]));
  }

  #[test]
  fn union_keeps_first_seen_order_without_duplicates() {
    let fused = fuse(&set(&["三彩馬", "虎形尊"]), &set(&["虎形尊", "unknown", "獸形器座"]));
    assert_eq!(fused, set(&["三彩馬", "虎形尊", "獸形器座"]));
  }

  #[test]
  fn empty_sets_fuse_to_unknown() {
    let fused = fuse(&DetectionSet::default(), &DetectionSet::default());
    assert_eq!(fused, DetectionSet::unknown());
  }

  #[test]
  fn user_message_names_the_failed_stage() {
    let error = PipelineError {
      stage: PipelineStage::PreparingB,
      source: StageError::Preprocess(PreprocessError::ByteCountMismatch {
        expected: 3,
        actual: 2,
      }),
    };
    assert_eq!(error.user_message(), "消反光后的图像预处理失败");

    let error = PipelineError {
      stage: PipelineStage::Idle,
      source: StageError::ModelNotReady(ModelRole::Deglare),
    };
    assert_eq!(error.user_message(), "消反光解释器未初始化");
  }
}
