// 该文件是 Wenwu （文物识别） 项目的一部分。
// src/model/detector.rs - 检测模型输出解码
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

use tracing::{debug, error, info};

use crate::{
  config::LabelTable,
  model::{InferenceEngine, InferenceError, Model, ModelHandle, ModelLoadError},
  preprocess::TargetSize,
  tensor::Tensor,
};

/// 未检测到任何类别时返回的哨兵标签
pub const UNKNOWN_LABEL: &str = "unknown";

/// 输出通道中前 4 个为边框几何 (cx, cy, w, h)
const BOX_CHANNELS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub label: String,
  pub confidence: f32,
}

impl Detection {
  pub fn unknown() -> Self {
    Self {
      label: UNKNOWN_LABEL.to_string(),
      confidence: 0.0,
    }
  }

  pub fn is_unknown(&self) -> bool {
    self.label == UNKNOWN_LABEL
  }
}

/// 单次检测得到的去重标签集合，保持首次出现的顺序
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionSet {
  labels: Vec<String>,
}

impl DetectionSet {
  pub fn unknown() -> Self {
    Self {
      labels: vec![UNKNOWN_LABEL.to_string()],
    }
  }

  pub fn from_detections(detections: &[Detection]) -> Self {
    detections.iter().map(|d| d.label.clone()).collect()
  }

  pub fn insert(&mut self, label: impl Into<String>) -> bool {
    let label = label.into();
    if self.contains(&label) {
      return false;
    }
    self.labels.push(label);
    true
  }

  pub fn remove(&mut self, label: &str) -> bool {
    let before = self.labels.len();
    self.labels.retain(|l| l != label);
    before != self.labels.len()
  }

  pub fn contains(&self, label: &str) -> bool {
    self.labels.iter().any(|l| l == label)
  }

  pub fn labels(&self) -> &[String] {
    &self.labels
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  /// 是否只有哨兵标签（或为空），即没有任何真实检测
  pub fn is_unknown(&self) -> bool {
    self.labels.iter().all(|l| l == UNKNOWN_LABEL)
  }
}

impl<S: Into<String>> FromIterator<S> for DetectionSet {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    let mut set = DetectionSet::default();
    for label in iter {
      set.insert(label);
    }
    set
  }
}

/// 将检测输出 (1, 4 + 类别数, 锚点数) 解码为按类别序排列的检测结果。
///
/// 每个类别取所有锚点上的最大置信度，严格大于 `threshold` 才算检测到；
/// 若没有任何类别超过阈值，返回唯一的哨兵 `("unknown", 0)`，从不返回空序列。
pub fn decode(
  output: &Tensor,
  labels: &LabelTable,
  threshold: f32,
) -> Result<Vec<Detection>, InferenceError> {
  let view = output.view::<3>()?;
  let [batch, channels, anchors] = view.dims();
  let num_classes = labels.len();

  if batch < 1 || channels < BOX_CHANNELS + num_classes {
    error!(
      "检测输出形状 {} 不足以容纳 {} 个类别",
      output.shape(),
      num_classes
    );
    return Err(InferenceError::OutputShape(format!(
      "期望 (1, >= {}, N), 实际 {}",
      BOX_CHANNELS + num_classes,
      output.shape()
    )));
  }

  let mut detections = Vec::new();
  for class in 0..num_classes {
    let channel = BOX_CHANNELS + class;
    let scores = view
      .lane([0, channel, 0])
      .ok_or_else(|| InferenceError::OutputShape(format!("缺少第 {} 个类别通道", channel)))?;

    let max_confidence = scores.iter().copied().fold(f32::NEG_INFINITY, |max, score| {
      if score > max { score } else { max }
    });
    debug!("maxProbability[{}]: {}", channel, max_confidence);

    if max_confidence > threshold
      && let Some(label) = labels.get(class)
    {
      info!("检测到的类别: {}，置信度: {}", label, max_confidence);
      detections.push(Detection {
        label: label.to_string(),
        confidence: max_confidence,
      });
    }
  }

  debug!("解码 {} 个锚点，检测到 {} 个类别", anchors, detections.len());

  if detections.is_empty() {
    return Ok(vec![Detection::unknown()]);
  }
  Ok(detections)
}

/// 检测模型：推理后直接解码为标签序列
pub struct Detector<E> {
  handle: ModelHandle<E>,
  labels: LabelTable,
  threshold: f32,
  input_size: TargetSize,
}

impl<E: InferenceEngine> Detector<E> {
  /// 模型输入必须为 (1, H, W, 3)，否则视为无效模型
  pub fn new(
    handle: ModelHandle<E>,
    labels: LabelTable,
    threshold: f32,
  ) -> Result<Self, ModelLoadError> {
    let input_size = handle.image_input_size()?;
    Ok(Self {
      handle,
      labels,
      threshold,
      input_size,
    })
  }
}

impl<E: InferenceEngine> Model for Detector<E> {
  type Output = Vec<Detection>;
  type Error = InferenceError;

  fn input_size(&self) -> TargetSize {
    self.input_size
  }

  fn infer(&self, input: &Tensor) -> Result<Self::Output, Self::Error> {
    let output = self.handle.run(input)?;
    decode(&output, &self.labels, self.threshold)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::TensorShape;

  const ANCHORS: usize = 8400;

  fn detector_output(fill: impl Fn(usize, usize) -> f32) -> Tensor {
    let channels = 11;
    let data = (0..channels * ANCHORS)
      .map(|i| fill(i / ANCHORS, i % ANCHORS))
      .collect();
    Tensor::from_vec(TensorShape::new([1, channels, ANCHORS]), data).unwrap()
  }

  #[test]
  fn keeps_max_confidence_per_class() {
    let output = detector_output(|channel, anchor| match channel {
      0..=3 => 100.0,
      5 if anchor == 4242 => 0.95,
      5 => 0.5,
      _ => 0.3,
    });

    let detections = decode(&output, &LabelTable::default(), 0.7).unwrap();
    assert_eq!(
      detections,
      vec![Detection {
        label: "虎形尊".to_string(),
        confidence: 0.95,
      }]
    );
  }

  #[test]
  fn threshold_is_strict() {
    let at_threshold = detector_output(|channel, anchor| {
      if channel == 4 && anchor == 0 { 0.7 } else { 0.0 }
    });
    assert_eq!(
      decode(&at_threshold, &LabelTable::default(), 0.7).unwrap(),
      vec![Detection::unknown()]
    );

    let above = detector_output(|channel, anchor| {
      if channel == 4 && anchor == 0 { 0.70001 } else { 0.0 }
    });
    let detections = decode(&above, &LabelTable::default(), 0.7).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].label, "蟠龍方壺");
  }

  #[test]
  fn preserves_class_order() {
    let output = detector_output(|channel, anchor| match (channel, anchor) {
      (10, 7) => 0.99,
      (6, 8000) => 0.8,
      (4, 1) => 0.75,
      _ => 0.1,
    });
    let labels: Vec<_> = decode(&output, &LabelTable::default(), 0.7)
      .unwrap()
      .into_iter()
      .map(|d| d.label)
      .collect();
    assert_eq!(labels, vec!["蟠龍方壺", "獸形器座", "三彩加藍人面鎮墓獸"]);
  }

  #[test]
  fn never_returns_empty() {
    let output = detector_output(|_, _| 0.0);
    let detections = decode(&output, &LabelTable::default(), 0.7).unwrap();
    assert_eq!(detections, vec![Detection::unknown()]);
    assert!(detections[0].is_unknown());
  }

  #[test]
  fn box_channels_are_ignored() {
    let output = detector_output(|channel, _| if channel < 4 { 1.0 } else { 0.0 });
    assert_eq!(
      decode(&output, &LabelTable::default(), 0.7).unwrap(),
      vec![Detection::unknown()]
    );
  }

  #[test]
  fn decoding_is_deterministic() {
    let output = detector_output(|channel, anchor| ((channel * 31 + anchor * 7) % 100) as f32 / 99.0);
    let first = decode(&output, &LabelTable::default(), 0.7).unwrap();
    let second = decode(&output, &LabelTable::default(), 0.7).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn rejects_too_few_channels() {
    let output = Tensor::filled(TensorShape::new([1, 8, 16]), 0.9);
    assert!(matches!(
      decode(&output, &LabelTable::default(), 0.7),
      Err(InferenceError::OutputShape(_))
    ));

    let output = Tensor::filled(TensorShape::new([11, 16]), 0.9);
    assert!(matches!(
      decode(&output, &LabelTable::default(), 0.7),
      Err(InferenceError::Tensor(_))
    ));
  }

  #[test]
  fn detection_set_deduplicates_in_order() {
    let set: DetectionSet = ["虎形尊", "三彩馬", "虎形尊"].into_iter().collect();
    assert_eq!(set.labels(), &["虎形尊".to_string(), "三彩馬".to_string()]);
    assert!(!set.is_unknown());
    assert!(DetectionSet::unknown().is_unknown());
  }

  struct FixedShapeEngine(TensorShape);

  impl InferenceEngine for FixedShapeEngine {
    fn input_shape(&self) -> &TensorShape {
      &self.0
    }

    fn output_shape(&self) -> Option<&TensorShape> {
      None
    }

    fn execute(&mut self, _input: &Tensor) -> Result<Tensor, InferenceError> {
      Ok(Tensor::filled(TensorShape::new([1, 11, 4]), 0.0))
    }
  }

  #[test]
  fn detector_derives_input_size_from_nhwc_model() {
    let handle = ModelHandle::new("YOLO", FixedShapeEngine(TensorShape::nhwc(480, 640, 3)));
    let detector = Detector::new(handle, LabelTable::default(), 0.7).unwrap();
    assert_eq!(detector.input_size(), TargetSize::new(640, 480));
  }

  #[test]
  fn detector_rejects_channels_first_model() {
    let handle = ModelHandle::new(
      "YOLO",
      FixedShapeEngine(TensorShape::new([1, 3, 640, 640])),
    );
    assert!(matches!(
      Detector::new(handle, LabelTable::default(), 0.7),
      Err(ModelLoadError::ModelInvalid(_))
    ));
  }
}
