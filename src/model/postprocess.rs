// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/postprocess.rs - 检测输出解码与非极大值抑制
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use tracing::debug;

use crate::{
  error::DetectError,
  model::{DetectItem, DetectResult, WithLabel},
};

/// 框几何信息所占的行数: cx, cy, w, h
pub const BOX_ROWS: usize = 4;

/// 输出张量 `[4 + num_classes, num_anchors]` 的布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLayout {
  /// 网络输入边长
  pub input_side: u32,
  /// 类别数量
  pub num_classes: usize,
  /// 锚点数量
  pub num_anchors: usize,
}

impl OutputLayout {
  pub fn rows(&self) -> usize {
    BOX_ROWS.saturating_add(self.num_classes)
  }

  /// 输出张量至少需要的元素个数，溢出时为 `usize::MAX`
  pub fn len(&self) -> usize {
    self.checked_len().unwrap_or(usize::MAX)
  }

  /// 输出张量元素个数，超出 `usize` 表示范围时为 None
  pub fn checked_len(&self) -> Option<usize> {
    BOX_ROWS
      .checked_add(self.num_classes)?
      .checked_mul(self.num_anchors)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 截断为整数并规范化后的像素矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelRect {
  x_min: i64,
  y_min: i64,
  x_max: i64,
  y_max: i64,
}

impl PixelRect {
  fn from_bbox(bbox: &[f32; 4]) -> Self {
    let (x1, y1, x2, y2) = (
      bbox[0] as i64,
      bbox[1] as i64,
      bbox[2] as i64,
      bbox[3] as i64,
    );
    Self {
      x_min: x1.min(x2),
      y_min: y1.min(y2),
      x_max: x1.max(x2),
      y_max: y1.max(y2),
    }
  }

  // 坐标经 `as i64` 饱和，边长用 i128 求差，面积用 f64 求积以免溢出
  fn area(&self) -> f64 {
    span(self.x_min, self.x_max) * span(self.y_min, self.y_max)
  }

  fn intersection_area(&self, other: &Self) -> f64 {
    let x_min = self.x_min.max(other.x_min);
    let y_min = self.y_min.max(other.y_min);
    let x_max = self.x_max.min(other.x_max);
    let y_max = self.y_max.min(other.y_max);
    if x_min >= x_max || y_min >= y_max {
      return 0.0;
    }
    span(x_min, x_max) * span(y_min, y_max)
  }
}

fn span(min: i64, max: i64) -> f64 {
  (max as i128 - min as i128) as f64
}

/// 计算两个边界框的 IoU
///
/// 在整数像素矩形上计算；两个面积均为零时返回 0。
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let ra = PixelRect::from_bbox(a);
  let rb = PixelRect::from_bbox(b);
  let intersection = ra.intersection_area(&rb);
  let union = ra.area() + rb.area() - intersection;
  if union <= 0.0 {
    return 0.0;
  }
  (intersection / union) as f32
}

/// 逐锚点选取最高类别分数，保留不低于阈值的候选框并映射回原图坐标
pub fn decode_candidates<T: WithLabel>(
  output: &[f32],
  layout: &OutputLayout,
  confidence_threshold: f32,
  original_size: (u32, u32),
) -> Result<Vec<DetectItem<T>>, DetectError> {
  let expected = layout.len();
  if output.len() < expected {
    return Err(DetectError::shape_mismatch(expected, output.len()));
  }

  let anchors = layout.num_anchors;
  let side = layout.input_side as f32;
  let (original_w, original_h) = (original_size.0 as f32, original_size.1 as f32);

  let mut candidates = Vec::new();
  for idx in 0..anchors {
    let (score, class_id) = {
      let mut max_score = f32::NEG_INFINITY;
      let mut cls_idx = 0usize;
      for c in 0..layout.num_classes {
        let s = output[anchors * (BOX_ROWS + c) + idx];
        if s > max_score {
          max_score = s;
          cls_idx = c;
        }
      }
      (max_score, cls_idx as u32)
    };

    if score < confidence_threshold {
      continue;
    }

    let cx = output[idx];
    let cy = output[anchors + idx];
    let w = output[2 * anchors + idx];
    let h = output[3 * anchors + idx];

    candidates.push(DetectItem {
      kind: T::from_label_id(class_id),
      score,
      bbox: [
        // 先除以输入边长再乘原图尺寸，f32 舍入结果依赖该顺序
        (cx - w / 2.0) / side * original_w,
        (cy - h / 2.0) / side * original_h,
        (cx + w / 2.0) / side * original_w,
        (cy + h / 2.0) / side * original_h,
      ],
    });
  }

  debug!("置信度过滤后剩余 {} 个候选框", candidates.len());
  Ok(candidates)
}

/// 非极大值抑制
///
/// 候选框按置信度升序遍历，与已保留的任一框 IoU 超过阈值即丢弃。
/// 由于升序遍历，重叠时保留的是置信度较低的框；结果保持升序。
pub fn non_max_suppression<T>(
  mut candidates: Vec<DetectItem<T>>,
  nms_threshold: f32,
) -> Vec<DetectItem<T>> {
  candidates.sort_by(|a, b| a.score.total_cmp(&b.score));

  let mut result: Vec<DetectItem<T>> = Vec::with_capacity(candidates.len());
  for candidate in candidates {
    let overlaps = result
      .iter()
      .any(|kept| iou(&candidate.bbox, &kept.bbox) > nms_threshold);
    if !overlaps {
      result.push(candidate);
    }
  }

  result
}

/// 解码 + 非极大值抑制
pub fn postprocess<T: WithLabel>(
  output: &[f32],
  layout: &OutputLayout,
  confidence_threshold: f32,
  nms_threshold: f32,
  original_size: (u32, u32),
) -> Result<DetectResult<T>, DetectError> {
  let candidates = decode_candidates(output, layout, confidence_threshold, original_size)?;
  let items = non_max_suppression(candidates, nms_threshold);
  debug!("检测到 {} 个物体", items.len());
  Ok(DetectResult::from(items))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::CocoLabel;

  const SIDE: u32 = 640;

  struct Anchor {
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
    class: usize,
    score: f32,
  }

  fn layout(num_classes: usize, num_anchors: usize) -> OutputLayout {
    OutputLayout {
      input_side: SIDE,
      num_classes,
      num_anchors,
    }
  }

  fn synth_output(layout: &OutputLayout, anchors: &[Anchor]) -> Vec<f32> {
    let n = layout.num_anchors;
    let mut output = vec![0f32; layout.len()];
    for (i, a) in anchors.iter().enumerate() {
      output[i] = a.cx;
      output[n + i] = a.cy;
      output[2 * n + i] = a.w;
      output[3 * n + i] = a.h;
      output[(BOX_ROWS + a.class) * n + i] = a.score;
    }
    output
  }

  fn item(score: f32, bbox: [f32; 4]) -> DetectItem<CocoLabel> {
    DetectItem {
      kind: CocoLabel(0),
      score,
      bbox,
    }
  }

  #[test]
  fn test_single_anchor_above_threshold() {
    let layout = layout(80, 16);
    let output = synth_output(
      &layout,
      &[Anchor {
        cx: 320.0,
        cy: 160.0,
        w: 64.0,
        h: 32.0,
        class: 7,
        score: 0.8,
      }],
    );

    let result: DetectResult<CocoLabel> = postprocess(&output, &layout, 0.5, 0.7, (1280, 320)).unwrap();
    assert_eq!(result.len(), 1);
    let det = &result.items[0];
    assert_eq!(det.kind, CocoLabel(7));
    assert_eq!(det.score, 0.8);
    // x 方向缩放 2.0，y 方向缩放 0.5
    assert_eq!(det.bbox, [576.0, 72.0, 704.0, 88.0]);
  }

  #[test]
  fn test_all_scores_below_threshold() {
    let layout = layout(3, 8);
    let anchors: Vec<Anchor> = (0..8)
      .map(|i| Anchor {
        cx: 10.0 * i as f32,
        cy: 10.0,
        w: 5.0,
        h: 5.0,
        class: i % 3,
        score: 0.49,
      })
      .collect();
    let output = synth_output(&layout, &anchors);
    let result: DetectResult<CocoLabel> = postprocess(&output, &layout, 0.5, 0.7, (640, 640)).unwrap();
    assert!(result.is_empty());
  }

  #[test]
  fn test_threshold_is_inclusive() {
    let layout = layout(2, 1);
    let output = synth_output(
      &layout,
      &[Anchor {
        cx: 50.0,
        cy: 50.0,
        w: 10.0,
        h: 10.0,
        class: 1,
        score: 0.5,
      }],
    );
    let candidates: Vec<DetectItem<CocoLabel>> =
      decode_candidates(&output, &layout, 0.5, (640, 640)).unwrap();
    assert_eq!(candidates.len(), 1);
  }

  #[test]
  fn test_class_ties_pick_lowest_index() {
    let layout = layout(4, 1);
    let mut output = synth_output(
      &layout,
      &[Anchor {
        cx: 50.0,
        cy: 50.0,
        w: 10.0,
        h: 10.0,
        class: 3,
        score: 0.9,
      }],
    );
    output[BOX_ROWS + 1] = 0.9;
    let candidates: Vec<DetectItem<CocoLabel>> =
      decode_candidates(&output, &layout, 0.5, (640, 640)).unwrap();
    assert_eq!(candidates[0].kind, CocoLabel(1));
  }

  #[test]
  fn test_short_output_is_shape_mismatch() {
    let layout = layout(80, 8400);
    let output = vec![0f32; 84 * 8400 - 1];
    match decode_candidates::<CocoLabel>(&output, &layout, 0.5, (640, 640)) {
      Err(DetectError::ShapeMismatch { expected, actual }) => {
        assert_eq!(expected, 84 * 8400);
        assert_eq!(actual, 84 * 8400 - 1);
      }
      other => panic!("unexpected result: {:?}", other),
    }
  }

  #[test]
  fn test_iou_identical_and_disjoint() {
    let a = [10.0, 10.0, 20.0, 20.0];
    let b = [30.0, 30.0, 40.0, 40.0];
    assert_eq!(iou(&a, &a), 1.0);
    assert_eq!(iou(&a, &b), 0.0);
    // 仅边相接
    assert_eq!(iou(&a, &[20.0, 10.0, 30.0, 20.0]), 0.0);
  }

  #[test]
  fn test_iou_canonicalizes_and_truncates() {
    let a = [20.9, 20.9, 10.2, 10.2];
    let b = [10.0, 10.0, 20.0, 20.0];
    assert_eq!(iou(&a, &b), 1.0);
  }

  #[test]
  fn test_iou_zero_area_is_not_a_match() {
    let a = [5.0, 5.0, 5.0, 5.0];
    let b = [5.5, 5.0, 5.0, 9.0];
    assert_eq!(iou(&a, &b), 0.0);
    assert_eq!(iou(&a, &a), 0.0);
  }

  #[test]
  fn test_iou_is_symmetric() {
    let boxes = [
      [0.0, 0.0, 10.0, 10.0],
      [5.0, 5.0, 15.0, 15.0],
      [12.0, 3.0, 2.0, 8.0],
      [-4.5, -4.5, 6.2, 3.3],
      [7.0, 7.0, 7.0, 7.0],
      [100.0, 100.0, 200.0, 150.0],
    ];
    for a in &boxes {
      for b in &boxes {
        assert_eq!(iou(a, b), iou(b, a));
      }
    }
  }

  #[test]
  fn test_identical_boxes_keep_first_in_ascending_order() {
    let bbox = [10.0, 10.0, 50.0, 50.0];
    let result = non_max_suppression(vec![item(0.9, bbox), item(0.6, bbox)], 0.7);
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].score, 0.6);
  }

  #[test]
  fn test_disjoint_boxes_both_survive() {
    let result = non_max_suppression(
      vec![
        item(0.95, [0.0, 0.0, 10.0, 10.0]),
        item(0.55, [100.0, 100.0, 110.0, 110.0]),
      ],
      0.7,
    );
    assert_eq!(result.len(), 2);
    assert_eq!(result[0].score, 0.55);
    assert_eq!(result[1].score, 0.95);
  }

  #[test]
  fn test_suppression_keeps_lower_confidence_box() {
    let layout = layout(80, 4);
    let output = synth_output(
      &layout,
      &[
        Anchor {
          cx: 100.0,
          cy: 100.0,
          w: 50.0,
          h: 50.0,
          class: 2,
          score: 0.9,
        },
        Anchor {
          cx: 102.0,
          cy: 101.0,
          w: 50.0,
          h: 50.0,
          class: 2,
          score: 0.6,
        },
      ],
    );
    let result: DetectResult<CocoLabel> = postprocess(&output, &layout, 0.5, 0.7, (640, 640)).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].score, 0.6);
    assert_eq!(result.items[0].kind.to_label_str(), "car");
    assert_eq!(result.items[0].bbox, [77.0, 76.0, 127.0, 126.0]);
  }

  #[test]
  fn test_moderate_overlap_below_threshold_keeps_both() {
    // 整数 IoU = 1716 / 3088，低于 0.7
    let layout = layout(80, 2);
    let output = synth_output(
      &layout,
      &[
        Anchor {
          cx: 100.0,
          cy: 100.0,
          w: 50.0,
          h: 50.0,
          class: 2,
          score: 0.9,
        },
        Anchor {
          cx: 110.0,
          cy: 105.0,
          w: 48.0,
          h: 48.0,
          class: 2,
          score: 0.6,
        },
      ],
    );
    let a = [75.0, 75.0, 125.0, 125.0];
    let b = [86.0, 81.0, 134.0, 129.0];
    assert_eq!(iou(&a, &b), 1716.0 / 3088.0);

    let result: DetectResult<CocoLabel> = postprocess(&output, &layout, 0.5, 0.7, (640, 640)).unwrap();
    let scores: Vec<f32> = result.iter().map(|d| d.score).collect();
    assert_eq!(scores, vec![0.6, 0.9]);
  }

  #[test]
  fn test_suppression_is_class_agnostic() {
    let bbox = [0.0, 0.0, 40.0, 40.0];
    let mut other = item(0.8, bbox);
    other.kind = CocoLabel(5);
    let result = non_max_suppression(vec![other, item(0.7, bbox)], 0.7);
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].kind, CocoLabel(0));
  }

  #[test]
  fn test_equal_scores_keep_anchor_order() {
    let result = non_max_suppression(
      vec![
        item(0.7, [0.0, 0.0, 10.0, 10.0]),
        item(0.7, [0.0, 0.0, 10.0, 10.0]),
        item(0.7, [50.0, 50.0, 60.0, 60.0]),
      ],
      0.7,
    );
    assert_eq!(result.len(), 2);
    assert_eq!(result[0].bbox, [0.0, 0.0, 10.0, 10.0]);
    assert_eq!(result[1].bbox, [50.0, 50.0, 60.0, 60.0]);
  }

  #[test]
  fn test_iou_with_extreme_coordinates() {
    let huge = [-1e30, -1e30, 1e30, 1e30];
    let small = [0.0, 0.0, 10.0, 10.0];
    let v = iou(&huge, &small);
    assert!(v.is_finite());
    assert!((0.0..1e-6).contains(&v));
    assert_eq!(iou(&huge, &huge), 1.0);
  }

  #[test]
  fn test_decode_with_very_wide_box() {
    let layout = layout(1, 2);
    let output = synth_output(
      &layout,
      &[
        Anchor {
          cx: 0.0,
          cy: 0.0,
          w: 1e13,
          h: 1e13,
          class: 0,
          score: 0.9,
        },
        Anchor {
          cx: 100.0,
          cy: 100.0,
          w: 10.0,
          h: 10.0,
          class: 0,
          score: 0.8,
        },
      ],
    );
    let result: DetectResult<CocoLabel> = postprocess(&output, &layout, 0.5, 0.7, (640, 640)).unwrap();
    let scores: Vec<f32> = result.iter().map(|d| d.score).collect();
    assert_eq!(scores, vec![0.8, 0.9]);
  }

  #[test]
  fn test_decode_divides_before_scaling() {
    let layout = layout(1, 1);
    let output = synth_output(
      &layout,
      &[Anchor {
        cx: 100.346,
        cy: 200.0,
        w: 0.0,
        h: 0.0,
        class: 0,
        score: 0.9,
      }],
    );
    let candidates: Vec<DetectItem<CocoLabel>> =
      decode_candidates(&output, &layout, 0.5, (333, 480)).unwrap();
    // 100.346 / 640 * 333，与先算缩放比例 (333 / 640) 的结果 52.211277 不同
    assert_eq!(candidates[0].bbox, [52.21128, 150.0, 52.21128, 150.0]);
  }

  #[test]
  fn test_layout_length_overflow() {
    let huge = OutputLayout {
      input_side: SIDE,
      num_classes: usize::MAX,
      num_anchors: 2,
    };
    assert_eq!(huge.checked_len(), None);
    assert_eq!(huge.len(), usize::MAX);
    assert!(matches!(
      decode_candidates::<CocoLabel>(&[0.0; 16], &huge, 0.5, (640, 640)),
      Err(DetectError::ShapeMismatch { .. })
    ));
    assert_eq!(layout(80, 8400).checked_len(), Some(84 * 8400));
  }
}
