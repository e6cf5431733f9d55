// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/labels.rs - 类别标签
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

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> i32;
  fn from_label_id(id: i32) -> Self;
}

/// SSD 输出类别 `c` 对应 COCO 编号 `c + 1`，数据集中未使用的编号记为 `???`
const COCO_LABELS: [&str; 90] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "???",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "???",
  "backpack",
  "umbrella",
  "???",
  "???",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "???",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "???",
  "dining table",
  "???",
  "???",
  "toilet",
  "???",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "???",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CocoLabel(i32);

impl WithLabel for CocoLabel {
  fn to_label_str(&self) -> String {
    usize::try_from(self.0)
      .ok()
      .and_then(|idx| COCO_LABELS.get(idx))
      .map(|name| name.to_string())
      .unwrap_or_else(|| format!("unknown({})", self.0))
  }

  fn to_label_id(&self) -> i32 {
    self.0
  }

  fn from_label_id(id: i32) -> Self {
    CocoLabel(id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn coco_names() {
    assert_eq!(CocoLabel::from_label_id(0).to_label_str(), "person");
    assert_eq!(CocoLabel::from_label_id(17).to_label_str(), "dog");
    assert_eq!(CocoLabel::from_label_id(89).to_label_str(), "toothbrush");
    assert_eq!(CocoLabel::from_label_id(90).to_label_str(), "unknown(90)");
    assert_eq!(CocoLabel::from_label_id(-1).to_label_str(), "unknown(-1)");
  }
}
