// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 检测系统数据结构定义
// Data structures for the safety equipment detection system

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ========== 公共常量 ==========

/// 低于该置信度的原始观测不会成为检测结果
pub const MIN_CONFIDENCE: f32 = 0.5;

// ========== 几何 ==========

/// 归一化矩形 (所有分量 ∈ [0,1])
///
/// 坐标系由使用方决定: 模型空间 (左下原点, y向上) 或显示空间 (左上原点, y向下)。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
    }

    /// 裁剪到单位正方形内
    pub fn clamped(&self) -> Self {
        let x = self.x.clamp(0.0, 1.0);
        let y = self.y.clamp(0.0, 1.0);
        Self {
            x,
            y,
            width: self.width.clamp(0.0, 1.0 - x),
            height: self.height.clamp(0.0, 1.0 - y),
        }
    }

    /// 缩放到像素坐标: (x1, y1, x2, y2)
    pub fn to_pixels(&self, width: u32, height: u32) -> (f32, f32, f32, f32) {
        let (w, h) = (width as f32, height as f32);
        (self.x * w, self.y * h, self.max_x() * w, self.max_y() * h)
    }
}

// ========== 原始观测 ==========

/// 推理后端的原始输出单元 (未过滤, 模型坐标空间)
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub label: String,
    pub confidence: f32,
    pub bbox: Rect,
}

impl RawObservation {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: Rect) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

// ========== 领域类别 ==========

/// 封闭的设备类别集合 (无 "unknown")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    FireExtinguisher,
    OxygenTank,
    Toolbox,
    Laptop,
    MedicalKit,
    WaterContainer,
    SpaceHelmet,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::FireExtinguisher,
        Category::OxygenTank,
        Category::Toolbox,
        Category::Laptop,
        Category::MedicalKit,
        Category::WaterContainer,
        Category::SpaceHelmet,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            Category::FireExtinguisher => "Fire Extinguisher",
            Category::OxygenTank => "Oxygen Tank",
            Category::Toolbox => "Toolbox",
            Category::Laptop => "Laptop",
            Category::MedicalKit => "Medical Kit",
            Category::WaterContainer => "Water Container",
            Category::SpaceHelmet => "Space Helmet",
        }
    }

    /// 危险类别: 灭火器、氧气罐 (触发告警)
    pub fn is_hazard(&self) -> bool {
        matches!(self, Category::FireExtinguisher | Category::OxygenTank)
    }

    /// 叠加层颜色 (RGB)
    pub fn color(&self) -> (u8, u8, u8) {
        match self {
            Category::FireExtinguisher => (255, 0, 0), // 红色
            Category::OxygenTank => (0, 128, 255),     // 天蓝
            Category::Toolbox => (255, 128, 0),        // 橙色
            Category::Laptop => (128, 0, 255),         // 紫色
            Category::MedicalKit => (0, 255, 0),       // 绿色
            Category::WaterContainer => (0, 255, 255), // 青色
            Category::SpaceHelmet => (255, 255, 255),  // 白色
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

// ========== 检测结果 ==========

static NEXT_DETECTION_ID: AtomicU64 = AtomicU64::new(1);

/// 已分类、已定位的检测结果 (显示坐标空间, 创建后不可变)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    id: u64,
    name: String,
    category: Category,
    confidence: f32,
    bbox: Rect,
    timestamp: DateTime<Utc>,
}

impl Detection {
    /// `bbox` 必须已经是显示坐标
    pub fn new(name: impl Into<String>, category: Category, confidence: f32, bbox: Rect) -> Self {
        Self {
            id: NEXT_DETECTION_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            category,
            confidence,
            bbox,
            timestamp: Utc::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> Rect {
        self.bbox
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_hazard(&self) -> bool {
        self.category.is_hazard()
    }

    /// 置信度百分比 (四舍五入)
    pub fn confidence_percent(&self) -> u32 {
        (self.confidence * 100.0).round().max(0.0) as u32
    }
}

// ========== 告警 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// 告警记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hazard_categories() {
        let hazards: Vec<_> = Category::ALL.iter().filter(|c| c.is_hazard()).collect();
        assert_eq!(
            hazards,
            vec![&Category::FireExtinguisher, &Category::OxygenTank]
        );
    }

    #[test]
    fn test_detection_ids_are_unique() {
        let r = Rect::new(0.1, 0.1, 0.2, 0.2);
        let a = Detection::new("Toolbox #1", Category::Toolbox, 0.7, r);
        let b = Detection::new("Toolbox #1", Category::Toolbox, 0.7, r);
        assert_ne!(a.id(), b.id());
        assert!(!a.is_hazard());
    }

    #[test]
    fn test_confidence_percent_rounds() {
        let r = Rect::default();
        let d = Detection::new("x", Category::OxygenTank, 0.826, r);
        assert_eq!(d.confidence_percent(), 83);
        let d = Detection::new("x", Category::OxygenTank, 0.824, r);
        assert_eq!(d.confidence_percent(), 82);
    }

    #[test]
    fn test_rect_clamped_and_pixels() {
        let r = Rect::new(-0.1, 0.9, 0.5, 0.3).clamped();
        assert_eq!(r.x, 0.0);
        assert!((r.max_y() - 1.0).abs() < 1e-6);

        let (x1, y1, x2, y2) = Rect::new(0.25, 0.5, 0.5, 0.25).to_pixels(200, 100);
        assert_eq!((x1, y1, x2, y2), (50.0, 50.0, 150.0, 75.0));
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
    }
}
