// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 检测聚合器 (Detection Aggregator)
// 当前检测集 (整体替换) + 历史记录 (只增不减) + 类别计数 + 检测精度 + 危险告警

use std::collections::BTreeMap;

use super::alerts::AlertEngine;
use super::types::{AlertRecord, Category, Detection};

/// 检测精度的裁剪区间
pub const ACCURACY_FLOOR: f32 = 0.6;
pub const ACCURACY_CEIL: f32 = 0.99;

#[derive(Debug, Clone)]
pub struct DetectionAggregator {
    current: Vec<Detection>,
    history: Vec<Detection>,
    counts: BTreeMap<Category, u64>,
    detection_accuracy: f32,
    accuracy_bounds: (f32, f32),
    passes: u64,
}

impl Default for DetectionAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionAggregator {
    pub fn new() -> Self {
        Self::with_accuracy_bounds(ACCURACY_FLOOR, ACCURACY_CEIL)
    }

    pub fn with_accuracy_bounds(floor: f32, ceil: f32) -> Self {
        let (floor, ceil) = if floor <= ceil { (floor, ceil) } else { (ceil, floor) };
        Self {
            current: Vec::new(),
            history: Vec::new(),
            counts: BTreeMap::new(),
            detection_accuracy: 0.0,
            accuracy_bounds: (floor, ceil),
            passes: 0,
        }
    }

    /// 接收一轮检测结果
    ///
    /// 当前集整体替换 (不合并), 历史按顺序追加, 每个危险检测生成一条告警。
    /// 返回本轮产生的告警。
    pub fn ingest(
        &mut self,
        detections: Vec<Detection>,
        alerts: &mut AlertEngine,
    ) -> Vec<AlertRecord> {
        self.passes += 1;

        if !detections.is_empty() {
            let mean = detections.iter().map(|d| d.confidence()).sum::<f32>()
                / detections.len() as f32;
            let (floor, ceil) = self.accuracy_bounds;
            self.detection_accuracy = mean.clamp(floor, ceil);
        }

        let mut raised = Vec::new();
        for det in &detections {
            *self.counts.entry(det.category()).or_insert(0) += 1;
            if det.is_hazard() {
                raised.push(alerts.raise(det));
            }
        }

        self.history.extend(detections.iter().cloned());
        self.current = detections;
        raised
    }

    pub fn current(&self) -> &[Detection] {
        &self.current
    }

    pub fn history(&self) -> &[Detection] {
        &self.history
    }

    pub fn counts(&self) -> &BTreeMap<Category, u64> {
        &self.counts
    }

    pub fn category_count(&self, category: Category) -> u64 {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    /// 尚无非空轮次时为 0.0
    pub fn detection_accuracy(&self) -> f32 {
        self.detection_accuracy
    }

    /// 当前集中的危险检测数
    pub fn hazard_count(&self) -> usize {
        self.current.iter().filter(|d| d.is_hazard()).count()
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::Rect;

    fn det(category: Category, confidence: f32) -> Detection {
        Detection::new(
            format!("{} #1", category),
            category,
            confidence,
            Rect::new(0.1, 0.1, 0.2, 0.2),
        )
    }

    #[test]
    fn test_current_replaced_history_appended() {
        let mut agg = DetectionAggregator::new();
        let mut alerts = AlertEngine::new();
        agg.ingest(
            vec![det(Category::Toolbox, 0.7), det(Category::Laptop, 0.8)],
            &mut alerts,
        );
        let second = vec![
            det(Category::Toolbox, 0.9),
            det(Category::MedicalKit, 0.6),
            det(Category::SpaceHelmet, 0.75),
        ];
        let second_ids: Vec<_> = second.iter().map(|d| d.id()).collect();
        agg.ingest(second, &mut alerts);

        assert_eq!(agg.history().len(), 5);
        let current_ids: Vec<_> = agg.current().iter().map(|d| d.id()).collect();
        assert_eq!(current_ids, second_ids);
        assert_eq!(agg.category_count(Category::Toolbox), 2);
        assert_eq!(agg.category_count(Category::OxygenTank), 0);
        assert_eq!(agg.passes(), 2);
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_accuracy_clamped() {
        let mut agg = DetectionAggregator::new();
        let mut alerts = AlertEngine::new();
        agg.ingest(vec![det(Category::Toolbox, 0.5)], &mut alerts);
        assert!((agg.detection_accuracy() - 0.6).abs() < 1e-6);
        agg.ingest(vec![det(Category::Toolbox, 1.0)], &mut alerts);
        assert!((agg.detection_accuracy() - 0.99).abs() < 1e-6);
        agg.ingest(
            vec![det(Category::Toolbox, 0.7), det(Category::Laptop, 0.9)],
            &mut alerts,
        );
        assert!((agg.detection_accuracy() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_empty_pass_keeps_accuracy_and_clears_current() {
        let mut agg = DetectionAggregator::new();
        let mut alerts = AlertEngine::new();
        assert_eq!(agg.detection_accuracy(), 0.0);
        agg.ingest(vec![det(Category::Toolbox, 0.8)], &mut alerts);
        let before = agg.detection_accuracy();
        agg.ingest(Vec::new(), &mut alerts);
        assert_eq!(agg.detection_accuracy(), before);
        assert!(agg.current().is_empty());
        assert_eq!(agg.history().len(), 1);
    }

    #[test]
    fn test_one_alert_per_hazard_per_pass() {
        let mut agg = DetectionAggregator::new();
        let mut alerts = AlertEngine::new();
        let raised = agg.ingest(
            vec![
                det(Category::FireExtinguisher, 0.82),
                det(Category::Toolbox, 0.9),
                det(Category::OxygenTank, 0.65),
            ],
            &mut alerts,
        );
        assert_eq!(raised.len(), 2);
        assert_eq!(agg.hazard_count(), 2);

        // 再次出现同样的危险物体, 不去重
        agg.ingest(vec![det(Category::FireExtinguisher, 0.82)], &mut alerts);
        assert_eq!(alerts.len(), 3);
    }
}
