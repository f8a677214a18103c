// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 告警引擎 (Alert Engine)

use std::collections::{vec_deque, VecDeque};

use chrono::Utc;
use tracing::warn;

use super::types::{AlertRecord, Detection, Severity};

/// 告警列表 (最新在前, 进程生命周期内无上限增长)
#[derive(Debug, Default, Clone)]
pub struct AlertEngine {
    alerts: VecDeque<AlertRecord>,
}

impl AlertEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为一个检测生成告警并插入列表头部
    ///
    /// 不去重: 同一物体在每一轮都会再次告警。
    pub fn raise(&mut self, detection: &Detection) -> AlertRecord {
        let category = detection.category();
        let alert = AlertRecord {
            title: format!("{} Detected", category),
            message: format!(
                "A {} has been detected with {}% confidence.",
                category.display_name().to_lowercase(),
                detection.confidence_percent()
            ),
            severity: Severity::Warning,
            timestamp: Utc::now(),
            is_read: false,
        };
        warn!("🚨 {}: {}", alert.title, alert.message);
        self.alerts.push_front(alert.clone());
        alert
    }

    /// 按时间倒序遍历
    pub fn iter(&self) -> vec_deque::Iter<'_, AlertRecord> {
        self.alerts.iter()
    }

    /// 索引 0 为最新告警
    pub fn get(&self, index: usize) -> Option<&AlertRecord> {
        self.alerts.get(index)
    }

    pub fn to_vec(&self) -> Vec<AlertRecord> {
        self.alerts.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.alerts.iter().filter(|a| !a.is_read).count()
    }

    /// 标记已读, 索引越界返回 false
    pub fn mark_read(&mut self, index: usize) -> bool {
        match self.alerts.get_mut(index) {
            Some(alert) => {
                alert.is_read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&mut self) {
        self.alerts.iter_mut().for_each(|a| a.is_read = true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::{Category, Rect};

    fn det(category: Category, confidence: f32) -> Detection {
        Detection::new("x", category, confidence, Rect::new(0.0, 0.0, 0.1, 0.1))
    }

    #[test]
    fn test_alert_text() {
        let mut engine = AlertEngine::new();
        let alert = engine.raise(&det(Category::FireExtinguisher, 0.82));
        assert_eq!(alert.title, "Fire Extinguisher Detected");
        assert_eq!(
            alert.message,
            "A fire extinguisher has been detected with 82% confidence."
        );
        assert_eq!(alert.severity, Severity::Warning);
        assert!(!alert.is_read);
    }

    #[test]
    fn test_most_recent_first() {
        let mut engine = AlertEngine::new();
        engine.raise(&det(Category::FireExtinguisher, 0.9));
        engine.raise(&det(Category::OxygenTank, 0.7));
        assert_eq!(engine.len(), 2);
        assert_eq!(engine.get(0).unwrap().title, "Oxygen Tank Detected");
        assert_eq!(engine.get(1).unwrap().title, "Fire Extinguisher Detected");
        assert!(engine.get(2).is_none());
    }

    #[test]
    fn test_iteration_order_matches_raise_order() {
        let mut engine = AlertEngine::new();
        let order = [
            Category::FireExtinguisher,
            Category::OxygenTank,
            Category::FireExtinguisher,
        ];
        for (i, category) in order.iter().enumerate() {
            engine.raise(&det(*category, 0.5 + i as f32 * 0.1));
        }

        // 最新在前: 70% → 60% → 50%
        let percents: Vec<u32> = engine
            .iter()
            .map(|a| {
                a.message
                    .split_whitespace()
                    .find_map(|w| w.strip_suffix('%').and_then(|p| p.parse().ok()))
                    .unwrap()
            })
            .collect();
        assert_eq!(percents, vec![70, 60, 50]);
        assert_eq!(engine.to_vec(), engine.iter().cloned().collect::<Vec<_>>());
    }

    #[test]
    fn test_no_dedup_and_read_state() {
        let mut engine = AlertEngine::new();
        let d = det(Category::OxygenTank, 0.6);
        engine.raise(&d);
        engine.raise(&d);
        assert_eq!(engine.unread_count(), 2);
        assert!(engine.mark_read(1));
        assert!(!engine.mark_read(5));
        assert_eq!(engine.unread_count(), 1);
        engine.mark_all_read();
        assert_eq!(engine.unread_count(), 0);
    }
}
