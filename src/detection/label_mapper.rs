// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 标签映射器 (Label Mapper)
// 原始观测 → 领域类别: 置信度过滤 → 小写化 → 有序规则表(首个命中生效) → 坐标翻转

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::types::{Category, Detection, RawObservation, Rect, MIN_CONFIDENCE};

/// 单条规则: 标签包含任一关键字即命中
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRule {
    pub keywords: Vec<String>,
    pub category: Category,
}

impl LabelRule {
    pub fn new(keywords: &[&str], category: Category) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            category,
        }
    }

    fn matches(&self, label: &str) -> bool {
        self.keywords.iter().any(|k| label.contains(k.as_str()))
    }
}

/// 默认规则表
///
/// 顺序即优先级: 同时包含 "fire" 与 "tank" 的标签归为灭火器。
static DEFAULT_RULES: Lazy<RuleTable> = Lazy::new(|| {
    RuleTable::new(vec![
        LabelRule::new(&["fire", "extinguisher"], Category::FireExtinguisher),
        LabelRule::new(&["oxygen", "tank"], Category::OxygenTank),
        LabelRule::new(&["tool", "box", "toolbox"], Category::Toolbox),
    ])
});

/// 有序规则表 (first match wins)
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTable {
    rules: Vec<LabelRule>,
}

impl RuleTable {
    pub fn new(rules: Vec<LabelRule>) -> Self {
        // 关键字统一小写, 保证与小写化后的标签比较
        let rules = rules
            .into_iter()
            .map(|r| LabelRule {
                keywords: r.keywords.iter().map(|k| k.to_lowercase()).collect(),
                category: r.category,
            })
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[LabelRule] {
        &self.rules
    }

    /// 按表顺序匹配, 返回第一个命中的类别
    pub fn match_label(&self, label: &str) -> Option<Category> {
        let label = label.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&label))
            .map(|rule| rule.category)
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        DEFAULT_RULES.clone()
    }
}

/// 模型坐标 (左下原点, y向上) → 显示坐标 (左上原点, y向下)
///
/// `y' = 1 - y - height`, x/width/height 不变。该变换是自身的逆。
pub fn model_to_display(r: Rect) -> Rect {
    Rect {
        y: 1.0 - r.y - r.height,
        ..r
    }
}

/// 标签映射器
#[derive(Debug, Clone)]
pub struct LabelMapper {
    rules: RuleTable,
    min_confidence: f32,
}

impl Default for LabelMapper {
    fn default() -> Self {
        Self::new(RuleTable::default())
    }
}

impl LabelMapper {
    pub fn new(rules: RuleTable) -> Self {
        Self {
            rules,
            min_confidence: MIN_CONFIDENCE,
        }
    }

    /// 提高过滤阈值; 低于 0.5 的值被忽略
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence.max(MIN_CONFIDENCE);
        self
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// 步骤1-4: 过滤 + 规则匹配
    pub fn category_for(&self, obs: &RawObservation) -> Option<Category> {
        // NaN 置信度同样丢弃
        if !(obs.confidence >= self.min_confidence) {
            return None;
        }
        self.rules.match_label(&obs.label)
    }

    /// 分类单个观测
    ///
    /// `ordinal` 为本轮已接受检测中的序号 (从1开始), 用于生成 "{category} #{n}"。
    pub fn classify(&self, obs: &RawObservation, ordinal: usize) -> Option<Detection> {
        let category = self.category_for(obs)?;
        let bbox = model_to_display(obs.bbox);
        Some(Detection::new(
            format!("{} #{}", category, ordinal),
            category,
            obs.confidence,
            bbox,
        ))
    }

    /// 分类一整轮推理输出, 保持输入顺序
    pub fn classify_pass(&self, observations: &[RawObservation]) -> Vec<Detection> {
        let mut accepted = Vec::new();
        for obs in observations {
            if let Some(det) = self.classify(obs, accepted.len() + 1) {
                accepted.push(det);
            }
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(label: &str, confidence: f32) -> RawObservation {
        RawObservation::new(label, confidence, Rect::new(0.1, 0.1, 0.2, 0.3))
    }

    #[test]
    fn test_low_confidence_discarded() {
        let mapper = LabelMapper::default();
        for conf in [0.0, 0.1, 0.49, 0.4999] {
            assert!(mapper.classify(&obs("fire extinguisher", conf), 1).is_none());
        }
        assert!(mapper.classify(&obs("fire extinguisher", 0.5), 1).is_some());
        assert!(mapper.classify(&obs("fire extinguisher", f32::NAN), 1).is_none());
    }

    #[test]
    fn test_first_rule_wins() {
        let mapper = LabelMapper::default();
        assert_eq!(
            mapper.category_for(&obs("fire_tank", 0.9)),
            Some(Category::FireExtinguisher)
        );
        assert_eq!(
            mapper.category_for(&obs("Oxygen Toolbox", 0.9)),
            Some(Category::OxygenTank)
        );
        assert_eq!(
            mapper.category_for(&obs("FireBox", 0.9)),
            Some(Category::FireExtinguisher)
        );
    }

    #[test]
    fn test_case_insensitive_rules() {
        let mapper = LabelMapper::default();
        assert_eq!(
            mapper.category_for(&obs("OXYGEN", 0.9)),
            Some(Category::OxygenTank)
        );
        assert_eq!(
            mapper.category_for(&obs("ToolKit", 0.9)),
            Some(Category::Toolbox)
        );
    }

    #[test]
    fn test_unmapped_label_discarded() {
        let mapper = LabelMapper::default();
        assert!(mapper.classify(&obs("person", 0.99), 1).is_none());
        assert!(mapper.classify(&obs("laptop", 0.99), 1).is_none());
    }

    #[test]
    fn test_flip_is_involution() {
        let r = Rect::new(0.1, 0.15, 0.2, 0.3);
        let once = model_to_display(r);
        assert!((once.y - 0.55).abs() < 1e-6);
        assert_eq!(once.x, r.x);
        assert_eq!(once.width, r.width);
        assert_eq!(once.height, r.height);
        let twice = model_to_display(once);
        assert!((twice.y - r.y).abs() < 1e-6);
    }

    #[test]
    fn test_pass_numbering_counts_accepted_only() {
        let mapper = LabelMapper::default();
        let dets = mapper.classify_pass(&[
            obs("toolbox", 0.9),
            obs("person", 0.9),
            obs("oxygen", 0.3),
            obs("oxygen tank", 0.8),
        ]);
        let names: Vec<_> = dets.iter().map(|d| d.name().to_string()).collect();
        assert_eq!(names, vec!["Toolbox #1", "Oxygen Tank #2"]);
    }

    #[test]
    fn test_custom_rule_table_order() {
        let rules = RuleTable::new(vec![
            LabelRule::new(&["TANK"], Category::OxygenTank),
            LabelRule::new(&["fire"], Category::FireExtinguisher),
            LabelRule::new(&["helmet"], Category::SpaceHelmet),
        ]);
        let mapper = LabelMapper::new(rules);
        assert_eq!(
            mapper.category_for(&obs("fire tank", 0.9)),
            Some(Category::OxygenTank)
        );
        assert_eq!(
            mapper.category_for(&obs("eva helmet", 0.9)),
            Some(Category::SpaceHelmet)
        );
    }

    #[test]
    fn test_threshold_cannot_drop_below_default() {
        let mapper = LabelMapper::default().with_min_confidence(0.2);
        assert_eq!(mapper.min_confidence(), MIN_CONFIDENCE);
        let mapper = LabelMapper::default().with_min_confidence(0.7);
        assert!(mapper.classify(&obs("fire", 0.6), 1).is_none());
    }
}
