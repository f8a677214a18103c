// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use crate::detection::Rect;

/// 像素坐标检测框 (左上原点), 解码阶段使用
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bbox {
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
    id: usize,
    confidence: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32, id: usize, confidence: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
            id,
            confidence,
        }
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax().min(another.xmax());
        let t = self.ymin.max(another.ymin);
        let b = self.ymax().min(another.ymax());
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union <= 0.0 {
            return 0.0;
        }
        self.intersection_area(another) / union
    }

    /// 像素框 → 模型空间归一化矩形 (左下原点, y向上)
    pub fn to_model_space(&self, image_width: f32, image_height: f32) -> Rect {
        if image_width <= 0.0 || image_height <= 0.0 {
            return Rect::default();
        }
        Rect::new(
            self.xmin / image_width,
            1.0 - self.ymax() / image_height,
            self.width / image_width,
            self.height / image_height,
        )
        .clamped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou() {
        let a = Bbox::new(0.0, 0.0, 10.0, 10.0, 0, 0.9);
        let b = Bbox::new(5.0, 0.0, 10.0, 10.0, 0, 0.8);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        let c = Bbox::new(20.0, 20.0, 5.0, 5.0, 0, 0.8);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn test_to_model_space_bottom_left() {
        // 200x100 图像中, 顶部 (y=10..40) 的框
        let b = Bbox::new(20.0, 10.0, 40.0, 30.0, 0, 0.9);
        let r = b.to_model_space(200.0, 100.0);
        assert!((r.x - 0.1).abs() < 1e-6);
        assert!((r.y - 0.6).abs() < 1e-6);
        assert!((r.width - 0.2).abs() < 1e-6);
        assert!((r.height - 0.3).abs() < 1e-6);
    }
}
