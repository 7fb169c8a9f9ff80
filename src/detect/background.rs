use image::GrayImage;

use super::mask::{to_mean, MeanImage};

/// Running-average estimate of the motionless scene.
///
/// Seeded by the first frame, then pulled toward each new frame by exponential decay.
#[derive(Debug, Default)]
pub struct BackgroundModel {
    mean: Option<MeanImage>,
}

impl BackgroundModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_seeded(&self) -> bool {
        self.mean.is_some()
    }

    /// True when `plane` can be compared against the current estimate.
    pub fn accepts(&self, plane: &GrayImage) -> bool {
        self.mean
            .as_ref()
            .is_some_and(|mean| mean.dimensions() == plane.dimensions())
    }

    pub fn seed(&mut self, plane: &GrayImage) {
        self.mean = Some(to_mean(plane));
    }

    /// `mean = (1 - weight) * mean + weight * plane`. No-op before seeding or when the
    /// geometry differs.
    pub fn accumulate(&mut self, plane: &GrayImage, weight: f32) {
        if weight <= 0.0 || !self.accepts(plane) {
            return;
        }
        let Some(mean) = self.mean.as_mut() else {
            return;
        };
        for (m, p) in mean.pixels_mut().zip(plane.pixels()) {
            m[0] += weight * (f32::from(p[0]) - m[0]);
        }
    }

    pub fn mean(&self) -> Option<&MeanImage> {
        self.mean.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn plane(value: u8) -> GrayImage {
        GrayImage::from_pixel(2, 2, Luma([value]))
    }

    fn first(model: &BackgroundModel) -> f32 {
        model.mean().unwrap().get_pixel(0, 0)[0]
    }

    #[test]
    fn accumulate_before_seed_is_ignored() {
        let mut model = BackgroundModel::new();
        model.accumulate(&plane(10), 0.5);
        assert!(!model.is_seeded());
        assert!(model.mean().is_none());
    }

    #[test]
    fn accumulate_decays_toward_newest() {
        let mut model = BackgroundModel::new();
        model.seed(&plane(0));
        model.accumulate(&plane(100), 0.5);
        assert_eq!(first(&model), 50.0);
        model.accumulate(&plane(100), 0.5);
        assert_eq!(first(&model), 75.0);
    }

    #[test]
    fn zero_weight_freezes_the_seed() {
        let mut model = BackgroundModel::new();
        model.seed(&plane(5));
        model.accumulate(&plane(200), 0.0);
        assert_eq!(first(&model), 5.0);
    }

    #[test]
    fn geometry_change_is_detected() {
        let mut model = BackgroundModel::new();
        assert!(!model.accepts(&plane(0)));
        model.seed(&plane(0));
        assert!(model.accepts(&plane(1)));
        let wider = GrayImage::new(4, 1);
        assert!(!model.accepts(&wider));
        model.accumulate(&wider, 0.5);
        assert_eq!(first(&model), 0.0);
    }
}
