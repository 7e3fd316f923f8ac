//! Dataset-level rules that gate training.

/// Minimum number of normal images a project needs before training.
pub const REQUIRED_NORMAL_IMAGES: usize = 20;

/// Whether a project with `image_count` images can start training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingReadiness {
    Ready,
    /// This many more images must be captured first.
    NeedsImages(usize),
}

impl TrainingReadiness {
    pub fn for_image_count(image_count: usize) -> Self {
        match REQUIRED_NORMAL_IMAGES.checked_sub(image_count) {
            Some(missing) if missing > 0 => Self::NeedsImages(missing),
            _ => Self::Ready,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_missing_images() {
        assert_eq!(
            TrainingReadiness::for_image_count(0),
            TrainingReadiness::NeedsImages(REQUIRED_NORMAL_IMAGES)
        );
        assert_eq!(
            TrainingReadiness::for_image_count(REQUIRED_NORMAL_IMAGES - 1),
            TrainingReadiness::NeedsImages(1)
        );
    }

    #[test]
    fn ready_at_and_above_threshold() {
        assert!(TrainingReadiness::for_image_count(REQUIRED_NORMAL_IMAGES).is_ready());
        assert!(TrainingReadiness::for_image_count(500).is_ready());
    }
}
