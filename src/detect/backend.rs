use anyhow::Result;

use crate::frame::DecodedImage;

use super::result::DetectionReport;

/// Detector backend trait.
///
/// Backends see the decoded image for the duration of one call and return boxes in
/// pixel coordinates of that image.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on an acquired image.
    fn detect(&mut self, image: &DecodedImage) -> Result<DetectionReport>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
