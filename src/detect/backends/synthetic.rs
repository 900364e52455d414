use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionReport};
use crate::frame::DecodedImage;

/// First `uniform(-5, 5)` draw of a Mersenne Twister seeded with 42. Fixed so the
/// gauge is a pure function of frame size.
const GAUGE_JITTER_PCT: f64 = 1.3942679845788373;
const GAUGE_MIN_PCT: f64 = 15.0;
const GAUGE_MAX_PCT: f64 = 85.0;

const WATER_COLOR: &str = "rgba(0,150,255,0.6)";
const TRASH_COLOR: &str = "rgba(255,100,100,0.7)";
const RULER_DIGIT_COLOR: &str = "rgba(255,255,0,0.8)";
const RULER_LINE_COLOR: &str = "rgba(255,255,0,0.6)";

/// Ruler sits this many pixels in from the right edge.
const RULER_INSET: f64 = 120.0;

/// (x fraction of width, y fraction of height, box w, box h, label, score)
const TRASH_ITEMS: [(f64, f64, f64, f64, &str, f64); 4] = [
    (0.2, 0.3, 45.0, 25.0, "Plastic Bottle", 0.88),
    (0.7, 0.4, 35.0, 20.0, "Trash Bag", 0.85),
    (0.4, 0.6, 30.0, 15.0, "Can", 0.79),
    (0.15, 0.7, 25.0, 18.0, "Paper", 0.73),
];

/// (y, label, score); every digit box is 40x18 at the ruler x.
const RULER_DIGITS: [(f64, &str, f64); 4] = [
    (50.0, "90cm", 0.95),
    (120.0, "70cm", 0.93),
    (190.0, "50cm", 0.92),
    (260.0, "30cm", 0.90),
];

/// Demo backend: hand-authored geometry scaled by frame size.
///
/// Reports a water body over the bottom 40% of the frame, four pieces of trash,
/// a ruler with four depth markings near the right edge, and a gauge reading derived
/// from the water height plus a fixed jitter.
#[derive(Clone, Debug, Default)]
pub struct SyntheticBackend;

impl SyntheticBackend {
    pub fn new() -> Self {
        Self
    }

    /// Geometry for a `width` x `height` frame.
    pub fn report_for(width: u32, height: u32) -> DetectionReport {
        let w = width as f64;
        let h = height as f64;
        let water_height = (h * 0.4).floor();

        let mut detections = Vec::with_capacity(1 + TRASH_ITEMS.len() + RULER_DIGITS.len() + 1);
        detections.push(Detection::new(
            w * 0.1,
            h - water_height,
            w * 0.8,
            water_height,
            "Water",
            0.92,
            WATER_COLOR,
        ));

        for (fx, fy, bw, bh, label, score) in TRASH_ITEMS {
            detections.push(Detection::new(
                w * fx,
                h * fy,
                bw,
                bh,
                label,
                score,
                TRASH_COLOR,
            ));
        }

        let ruler_x = w - RULER_INSET;
        for (y, label, score) in RULER_DIGITS {
            detections.push(Detection::new(
                ruler_x,
                y,
                40.0,
                18.0,
                label,
                score,
                RULER_DIGIT_COLOR,
            ));
        }
        detections.push(Detection::new(
            ruler_x + 45.0,
            30.0,
            8.0,
            h - 60.0,
            "Ruler",
            0.97,
            RULER_LINE_COLOR,
        ));

        let gauge_pct = if h > 0.0 {
            (water_height / h * 100.0 + GAUGE_JITTER_PCT).clamp(GAUGE_MIN_PCT, GAUGE_MAX_PCT)
        } else {
            GAUGE_MIN_PCT
        };

        DetectionReport {
            detections,
            gauge_pct,
        }
    }
}

impl DetectorBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn detect(&mut self, image: &DecodedImage) -> Result<DetectionReport> {
        Ok(Self::report_for(image.width(), image.height()))
    }
}
