use serde::Serialize;

/// Output of one detector run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    pub detections: Vec<Detection>,
    /// Derived water gauge reading, percent of frame height.
    pub gauge_pct: f64,
}

/// One labelled box, pixel coordinates, origin top-left.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub label: String,
    pub score: f64,
    /// CSS colour used by the overlay.
    pub color: String,
}

impl Detection {
    pub fn new(x: f64, y: f64, w: f64, h: f64, label: &str, score: f64, color: &str) -> Self {
        Self {
            x,
            y,
            w,
            h,
            label: label.to_string(),
            score,
            color: color.to_string(),
        }
    }
}
