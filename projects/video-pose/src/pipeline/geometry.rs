use crate::pipeline::types::{BBox, Landmark};
use geo::BoundingRect;
use geo_types::{MultiPoint, Point as GeoPoint};

/// Convert landmarks to a geo_types MultiPoint
fn to_geo_multipoint(landmarks: &[Landmark]) -> MultiPoint<f64> {
    landmarks
        .iter()
        .map(|l| GeoPoint::new(l.x as f64, l.y as f64))
        .collect::<Vec<_>>()
        .into()
}

/// Bounding box of the landmarks, clamped to the normalized image [0, 1].
///
/// Returns `None` when there are no landmarks or the clamped box is empty.
pub fn landmark_bounds(landmarks: &[Landmark]) -> Option<BBox> {
    let rect = to_geo_multipoint(landmarks).bounding_rect()?;

    let x1 = (rect.min().x as f32).clamp(0.0, 1.0);
    let y1 = (rect.min().y as f32).clamp(0.0, 1.0);
    let x2 = (rect.max().x as f32).clamp(0.0, 1.0);
    let y2 = (rect.max().y as f32).clamp(0.0, 1.0);

    let w = x2 - x1;
    let h = y2 - y1;
    if w <= 0.0 || h <= 0.0 {
        return None;
    }

    Some(BBox { x: x1, y: y1, w, h })
}
