//! Five-point similarity alignment onto the ArcFace 112×112 template.

use crate::types::Landmarks;
use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

pub const ALIGNED_SIZE: u32 = 112;

/// InsightFace reference keypoints for a 112×112 crop.
pub const TEMPLATE_112: Landmarks = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Least-squares similarity `[a, b, tx, ty]` taking `src` onto `dst`:
///
/// ```text
/// x' = a·x - b·y + tx
/// y' = b·x + a·y + ty
/// ```
///
/// `None` when the source points coincide.
fn similarity_transform(src: &Landmarks, dst: &Landmarks) -> Option<[f32; 4]> {
    let centroid = |points: &Landmarks| {
        let (sx, sy) = points
            .iter()
            .fold((0.0f32, 0.0f32), |(ax, ay), &(x, y)| (ax + x, ay + y));
        let n = points.len() as f32;
        (sx / n, sy / n)
    };
    let (src_cx, src_cy) = centroid(src);
    let (dst_cx, dst_cy) = centroid(dst);

    let (mut dot, mut cross, mut spread) = (0.0f32, 0.0f32, 0.0f32);
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (sx - src_cx, sy - src_cy);
        let (dx, dy) = (dx - dst_cx, dy - dst_cy);
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
        spread += sx * sx + sy * sy;
    }
    if spread < 1e-6 {
        return None;
    }

    let a = dot / spread;
    let b = cross / spread;
    let tx = dst_cx - (a * src_cx - b * src_cy);
    let ty = dst_cy - (b * src_cx + a * src_cy);
    Some([a, b, tx, ty])
}

/// Warp the face described by `landmarks` into an aligned 112×112 crop.
/// Pixels outside the frame come out black.
pub fn align_face(gray: &GrayImage, landmarks: &Landmarks) -> Option<GrayImage> {
    let [a, b, tx, ty] = similarity_transform(landmarks, &TEMPLATE_112)?;
    let projection = Projection::from_matrix([a, -b, tx, b, a, ty, 0.0, 0.0, 1.0])?;

    let mut aligned = GrayImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    warp_into(gray, &projection, Interpolation::Bilinear, Luma([0]), &mut aligned);
    Some(aligned)
}
