/// Frame annotation and encoding
///
/// Mirrors frames for a natural user-facing view, draws the pose skeleton in
/// the frame's highlight color and encodes the result as one part of a
/// `multipart/x-mixed-replace` stream.
use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::models::landmark::{LandmarkSet, PoseLandmark, POSE_CONNECTIONS};
use crate::models::session::Highlight;

/// Content type of an annotated stream
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Landmarks below this visibility are not drawn
const DRAW_MIN_VISIBILITY: f32 = 0.5;
const CONNECTION_COLOR: [u8; 3] = [255, 255, 0];
const CONNECTION_THICKNESS: i32 = 2;
const JOINT_RADIUS: i32 = 6;

/// Flip a frame left-to-right in place
pub fn mirror(frame: &mut RgbImage) {
    image::imageops::flip_horizontal_in_place(frame);
}

/// Draw connections in yellow and joints in the highlight color
pub fn draw_skeleton(frame: &mut RgbImage, landmarks: &LandmarkSet, highlight: Highlight) {
    let (width, height) = (frame.width() as f32, frame.height() as f32);
    let to_pixel = |landmark: PoseLandmark| {
        let point = landmarks.get(landmark);
        if point.visibility < DRAW_MIN_VISIBILITY || !point.x.is_finite() || !point.y.is_finite() {
            return None;
        }
        Some(((point.x * width) as i32, (point.y * height) as i32))
    };

    for (start, end) in POSE_CONNECTIONS {
        if let (Some(a), Some(b)) = (to_pixel(start), to_pixel(end)) {
            draw_line(frame, a, b, CONNECTION_THICKNESS, Rgb(CONNECTION_COLOR));
        }
    }

    let joint_color = Rgb(highlight.color());
    for (landmark, _) in landmarks.iter() {
        if let Some(center) = to_pixel(landmark) {
            fill_circle(frame, center, JOINT_RADIUS, joint_color);
        }
    }
}

fn put(frame: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < frame.width() && (y as u32) < frame.height() {
        frame.put_pixel(x as u32, y as u32, color);
    }
}

fn fill_circle(frame: &mut RgbImage, center: (i32, i32), radius: i32, color: Rgb<u8>) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put(frame, center.0 + dx, center.1 + dy, color);
            }
        }
    }
}

/// Bresenham line, stamped with a disc for thickness
fn draw_line(frame: &mut RgbImage, from: (i32, i32), to: (i32, i32), thickness: i32, color: Rgb<u8>) {
    let radius = (thickness / 2).max(0);
    let (mut x, mut y) = from;
    let dx = (to.0 - from.0).abs();
    let dy = -(to.1 - from.1).abs();
    let step_x = if from.0 < to.0 { 1 } else { -1 };
    let step_y = if from.1 < to.1 { 1 } else { -1 };
    let mut error = dx + dy;

    loop {
        fill_circle(frame, (x, y), radius, color);
        if (x, y) == to {
            break;
        }
        let doubled = 2 * error;
        if doubled >= dy {
            error += dy;
            x += step_x;
        }
        if doubled <= dx {
            error += dx;
            y += step_y;
        }
    }
}

/// Encode a frame as JPEG
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(frame)
        .context("Failed to encode frame as JPEG")?;
    Ok(buffer)
}

/// Wrap an encoded frame as one multipart part
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    const HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

    let mut part = BytesMut::with_capacity(HEADER.len() + jpeg.len() + 2);
    part.put_slice(HEADER);
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::landmark::Landmark;

    #[test]
    fn test_multipart_framing() {
        let part = multipart_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        assert_eq!(
            part.as_ref(),
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8\xFF\xD9\r\n".as_slice()
        );
    }

    #[test]
    fn test_mirror() {
        let mut frame = RgbImage::new(3, 1);
        frame.put_pixel(0, 0, Rgb([10, 20, 30]));
        mirror(&mut frame);
        assert_eq!(frame.get_pixel(2, 0), &Rgb([10, 20, 30]));
        assert_eq!(frame.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_joints_use_highlight_color() {
        let mut frame = RgbImage::new(100, 100);
        let landmarks = LandmarkSet::filled(Landmark::new(0.0, 0.0, 0.0, 0.0))
            .with(PoseLandmark::LeftKnee, Landmark::at(0.5, 0.5));

        draw_skeleton(&mut frame, &landmarks, Highlight::RepCompleted);

        assert_eq!(frame.get_pixel(50, 50), &Rgb([0, 255, 0]));
        assert_eq!(frame.get_pixel(90, 90), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_connections_are_drawn_between_visible_joints() {
        let mut frame = RgbImage::new(100, 100);
        let landmarks = LandmarkSet::filled(Landmark::new(0.0, 0.0, 0.0, 0.0))
            .with(PoseLandmark::LeftHip, Landmark::at(0.2, 0.5))
            .with(PoseLandmark::LeftKnee, Landmark::at(0.8, 0.5));

        draw_skeleton(&mut frame, &landmarks, Highlight::Neutral);

        assert_eq!(frame.get_pixel(50, 50), &Rgb(CONNECTION_COLOR));
    }

    #[test]
    fn test_encode_jpeg() {
        let frame = RgbImage::from_pixel(16, 16, Rgb([200, 30, 30]));
        let jpeg = encode_jpeg(&frame, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
