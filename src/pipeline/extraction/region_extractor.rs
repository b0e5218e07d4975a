use std::borrow::Cow;

use image::{Rgb, RgbImage};
use nalgebra::Point2;
use tracing::debug;
use uuid::Uuid;

use crate::common::frame::CameraFrame;
use crate::error::ExtractionError;
use crate::pipeline::extraction::homography;
use crate::tracking::anchor::{AnchorId, TrackedAnchor};

/// A rectified crop of the tracked card, ready for classification.
#[derive(Debug, Clone)]
pub struct ImageRegion {
    pub anchor_id: AnchorId,
    pub frame_id: Uuid,
    pub image: RgbImage,
    /// Projected card corners in the source frame: TL, TR, BR, BL.
    pub source_quad: [Point2<f64>; 4],
}

impl ImageRegion {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Cuts the pixels of a tracked image out of a camera frame.
pub trait RegionExtractor: Send {
    fn extract(
        &self,
        frame: Option<&CameraFrame>,
        anchor: &TrackedAnchor,
    ) -> Result<ImageRegion, ExtractionError>;
}

/// Assumes the card lies flat in its anchor's plane, projects its corners
/// through the frame's camera, and warps the quad to an upright rectangle.
#[derive(Debug, Clone)]
pub struct PlanarRegionExtractor {
    long_side: u32,
}

impl PlanarRegionExtractor {
    pub fn new(long_side: u32) -> Self {
        Self {
            long_side: long_side.max(1),
        }
    }

    fn output_size(&self, width: f64, height: f64) -> (u32, u32) {
        let long = self.long_side as f64;
        let (w, h) = if width >= height {
            (long, long * height / width)
        } else {
            (long * width / height, long)
        };
        ((w.round() as u32).max(1), (h.round() as u32).max(1))
    }

    fn project_corners(
        &self,
        frame: &CameraFrame,
        anchor: &TrackedAnchor,
    ) -> Result<[Point2<f64>; 4], ExtractionError> {
        let (width, height) = frame.dimensions();
        let corners = anchor.reference.local_corners();
        let mut quad = [Point2::origin(); 4];
        for (slot, corner) in quad.iter_mut().zip(corners.iter()) {
            let world = anchor.pose.to_world(corner);
            let pixel = frame
                .camera()
                .project(&world)
                .ok_or(ExtractionError::BehindCamera)?;
            if pixel.x < 0.0
                || pixel.y < 0.0
                || pixel.x > width as f64
                || pixel.y > height as f64
            {
                return Err(ExtractionError::OutOfBounds {
                    x: pixel.x,
                    y: pixel.y,
                    width,
                    height,
                });
            }
            *slot = pixel;
        }
        Ok(quad)
    }
}

impl RegionExtractor for PlanarRegionExtractor {
    fn extract(
        &self,
        frame: Option<&CameraFrame>,
        anchor: &TrackedAnchor,
    ) -> Result<ImageRegion, ExtractionError> {
        let frame = frame.ok_or(ExtractionError::FrameUnavailable)?;
        let quad = self.project_corners(frame, anchor)?;

        let (out_w, out_h) = self.output_size(
            anchor.reference.physical_width,
            anchor.reference.physical_height,
        );
        let (w, h) = (out_w as f64, out_h as f64);
        let rect = [
            Point2::new(0.0, 0.0),
            Point2::new(w, 0.0),
            Point2::new(w, h),
            Point2::new(0.0, h),
        ];
        let h_out_to_src = homography::from_four_points(&rect, &quad)?;

        let source: Cow<'_, RgbImage> = match frame.image().as_rgb8() {
            Some(rgb) => Cow::Borrowed(rgb),
            None => Cow::Owned(frame.image().to_rgb8()),
        };

        let mut image = RgbImage::new(out_w, out_h);
        for y in 0..out_h {
            for x in 0..out_w {
                let p = homography::project(
                    &h_out_to_src,
                    &Point2::new(x as f64 + 0.5, y as f64 + 0.5),
                )?;
                image.put_pixel(x, y, sample_bilinear(&source, p.x, p.y));
            }
        }

        debug!(
            "Extracted {}x{} region for anchor {} from frame {}",
            out_w,
            out_h,
            anchor.id,
            frame.frame_id()
        );

        Ok(ImageRegion {
            anchor_id: anchor.id,
            frame_id: frame.frame_id(),
            image,
            source_quad: quad,
        })
    }
}

/// Samples at continuous pixel coordinates, where pixel centres sit at
/// `i + 0.5`. Coordinates past the border clamp to the edge pixels.
fn sample_bilinear(img: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (w, h) = img.dimensions();
    let fx = (x - 0.5).clamp(0.0, (w - 1) as f64);
    let fy = (y - 0.5).clamp(0.0, (h - 1) as f64);
    let x0 = fx.floor() as u32;
    let y0 = fy.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let tx = fx - x0 as f64;
    let ty = fy - y0 as f64;

    let p00 = img.get_pixel(x0, y0).0;
    let p10 = img.get_pixel(x1, y0).0;
    let p01 = img.get_pixel(x0, y1).0;
    let p11 = img.get_pixel(x1, y1).0;

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f64 * (1.0 - tx) + p10[c] as f64 * tx;
        let bottom = p01[c] as f64 * (1.0 - tx) + p11[c] as f64 * tx;
        out[c] = (top * (1.0 - ty) + bottom * ty).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}
