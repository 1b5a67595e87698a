//! Debug recording of analyzed frames.
//!
//! When enabled, each analyzed frame is written as an annotated PNG named
//! `NNNN_<unix-seconds>_<DECISION>_cars<N>.png` and summarized in
//! `detection_log.txt` in the same directory. Recording never influences the
//! decision; callers log and drop recording errors.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::engine::Analysis;
use crate::frame::Frame;
use crate::smoother::Decision;

pub const LOG_FILE_NAME: &str = "detection_log.txt";

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const SWATCH: u32 = 24;

pub struct Recorder {
    dir: PathBuf,
}

impl Recorder {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create logs dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the annotated frame and append a log line. Returns the image path.
    pub fn record(&self, frame: &Frame, analysis: &Analysis) -> Result<PathBuf> {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let file_name = format!(
            "{:04}_{}_{}_cars{}.png",
            analysis.sequence, timestamp, analysis.decision, analysis.cars
        );
        let path = self.dir.join(&file_name);
        annotate(frame, analysis)
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;

        let log_path = self.dir.join(LOG_FILE_NAME);
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open {}", log_path.display()))?;
        writeln!(
            log,
            "{} | Image #{} | Cars: {} | Decision: {}",
            timestamp, analysis.sequence, analysis.cars, analysis.decision
        )?;
        log::debug!("saved {}", file_name);
        Ok(path)
    }
}

/// Copy of the frame with candidate boxes and a decision swatch drawn in.
pub fn annotate(frame: &Frame, analysis: &Analysis) -> RgbImage {
    let mut canvas = frame.as_image().clone();
    for candidate in &analysis.candidates {
        let outer = Rect::at(candidate.x as i32, candidate.y as i32)
            .of_size(candidate.width.max(1), candidate.height.max(1));
        draw_hollow_rect_mut(&mut canvas, outer, BOX_COLOR);
        if candidate.width > 2 && candidate.height > 2 {
            let inner = Rect::at(candidate.x as i32 + 1, candidate.y as i32 + 1)
                .of_size(candidate.width - 2, candidate.height - 2);
            draw_hollow_rect_mut(&mut canvas, inner, BOX_COLOR);
        }
    }
    let swatch = match analysis.decision {
        Decision::Green => GREEN,
        Decision::Red => RED,
    };
    let side = SWATCH.min(canvas.width()).min(canvas.height());
    draw_filled_rect_mut(&mut canvas, Rect::at(0, 0).of_size(side, side), swatch);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::CandidateBox;

    fn analysis(decision: Decision) -> Analysis {
        Analysis {
            sequence: 7,
            candidates: vec![CandidateBox::from_scored(40, 40, 20, 10, 1.0)],
            cars: 1,
            raw_decision: decision,
            decision,
        }
    }

    #[test]
    fn annotation_draws_boxes_and_swatch() {
        let frame = Frame::from_rgb_image(RgbImage::new(100, 80)).unwrap();
        let out = annotate(&frame, &analysis(Decision::Red));
        assert_eq!(*out.get_pixel(0, 0), RED);
        assert_eq!(*out.get_pixel(40, 40), BOX_COLOR);
        assert_eq!(*out.get_pixel(41, 41), BOX_COLOR);
        assert_eq!(*out.get_pixel(50, 45), Rgb([0, 0, 0]));
        // The source frame is left untouched.
        assert_eq!(*frame.as_image().get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn record_writes_image_and_log_line() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let recorder = Recorder::new(dir.path().join("logs"))?;
        let frame = Frame::from_rgb_image(RgbImage::new(64, 48))?;

        let path = recorder.record(&frame, &analysis(Decision::Green))?;
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("0007_"));
        assert!(name.ends_with("_GREEN_cars1.png"));
        assert!(path.exists());

        let log = std::fs::read_to_string(recorder.dir().join(LOG_FILE_NAME))?;
        assert!(log.contains("| Image #7 | Cars: 1 | Decision: GREEN"));
        Ok(())
    }
}
