//! Frame capture: a fixed pool of JPEG buffers filled from a frame source.
//!
//! Sources produce one complete JPEG per grab. The pool lends out at most
//! `buffer_count` buffers at once; a borrowed buffer must come back through
//! `release` before its slot can be reused.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, RgbImage};
use scrap::{Capturer, Display};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::{CameraConfig, SourceKind, MAX_DIMENSION};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no display found: {0}")]
    NoDisplay(std::io::Error),
    #[error("screen capture failed: {0}")]
    Screen(std::io::Error),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no .jpg/.jpeg files in {0}")]
    NoFrames(PathBuf),
    #[error("JPEG encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("invalid image dimensions {0}x{1}")]
    BadDimensions(u32, u32),
}

/// The capture driver as seen by the send loop
pub trait CapturePool {
    type Buffer: AsRef<[u8]>;

    /// Borrow a filled buffer, or `None` if the pool is exhausted or no
    /// frame is ready. Never blocks.
    fn acquire(&mut self) -> Option<Self::Buffer>;

    /// Hand a borrowed buffer back
    fn release(&mut self, buffer: Self::Buffer);
}

/// Something that can produce one JPEG frame on demand
pub trait FrameSource {
    /// Append one encoded frame to `out`. `Ok(false)` means no frame is
    /// ready yet.
    fn grab(&mut self, out: &mut Vec<u8>) -> Result<bool, CaptureError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn grab(&mut self, out: &mut Vec<u8>) -> Result<bool, CaptureError> {
        (**self).grab(out)
    }
}

/// One borrowed JPEG frame
#[derive(Debug)]
pub struct FrameBuffer {
    data: Vec<u8>,
}

impl AsRef<[u8]> for FrameBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

pub struct BufferPool<S> {
    source: S,
    free: Vec<Vec<u8>>,
}

impl<S: FrameSource> BufferPool<S> {
    pub fn new(source: S, buffer_count: usize) -> Self {
        Self {
            source,
            free: (0..buffer_count).map(|_| Vec::new()).collect(),
        }
    }
}

impl<S: FrameSource> CapturePool for BufferPool<S> {
    type Buffer = FrameBuffer;

    fn acquire(&mut self) -> Option<FrameBuffer> {
        let mut data = self.free.pop()?;
        data.clear();

        match self.source.grab(&mut data) {
            Ok(true) => Some(FrameBuffer { data }),
            Ok(false) => {
                self.free.push(data);
                None
            }
            Err(e) => {
                debug!("Capture failed: {}", e);
                self.free.push(data);
                None
            }
        }
    }

    fn release(&mut self, buffer: FrameBuffer) {
        self.free.push(buffer.data);
    }
}

/// Open the source named by the config. Failure here is a bring-up failure.
pub fn open_source(config: &CameraConfig) -> Result<Box<dyn FrameSource>, CaptureError> {
    Ok(match config.source {
        SourceKind::Synthetic => Box::new(SyntheticSource::new(
            config.width,
            config.height,
            config.jpeg_quality,
        )?),
        SourceKind::Screen => Box::new(ScreenSource::primary(config.width, config.jpeg_quality)?),
        SourceKind::Directory(ref dir) => Box::new(DirectorySource::open(dir)?),
    })
}

/// Moving colour-bar test pattern
pub struct SyntheticSource {
    width: u32,
    height: u32,
    quality: u8,
    phase: u32,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, quality: u8) -> Result<Self, CaptureError> {
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(CaptureError::BadDimensions(width, height));
        }
        Ok(Self {
            width,
            height,
            quality,
            phase: 0,
        })
    }
}

impl FrameSource for SyntheticSource {
    fn grab(&mut self, out: &mut Vec<u8>) -> Result<bool, CaptureError> {
        let (w, h) = (self.width, self.height);
        let phase = self.phase;
        let mut rgb = Vec::with_capacity(w as usize * h as usize * 3);
        for y in 0..h {
            for x in 0..w {
                let band = ((x + phase) * 8 / w.max(1)) % 8;
                rgb.push(if band & 1 != 0 { 230 } else { 20 });
                rgb.push(if band & 2 != 0 { 230 } else { 20 });
                rgb.push(if band & 4 != 0 { 230 } else { (y * 255 / h.max(1)) as u8 });
            }
        }
        self.phase = (phase + 2) % w;

        jpeg_encode(&rgb, w, h, self.quality, out)?;
        Ok(true)
    }
}

/// Primary display, downscaled to at most `max_width`
pub struct ScreenSource {
    capturer: Capturer,
    src_w: usize,
    src_h: usize,
    out_w: u32,
    out_h: u32,
    quality: u8,
}

impl ScreenSource {
    pub fn primary(max_width: u32, quality: u8) -> Result<Self, CaptureError> {
        let display = Display::primary().map_err(CaptureError::NoDisplay)?;
        let src_w = display.width();
        let src_h = display.height();
        let capturer = Capturer::new(display).map_err(CaptureError::Screen)?;

        // Preserve aspect ratio
        let (out_w, out_h) = if src_w as u32 > max_width {
            let scale = max_width as f64 / src_w as f64;
            (max_width, ((src_h as f64 * scale) as u32).max(1))
        } else {
            (src_w as u32, src_h as u32)
        };

        Ok(Self {
            capturer,
            src_w,
            src_h,
            out_w,
            out_h,
            quality,
        })
    }
}

impl FrameSource for ScreenSource {
    fn grab(&mut self, out: &mut Vec<u8>) -> Result<bool, CaptureError> {
        let rgb = match self.capturer.frame() {
            Ok(frame) => {
                // scrap rows may carry padding
                let stride = frame.len() / self.src_h;
                bgra_to_rgb_scaled(&frame, self.src_w, self.src_h, stride, self.out_w, self.out_h)
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                trace!("Screen frame not ready");
                return Ok(false);
            }
            Err(e) => return Err(CaptureError::Screen(e)),
        };

        jpeg_encode(&rgb, self.out_w, self.out_h, self.quality, out)?;
        Ok(true)
    }
}

/// Loops over pre-encoded JPEG files in name order
pub struct DirectorySource {
    files: Vec<PathBuf>,
    next: usize,
}

impl DirectorySource {
    pub fn open(dir: &Path) -> Result<Self, CaptureError> {
        let entries = std::fs::read_dir(dir).map_err(|source| CaptureError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CaptureError::NoFrames(dir.to_path_buf()));
        }
        Ok(Self { files, next: 0 })
    }
}

impl FrameSource for DirectorySource {
    fn grab(&mut self, out: &mut Vec<u8>) -> Result<bool, CaptureError> {
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();

        let data = std::fs::read(path).map_err(|source| CaptureError::Io {
            path: path.clone(),
            source,
        })?;
        out.extend_from_slice(&data);
        Ok(true)
    }
}

/// Convert BGRA buffer to RGB, optionally downscaling via nearest-neighbor
fn bgra_to_rgb_scaled(
    bgra: &[u8],
    src_w: usize,
    src_h: usize,
    stride: usize,
    dst_w: u32,
    dst_h: u32,
) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(dst_w as usize * dst_h as usize * 3);

    for y in 0..dst_h {
        let src_y = (y as usize * src_h) / dst_h as usize;
        for x in 0..dst_w {
            let src_x = (x as usize * src_w) / dst_w as usize;
            let offset = src_y * stride + src_x * 4;
            if offset + 2 < bgra.len() {
                rgb.push(bgra[offset + 2]);
                rgb.push(bgra[offset + 1]);
                rgb.push(bgra[offset]);
            } else {
                rgb.extend_from_slice(&[0, 0, 0]);
            }
        }
    }

    rgb
}

fn jpeg_encode(rgb: &[u8], width: u32, height: u32, quality: u8, out: &mut Vec<u8>) -> Result<(), CaptureError> {
    let img: RgbImage = ImageBuffer::from_raw(width, height, rgb.to_vec())
        .ok_or(CaptureError::BadDimensions(width, height))?;
    img.write_with_encoder(JpegEncoder::new_with_quality(out, quality))?;
    Ok(())
}
