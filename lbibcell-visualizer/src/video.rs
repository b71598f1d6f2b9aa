use anyhow::{Context, Result};
use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::{self, FilterType};
use image::{Delay, Frame, RgbImage};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use minimp4::Mp4Muxer;
use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate};
use openh264::formats::YUVBuffer;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

const BITRATE_BPS: u32 = 5_000_000;
const ENCODE_BATCH_SIZE: usize = 30;

/// RGB to YUV conversion for video encoding
pub fn rgb_to_yuv420(image: &RgbImage) -> Vec<u8> {
    let width = image.width() as usize;
    let height = image.height() as usize;

    // Y plane is full size, U and V are quarter size
    let y_plane_size = width * height;
    let uv_width = width.div_ceil(2);
    let uv_height = height.div_ceil(2);
    let mut yuv = vec![0u8; y_plane_size + 2 * uv_width * uv_height];

    for y in 0..height {
        for x in 0..width {
            let pixel = image.get_pixel(x as u32, y as u32);
            let r = pixel[0] as f32;
            let g = pixel[1] as f32;
            let b = pixel[2] as f32;

            // RGB to Y conversion (BT.601 formula)
            yuv[y * width + x] = (0.299 * r + 0.587 * g + 0.114 * b).round() as u8;
        }
    }

    let u_plane_offset = y_plane_size;
    let v_plane_offset = y_plane_size + uv_width * uv_height;

    // For each 2x2 block of pixels, compute average U and V values
    for y in (0..height).step_by(2) {
        for x in (0..width).step_by(2) {
            let mut sum_u = 0f32;
            let mut sum_v = 0f32;
            let mut count = 0;

            for dy in 0..2 {
                for dx in 0..2 {
                    if y + dy < height && x + dx < width {
                        let pixel = image.get_pixel((x + dx) as u32, (y + dy) as u32);
                        let r = pixel[0] as f32;
                        let g = pixel[1] as f32;
                        let b = pixel[2] as f32;

                        sum_u += -0.169 * r - 0.331 * g + 0.5 * b + 128.0;
                        sum_v += 0.5 * r - 0.419 * g - 0.081 * b + 128.0;
                        count += 1;
                    }
                }
            }

            let idx = (y / 2) * uv_width + x / 2;
            yuv[u_plane_offset + idx] = (sum_u / count as f32).round() as u8;
            yuv[v_plane_offset + idx] = (sum_v / count as f32).round() as u8;
        }
    }

    yuv
}

/// Drops the last row/column when needed; H.264 wants even dimensions.
pub fn crop_even(image: &RgbImage) -> RgbImage {
    let w = image.width() & !1;
    let h = image.height() & !1;
    if w == image.width() && h == image.height() {
        return image.clone();
    }
    imageops::crop_imm(image, 0, 0, w, h).to_image()
}

/// Encodes the frames as H.264 and muxes them into an MP4 file.
pub fn encode_mp4(frames: &[RgbImage], fps: u32, path: &Path) -> Result<()> {
    let first = frames.first().context("no frames to encode")?;
    let first = crop_even(first);
    let (width, height) = first.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("frames are too small to encode ({}x{})", width, height);
    }

    let mut encoder = Encoder::with_api_config(
        openh264::OpenH264API::from_source(),
        EncoderConfig::new()
            .max_frame_rate(FrameRate::from_hz(fps as f32))
            .bitrate(BitRate::from_bps(BITRATE_BPS)),
    )
    .context("Failed to initialize H.264 encoder")?;

    let bar = ProgressBar::new(frames.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} encoded ({percent}%) [{eta}]")
    {
        bar.set_style(style.progress_chars("#>-"));
    }

    let mut h264_data = Vec::new();
    let mut frame_count = 0;
    for (batch_idx, batch) in frames.chunks(ENCODE_BATCH_SIZE).enumerate() {
        // Pre-convert the batch to YUV in parallel, then encode in order
        let yuv_frames: Vec<Vec<u8>> = batch
            .par_iter()
            .map(|frame| {
                let cropped = crop_even(frame);
                if cropped.dimensions() != (width, height) {
                    imageops::resize(&cropped, width, height, FilterType::Triangle)
                } else {
                    cropped
                }
            })
            .map(|frame| rgb_to_yuv420(&frame))
            .collect();

        for (i, yuv_data) in yuv_frames.into_iter().enumerate() {
            let yuv_source = YUVBuffer::from_vec(yuv_data, width as usize, height as usize);
            match encoder.encode(&yuv_source) {
                Ok(bitstream) => {
                    bitstream.write_vec(&mut h264_data);
                    frame_count += 1;
                }
                Err(e) => error!("Error encoding frame {}: {}", batch_idx * ENCODE_BATCH_SIZE + i, e),
            }
            bar.inc(1);
        }
    }
    bar.finish_with_message(format!("Encoded {} frames", frame_count));

    let mut video_buffer = Cursor::new(Vec::new());
    let mut mp4muxer = Mp4Muxer::new(&mut video_buffer);
    mp4muxer.init_video(width as i32, height as i32, false, "LBIBCell concentration");
    mp4muxer.write_video_with_fps(&h264_data, fps);
    mp4muxer.close();

    video_buffer.seek(SeekFrom::Start(0))?;
    let mut video_bytes = Vec::new();
    video_buffer.read_to_end(&mut video_bytes)?;
    fs::write(path, &video_bytes).with_context(|| format!("Failed to write video file to {}", path.display()))?;
    info!("{} frames encoded to {}", frame_count, path.display());
    Ok(())
}

/// Writes an endlessly looping GIF, each frame resized to `width` pixels wide.
pub fn encode_gif(frames: &[RgbImage], fps: u32, width: u32, path: &Path) -> Result<()> {
    if frames.is_empty() {
        anyhow::bail!("no frames to encode");
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut encoder = GifEncoder::new_with_speed(BufWriter::new(file), 10);
    encoder.set_repeat(Repeat::Infinite)?;

    let delay = Delay::from_numer_denom_ms(1000, fps.max(1));
    let resized: Vec<Frame> = frames
        .par_iter()
        .map(|frame| {
            let rgba = image::DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
            let rgba = if width > 0 && rgba.width() != width {
                let height = ((rgba.height() as u64 * width as u64) / rgba.width().max(1) as u64).max(1) as u32;
                imageops::resize(&rgba, width, height, FilterType::Lanczos3)
            } else {
                rgba
            };
            Frame::from_parts(rgba, 0, 0, delay)
        })
        .collect();
    encoder
        .encode_frames(resized)
        .with_context(|| format!("Failed to encode GIF {}", path.display()))?;
    info!("{} frames written to {}", frames.len(), path.display());
    Ok(())
}

/// Encodes `<fig_dir>/<kind>.mp4` and `.gif` and copies them to `<copy_dir>/<name>_<kind>.*`.
/// Encoding problems are logged; the frames on disk stay usable either way.
pub fn export_videos(frames: &[RgbImage], kind: &str, fps: u32, gif_width: u32, fig_dir: &Path, copy_dir: &Path, name: &str) {
    let outputs = [
        ("mp4", encode_mp4(frames, fps, &fig_dir.join(format!("{}.mp4", kind)))),
        ("gif", encode_gif(frames, fps, gif_width, &fig_dir.join(format!("{}.gif", kind)))),
    ];
    for (ext, result) in outputs {
        if let Err(e) = result {
            error!("{} encoding failed: {:#}", ext, e);
            continue;
        }
        let src = fig_dir.join(format!("{}.{}", kind, ext));
        let dst = copy_dir.join(format!("{}_{}.{}", name, kind, ext));
        match fs::copy(&src, &dst) {
            Ok(_) => info!("Copied to {}", dst.display()),
            Err(e) => warn!("Could not copy {} to {}: {}", src.display(), dst.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_yuv_planes_for_flat_colors() {
        let white = RgbImage::from_pixel(4, 2, Rgb([255, 255, 255]));
        let yuv = rgb_to_yuv420(&white);
        assert_eq!(yuv.len(), 8 + 2 + 2);
        assert!(yuv[..8].iter().all(|&v| v == 255));
        assert!(yuv[8..].iter().all(|&v| v == 128));

        let red = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
        let yuv = rgb_to_yuv420(&red);
        assert_eq!(yuv[0], 76);
        assert_eq!(yuv[4], 85);
        assert_eq!(yuv[5], 255);
    }

    #[test]
    fn test_crop_even() {
        let img = RgbImage::new(5, 7);
        assert_eq!(crop_even(&img).dimensions(), (4, 6));
        let img = RgbImage::new(4, 6);
        assert_eq!(crop_even(&img).dimensions(), (4, 6));
    }

    #[test]
    fn test_gif_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contourf.gif");
        let frames = vec![
            RgbImage::from_pixel(8, 4, Rgb([255, 0, 0])),
            RgbImage::from_pixel(8, 4, Rgb([0, 0, 255])),
        ];
        encode_gif(&frames, 10, 16, &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"GIF89a"));
        assert!(encode_gif(&[], 10, 16, &path).is_err());
    }
}
