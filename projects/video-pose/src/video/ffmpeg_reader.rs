use super::stream_info::{
    duration_from_ticks, relative_frame_ms, seek_target_us, start_offset_ms, Rotation,
};
use super::{DecodedFrame, FrameSource};
use crate::error::{PoseError, PoseResult};
use anyhow::{anyhow, Context, Result};
use ffmpeg_next::ffi;
use image::RgbImage;
use std::path::Path;

/// Video reader backed by FFmpeg via ffmpeg-next.
///
/// Seeks to the nearest preceding keyframe and decodes forward until the
/// first frame whose presentation time reaches the requested timestamp.
/// Timestamps are measured from the stream's first frame, and frames are
/// rotated upright per the display matrix.
pub struct FfmpegReader {
    input_ctx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::codec::decoder::Video,
    video_stream_index: usize,
    /// Stream time base as seconds per tick.
    time_base: f64,
    /// Lazily created on first frame (source format is only known then).
    scaler: Option<ffmpeg_next::software::scaling::Context>,
    width: u32,
    height: u32,
    duration_secs: f64,
    /// Presentation time of the first frame, in ms.
    start_offset_ms: f64,
    rotation: Rotation,
    reuse_packet: ffmpeg_next::codec::packet::Packet,
    eof_sent: bool,
}

// SAFETY: FfmpegReader is owned by a single batch worker and never shared across threads.
unsafe impl Send for FfmpegReader {}

impl FfmpegReader {
    pub fn new(path: &Path) -> PoseResult<Self> {
        Self::open(path).map_err(|e| PoseError::FatalOpen(format!("{:#}", e)))
    }

    fn open(path: &Path) -> Result<Self> {
        ffmpeg_next::init().context("Failed to initialize FFmpeg")?;

        let input_ctx = ffmpeg_next::format::input(&path).context("Failed to open video file")?;

        let video_stream = input_ctx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| anyhow!("No video stream found in {}", path.display()))?;

        let video_stream_index = video_stream.index();
        let tb = video_stream.time_base();
        let time_base = if tb.denominator() > 0 {
            tb.numerator() as f64 / tb.denominator() as f64
        } else {
            1.0 / ffi::AV_TIME_BASE as f64
        };

        let container_tb = 1.0 / ffi::AV_TIME_BASE as f64;
        let duration_secs = duration_from_ticks(known(input_ctx.duration()), container_tb)
            .or_else(|| duration_from_ticks(known(video_stream.duration()), time_base))
            .ok_or_else(|| anyhow!("Unknown duration for {}", path.display()))?;

        let start_ms = match known(video_stream.start_time()) {
            Some(ticks) => start_offset_ms(Some(ticks), time_base),
            None => start_offset_ms(known(input_ctx.start_time()), container_tb),
        };

        let rotation = display_rotation(&video_stream.parameters())
            .map(Rotation::from_display_degrees)
            .unwrap_or_default();

        let decoder_ctx =
            ffmpeg_next::codec::context::Context::from_parameters(video_stream.parameters())
                .context("Failed to create decoder context")?;
        let decoder = decoder_ctx
            .decoder()
            .video()
            .context("Failed to open video decoder")?;

        let width = decoder.width();
        let height = decoder.height();

        tracing::info!(
            "FfmpegReader: opened {}, duration={:.2}s, {}x{}, start={:.1}ms, rotation={:?}",
            path.display(),
            duration_secs,
            width,
            height,
            start_ms,
            rotation
        );

        Ok(Self {
            input_ctx,
            decoder,
            video_stream_index,
            time_base,
            scaler: None,
            width,
            height,
            duration_secs,
            start_offset_ms: start_ms,
            rotation,
            reuse_packet: ffmpeg_next::codec::packet::Packet::empty(),
            eof_sent: false,
        })
    }

    fn seek(&mut self, timestamp_ms: u64) -> Result<()> {
        let timestamp = seek_target_us(timestamp_ms, self.start_offset_ms);
        self.input_ctx
            .seek(timestamp, ..timestamp)
            .context("Failed to seek")?;
        self.decoder.flush();
        self.eof_sent = false;
        Ok(())
    }

    /// Retrieves the next decoded frame from the stream.
    fn decode_next(&mut self, target_frame: &mut ffmpeg_next::util::frame::Video) -> Result<()> {
        loop {
            match self.decoder.receive_frame(target_frame) {
                Ok(()) => return Ok(()),
                Err(ffmpeg_next::Error::Other { errno: ffi::EAGAIN }) => {
                    if self.eof_sent {
                        return Err(anyhow!("End of stream"));
                    }
                }
                Err(ffmpeg_next::Error::Eof) => return Err(anyhow!("End of stream")),
                Err(e) => return Err(anyhow!("Decoder error: {}", e)),
            }

            // Feed packets until we find a video packet OR reach EOF
            let mut found_packet = false;
            while self.reuse_packet.read(&mut self.input_ctx).is_ok() {
                if self.reuse_packet.stream() == self.video_stream_index {
                    self.decoder
                        .send_packet(&self.reuse_packet)
                        .context("Failed to send packet to decoder")?;
                    found_packet = true;
                    break;
                }
            }

            if !found_packet {
                self.decoder
                    .send_eof()
                    .context("Failed to send EOF to decoder")?;
                self.eof_sent = true;
            }
        }
    }

    fn frame_time_ms(&self, frame: &ffmpeg_next::util::frame::Video) -> Option<f64> {
        frame
            .timestamp()
            .or_else(|| frame.pts())
            .map(|pts| relative_frame_ms(pts, self.time_base, self.start_offset_ms))
    }

    fn get_or_create_scaler(
        &mut self,
        src_format: ffmpeg_next::format::Pixel,
    ) -> Result<&mut ffmpeg_next::software::scaling::Context> {
        if self.scaler.is_none() {
            let scaler = ffmpeg_next::software::scaling::Context::get(
                src_format,
                self.width,
                self.height,
                ffmpeg_next::format::Pixel::RGB24,
                self.width,
                self.height,
                ffmpeg_next::software::scaling::Flags::BILINEAR,
            )
            .context("Failed to create scaler")?;
            self.scaler = Some(scaler);
        }
        self.scaler
            .as_mut()
            .ok_or_else(|| anyhow!("Scaler unavailable"))
    }

    fn read_at(&mut self, timestamp_ms: u64) -> Result<RgbImage> {
        self.seek(timestamp_ms)?;

        let mut frame = ffmpeg_next::util::frame::Video::empty();
        loop {
            self.decode_next(&mut frame)?;
            match self.frame_time_ms(&frame) {
                // Decode forward from the keyframe; half a millisecond of slack
                // absorbs time-base rounding.
                Some(t) if t + 0.5 < timestamp_ms as f64 => continue,
                _ => break,
            }
        }

        let scaler = self.get_or_create_scaler(frame.format())?;
        let mut rgb_frame = ffmpeg_next::util::frame::Video::empty();
        scaler
            .run(&frame, &mut rgb_frame)
            .context("Scaler failed")?;

        Ok(self.rotation.apply(rgb_frame_to_image(&rgb_frame)?))
    }
}

fn known(ts: i64) -> Option<i64> {
    (ts != ffi::AV_NOPTS_VALUE).then_some(ts)
}

/// Counterclockwise rotation in degrees from the stream's display matrix.
fn display_rotation(params: &ffmpeg_next::codec::Parameters) -> Option<f64> {
    // SAFETY: the parameters outlive this call and the side data array has
    // `nb_coded_side_data` entries; a display matrix is nine i32 values.
    unsafe {
        let par = params.as_ptr();
        let side_data = ffi::av_packet_side_data_get(
            (*par).coded_side_data,
            (*par).nb_coded_side_data,
            ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
        );
        if side_data.is_null() || (*side_data).size < 9 * std::mem::size_of::<i32>() {
            return None;
        }
        let degrees = ffi::av_display_rotation_get((*side_data).data as *const i32);
        (!degrees.is_nan()).then_some(degrees)
    }
}

/// Copies an RGB24 ffmpeg frame into an owned image buffer, dropping row padding.
fn rgb_frame_to_image(frame: &ffmpeg_next::util::frame::Video) -> Result<RgbImage> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let data = frame.data(0);
    let stride = frame.stride(0);

    let mut buffer = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let src_offset = y * stride;
        buffer.extend_from_slice(&data[src_offset..src_offset + width * 3]);
    }

    RgbImage::from_vec(width as u32, height as u32, buffer)
        .ok_or_else(|| anyhow!("Failed to create image buffer from frame data"))
}

impl FrameSource for FfmpegReader {
    fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    fn decode_at(&mut self, timestamp_ms: u64) -> PoseResult<DecodedFrame> {
        self.read_at(timestamp_ms)
            .map(DecodedFrame::new)
            .map_err(|e| PoseError::Decode {
                timestamp_ms,
                message: format!("{:#}", e),
            })
    }
}
