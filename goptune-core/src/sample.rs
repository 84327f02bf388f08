use std::path::Path;

use ffmpeg::format::Pixel;
use ffmpeg::media::Type as MediaType;
use ffmpeg::util::error::EAGAIN;
use ffmpeg::util::picture;
use ffmpeg::{codec, format, frame, Error as FfmpegError, Packet};
use tracing::{debug, warn};

use crate::buffer::SampleBuf;
use crate::error::Error;
use crate::sharpness;

/// One GOP's worth of analysis input: the first up-to-N decoded frames,
/// the total decoded frame count of the GOP, and the accumulated
/// high-pass energy of every decoded frame (retained or not).
pub struct GopSample {
    buf:           SampleBuf,
    frame_count:   u64,
    sharpness_sum: i64,
}

impl GopSample {
    #[cfg(test)]
    pub(crate) fn from_parts(buf: SampleBuf, frame_count: u64, sharpness_sum: i64) -> Self {
        GopSample {
            buf,
            frame_count,
            sharpness_sum,
        }
    }

    pub fn buffer(&self) -> &SampleBuf {
        &self.buf
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn width(&self) -> u32 {
        self.buf.width()
    }

    pub fn height(&self) -> u32 {
        self.buf.height()
    }

    /// Mean high-pass energy per pixel over the whole GOP.
    pub fn sharpness(&self) -> f64 {
        sharpness::per_pixel(
            self.sharpness_sum,
            self.frame_count,
            self.buf.width(),
            self.buf.height(),
        )
    }
}

/// Demuxes and decodes the input, partitioning the decoded stream into GOP
/// samples on keyframe boundaries.
pub struct GopSampler {
    ictx:          format::context::Input,
    decoder:       ffmpeg::decoder::video::Video,
    stream_index:  usize,
    frame_rate:    i32,
    sample_frames: usize,
    min_gop:       usize,
    sample:        GopSample,
    pending:       Option<frame::Video>,
    draining:      bool,
    finished:      bool,
}

impl GopSampler {
    pub fn open(path: &Path, sample_frames: usize, min_gop: usize) -> Result<Self, Error> {
        let ictx = format::input(&path).map_err(Error::Demux)?;
        let (stream_index, frame_rate, parameters) = {
            let stream = ictx
                .streams()
                .best(MediaType::Video)
                .ok_or(Error::Demux(FfmpegError::StreamNotFound))?;
            (stream.index(), derive_frame_rate(&stream), stream.parameters())
        };
        let decoder = codec::context::Context::from_parameters(parameters)
            .map_err(Error::Decode)?
            .decoder()
            .video()
            .map_err(Error::Decode)?;
        debug!(stream = stream_index, fps = frame_rate, "input opened");
        Ok(GopSampler {
            ictx,
            decoder,
            stream_index,
            frame_rate,
            sample_frames,
            min_gop,
            sample: GopSample {
                buf:           SampleBuf::new(),
                frame_count:   0,
                sharpness_sum: 0,
            },
            pending: None,
            draining: false,
            finished: false,
        })
    }

    pub fn frame_rate(&self) -> i32 {
        self.frame_rate
    }

    /// Decodes up to the next GOP boundary and returns the finished sample,
    /// or `None` at end of stream.
    pub fn next_sample(&mut self) -> Result<Option<&GopSample>, Error> {
        if self.finished && self.pending.is_none() {
            return Ok(None);
        }

        self.sample.buf.reset(0, 0);
        self.sample.frame_count = 0;
        self.sample.sharpness_sum = 0;
        if let Some(frame) = self.pending.take() {
            self.accept_frame(&frame)?;
        }

        let mut frame = frame::Video::empty();
        loop {
            match self.decoder.receive_frame(&mut frame) {
                Ok(()) => {
                    if self.is_boundary(&frame) {
                        self.pending = Some(std::mem::replace(&mut frame, frame::Video::empty()));
                        break;
                    }
                    self.accept_frame(&frame)?;
                }
                Err(FfmpegError::Other { errno: EAGAIN }) => {
                    if self.draining {
                        self.finished = true;
                        break;
                    }
                    match next_video_packet(&mut self.ictx, self.stream_index)? {
                        Some(packet) => {
                            self.decoder.send_packet(&packet).map_err(Error::Decode)?;
                        }
                        None => {
                            self.decoder.send_eof().map_err(Error::Decode)?;
                            self.draining = true;
                        }
                    }
                }
                Err(FfmpegError::Eof) => {
                    self.finished = true;
                    break;
                }
                Err(e) => return Err(Error::Decode(e)),
            }
        }

        if self.sample.frame_count == 0 {
            return Ok(None);
        }
        debug!(
            frames = self.sample.frame_count,
            retained = self.sample.buf.frames(),
            width = self.sample.width(),
            height = self.sample.height(),
            "gop sample closed"
        );
        Ok(Some(&self.sample))
    }

    /// A decoded frame closes the running sample when the geometry changes
    /// or when an I-frame arrives after the minimum GOP length.
    fn is_boundary(&self, frame: &frame::Video) -> bool {
        if self.sample.frame_count == 0 {
            return false;
        }
        if (frame.width(), frame.height()) != (self.sample.width(), self.sample.height()) {
            return true;
        }
        frame.kind() == picture::Type::I && self.sample.frame_count >= self.min_gop as u64
    }

    fn accept_frame(&mut self, frame: &frame::Video) -> Result<(), Error> {
        match frame.format() {
            Pixel::YUV420P | Pixel::YUVJ420P => {}
            other => return Err(Error::UnsupportedPixelFormat(other)),
        }
        if frame.is_corrupt() {
            warn!(frame = self.sample.frame_count, "decoder flagged a corrupt frame, keeping it");
        }
        if self.sample.frame_count == 0 {
            self.sample.buf.reset(frame.width(), frame.height());
        }
        if self.sample.buf.frames() < self.sample_frames {
            self.sample.buf.push_frame(frame);
        }
        self.sample.sharpness_sum += sharpness::plane_energy(
            frame.data(0),
            frame.stride(0),
            frame.width() as usize,
            frame.height() as usize,
        );
        self.sample.frame_count += 1;
        Ok(())
    }
}

fn next_video_packet(
    ictx: &mut format::context::Input,
    stream_index: usize,
) -> Result<Option<Packet>, Error> {
    loop {
        match ictx.packets().next() {
            Some(Ok((stream, packet))) => {
                if stream.index() == stream_index {
                    return Ok(Some(packet));
                }
            }
            Some(Err(FfmpegError::Other { errno: EAGAIN })) => {}
            Some(Err(e)) => return Err(Error::Demux(e)),
            None => return Ok(None),
        }
    }
}

fn derive_frame_rate(stream: &format::stream::Stream) -> i32 {
    let avg = stream.avg_frame_rate();
    let rate = if avg.numerator() == 0 { stream.rate() } else { avg };
    if rate.denominator() == 0 {
        warn!("stream reports no frame rate, assuming 25");
        return 25;
    }
    (f64::from(rate).ceil() as i32).max(1)
}
