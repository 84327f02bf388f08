use ffmpeg::format::Pixel;
use ffmpeg::util::error::EAGAIN;
use ffmpeg::{codec, frame, Dictionary, Error as FfmpegError, Packet, Rational};
use tracing::trace;

use crate::buffer::SampleBuf;
use crate::error::Error;

/// One (encode → decode) probe of a sample at a fixed rate factor.
pub trait TrialEncoder {
    /// Encodes the first `frames` frames of `sample` at `crf`, reconstructs
    /// the output packets into the caller-owned `recon`, and returns the
    /// total encoded byte count.
    fn trial(
        &mut self,
        sample: &SampleBuf,
        frames: usize,
        crf: u32,
        recon: &mut SampleBuf,
    ) -> Result<u64, Error>;
}

#[derive(Debug, Clone)]
pub struct TrialOptions {
    pub fps:       i32,
    pub tune_ssim: bool,
}

/// libx264 probe encoder. The Rust binding exposes no mid-stream
/// rate-control reconfiguration, so each trial opens a fresh encoder with
/// the rate factor in its open options and a fresh decoder for the
/// reconstruction; encoder packets are fed straight to the decoder, which
/// keeps their boundaries without a parser stage.
pub struct X264Trial {
    opts: TrialOptions,
}

impl X264Trial {
    pub const fn new(opts: TrialOptions) -> Self {
        X264Trial { opts }
    }

    fn open_encoder(
        &self,
        width: u32,
        height: u32,
        crf: u32,
    ) -> Result<ffmpeg::encoder::video::Encoder, Error> {
        let h264 = ffmpeg::encoder::find(codec::Id::H264)
            .ok_or(Error::Encode(FfmpegError::EncoderNotFound))?;
        let mut video = codec::context::Context::new_with_codec(h264)
            .encoder()
            .video()
            .map_err(Error::Encode)?;
        video.set_width(width);
        video.set_height(height);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(Rational::new(1, self.opts.fps));
        video.set_frame_rate(Some(Rational::new(self.opts.fps, 1)));

        let mut opts = Dictionary::new();
        opts.set("preset", "medium");
        opts.set("profile", "high");
        if self.opts.tune_ssim {
            opts.set("tune", "ssim");
        }
        opts.set("crf", &crf.to_string());
        video.open_as_with(h264, opts).map_err(Error::Encode)
    }

    fn open_decoder(&self) -> Result<ffmpeg::decoder::video::Video, Error> {
        let h264 = ffmpeg::decoder::find(codec::Id::H264)
            .ok_or(Error::Encode(FfmpegError::DecoderNotFound))?;
        codec::context::Context::new_with_codec(h264)
            .decoder()
            .video()
            .map_err(Error::Encode)
    }
}

fn collect_frames(
    decoder: &mut ffmpeg::decoder::video::Video,
    decoded: &mut frame::Video,
    recon: &mut SampleBuf,
) -> Result<(), Error> {
    loop {
        match decoder.receive_frame(decoded) {
            Ok(()) => recon.push_frame(decoded),
            Err(FfmpegError::Other { errno: EAGAIN }) | Err(FfmpegError::Eof) => return Ok(()),
            Err(e) => return Err(Error::Encode(e)),
        }
    }
}

fn drain_packets(
    encoder: &mut ffmpeg::encoder::video::Encoder,
    decoder: &mut ffmpeg::decoder::video::Video,
    packet: &mut Packet,
    decoded: &mut frame::Video,
    recon: &mut SampleBuf,
) -> Result<u64, Error> {
    let mut bytes = 0u64;
    loop {
        match encoder.receive_packet(packet) {
            Ok(()) => {
                bytes += packet.size() as u64;
                decoder.send_packet(&*packet).map_err(Error::Encode)?;
                collect_frames(decoder, decoded, recon)?;
            }
            Err(FfmpegError::Other { errno: EAGAIN }) | Err(FfmpegError::Eof) => return Ok(bytes),
            Err(e) => return Err(Error::Encode(e)),
        }
    }
}

impl TrialEncoder for X264Trial {
    fn trial(
        &mut self,
        sample: &SampleBuf,
        frames: usize,
        crf: u32,
        recon: &mut SampleBuf,
    ) -> Result<u64, Error> {
        if sample.is_empty() {
            return Err(Error::Encode(FfmpegError::InvalidData));
        }
        let count = frames.min(sample.frames()).max(1);
        recon.reset(sample.width(), sample.height());

        let mut encoder = self.open_encoder(sample.width(), sample.height(), crf)?;
        let mut decoder = self.open_decoder()?;
        let mut frame = frame::Video::new(Pixel::YUV420P, sample.width(), sample.height());
        let mut decoded = frame::Video::empty();
        let mut packet = Packet::empty();
        let mut bytes = 0u64;

        for index in 0..count {
            sample.fill_frame(index, &mut frame);
            frame.set_pts(Some(index as i64));
            encoder.send_frame(&frame).map_err(Error::Encode)?;
            bytes += drain_packets(&mut encoder, &mut decoder, &mut packet, &mut decoded, recon)?;
        }

        // End-of-stream flush so every output byte is accounted for.
        encoder.send_eof().map_err(Error::Encode)?;
        bytes += drain_packets(&mut encoder, &mut decoder, &mut packet, &mut decoded, recon)?;
        decoder.send_eof().map_err(Error::Encode)?;
        collect_frames(&mut decoder, &mut decoded, recon)?;

        trace!(crf, frames = count, bytes, recon = recon.frames(), "trial complete");
        Ok(bytes)
    }
}
