use std::io;

use thiserror::Error;

/// Failure kinds of a parameter-search run. Try-again and natural
/// end-of-stream conditions are control flow in the components that see
/// them and never surface here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("ffmpeg initialization failed: {0}")]
    Init(ffmpeg::Error),

    #[error("demuxer failure: {0}")]
    Demux(ffmpeg::Error),

    #[error("decoder failure: {0}")]
    Decode(ffmpeg::Error),

    #[error("unsupported decoded pixel format {0:?}, expected 8-bit 4:2:0")]
    UnsupportedPixelFormat(ffmpeg::format::Pixel),

    #[error("trial encoder failure: {0}")]
    Encode(ffmpeg::Error),

    #[error("unsharp filter failure: {0}")]
    Filter(ffmpeg::Error),

    #[error("quality scorer failure: {0}")]
    Scorer(String),

    #[error("interrupted")]
    Interrupted,

    #[error("io failure: {0}")]
    Io(#[from] io::Error),
}
