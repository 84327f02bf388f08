use ffmpeg::format::Pixel;
use ffmpeg::util::error::EAGAIN;
use ffmpeg::{filter, frame, Error as FfmpegError};
use tracing::trace;

use crate::buffer::SampleBuf;
use crate::error::Error;

/// Pre-filters a GOP sample before a trial encode. Stateless: the shape of
/// the output equals the shape of the input, and two calls with the same
/// amount produce identical pixels.
pub trait Prefilter {
    /// Runs the first `limit` frames of `input` through the filter at the
    /// given amount, writing into the caller-owned `output`.
    fn apply(
        &mut self,
        input: &SampleBuf,
        amount: f64,
        limit: usize,
        output: &mut SampleBuf,
    ) -> Result<(), Error>;
}

/// 5×5 luma unsharp mask via an ffmpeg filter graph; chroma passes through
/// untouched. The graph is rebuilt per call since the amount is baked into
/// the node options.
pub struct UnsharpFilter {
    fps: i32,
}

impl UnsharpFilter {
    pub const fn new(fps: i32) -> Self {
        UnsharpFilter { fps }
    }

    fn build_graph(&self, width: u32, height: u32, amount: f64) -> Result<filter::Graph, Error> {
        let buffer =
            filter::find("buffer").ok_or(Error::Filter(FfmpegError::FilterNotFound))?;
        let buffersink =
            filter::find("buffersink").ok_or(Error::Filter(FfmpegError::FilterNotFound))?;

        let mut graph = filter::Graph::new();
        let args = format!(
            "video_size={width}x{height}:pix_fmt=yuv420p:time_base=1/{}:pixel_aspect=1/1",
            self.fps
        );
        graph.add(&buffer, "in", &args).map_err(Error::Filter)?;
        graph.add(&buffersink, "out", "").map_err(Error::Filter)?;
        if let Some(mut sink) = graph.get("out") {
            sink.set_pixel_format(Pixel::YUV420P);
        }

        let spec = format!("unsharp=luma_msize_x=5:luma_msize_y=5:luma_amount={amount:.1}");
        trace!(%spec, "building unsharp graph");
        graph
            .output("in", 0)
            .and_then(|p| p.input("out", 0))
            .and_then(|p| p.parse(&spec))
            .map_err(Error::Filter)?;
        graph.validate().map_err(Error::Filter)?;
        Ok(graph)
    }
}

fn drain_sink(graph: &mut filter::Graph, output: &mut SampleBuf) -> Result<(), Error> {
    let mut filtered = frame::Video::empty();
    loop {
        let status = graph
            .get("out")
            .ok_or(Error::Filter(FfmpegError::FilterNotFound))?
            .sink()
            .frame(&mut filtered);
        match status {
            Ok(()) => output.push_frame(&filtered),
            Err(FfmpegError::Other { errno: EAGAIN }) | Err(FfmpegError::Eof) => return Ok(()),
            Err(e) => return Err(Error::Filter(e)),
        }
    }
}

impl Prefilter for UnsharpFilter {
    fn apply(
        &mut self,
        input: &SampleBuf,
        amount: f64,
        limit: usize,
        output: &mut SampleBuf,
    ) -> Result<(), Error> {
        output.reset(input.width(), input.height());
        let frames = input.frames().min(limit);
        if frames == 0 {
            return Ok(());
        }

        let mut graph = self.build_graph(input.width(), input.height(), amount)?;
        for index in 0..frames {
            // The source takes ownership of the frame's planes, so each push
            // gets a fresh allocation.
            let mut frame = frame::Video::new(Pixel::YUV420P, input.width(), input.height());
            input.fill_frame(index, &mut frame);
            frame.set_pts(Some(index as i64));
            graph
                .get("in")
                .ok_or(Error::Filter(FfmpegError::FilterNotFound))?
                .source()
                .add(&frame)
                .map_err(Error::Filter)?;
            drain_sink(&mut graph, output)?;
        }

        graph
            .get("in")
            .ok_or(Error::Filter(FfmpegError::FilterNotFound))?
            .source()
            .flush()
            .map_err(Error::Filter)?;
        drain_sink(&mut graph, output)?;
        Ok(())
    }
}
