#[cfg(test)]
mod tests;

use std::ops::Range;
use std::path::{Path, PathBuf};

use ffmpeg::format::Pixel;
use ffmpeg::util::error::EAGAIN;
use ffmpeg::{filter, frame, Error as FfmpegError};
use path_abs::{PathAbs, PathInfo};
use serde::Deserialize;
use tracing::trace;

use crate::buffer::SampleBuf;
use crate::error::Error;

/// Perceptual-quality metric over the luma of two equally shaped buffers.
/// Pure in the buffers and parameters.
pub trait QualityScorer {
    /// Scores `distorted` against `reference` over the half-open frame
    /// `range`, applied to both buffers.
    fn score(
        &mut self,
        reference: &SampleBuf,
        distorted: &SampleBuf,
        range: Range<usize>,
    ) -> Result<f64, Error>;
}

#[derive(Debug, Clone)]
pub struct VmafOptions {
    pub model:     Option<PathBuf>,
    pub log_path:  PathBuf,
    pub threads:   usize,
    pub subsample: usize,
    pub fps:       i32,
}

/// VMAF through the ffmpeg `libvmaf` filter: both buffers are pushed
/// through a two-input graph, the filter writes a JSON log, and the mean
/// frame score is read back from it.
pub struct Vmaf {
    opts: VmafOptions,
}

impl Vmaf {
    pub const fn new(opts: VmafOptions) -> Self {
        Vmaf { opts }
    }

    fn filter_spec(&self) -> Result<String, Error> {
        let mut spec = format!(
            "[distorted][ref]libvmaf=log_fmt=json:log_path={}",
            escape_path_in_filter(&self.opts.log_path)?
        );
        if let Some(model) = &self.opts.model {
            spec.push_str(&format!(":model=path={}", escape_path_in_filter(model)?));
        }
        spec.push_str(&format!(
            ":n_threads={}:n_subsample={}",
            self.opts.threads, self.opts.subsample
        ));
        Ok(spec)
    }

    fn build_graph(&self, width: u32, height: u32) -> Result<filter::Graph, Error> {
        let buffer = filter::find("buffer").ok_or_else(not_found)?;
        let buffersink = filter::find("buffersink").ok_or_else(not_found)?;

        let mut graph = filter::Graph::new();
        let args = format!(
            "video_size={width}x{height}:pix_fmt=yuv420p:time_base=1/{}:pixel_aspect=1/1",
            self.opts.fps
        );
        graph.add(&buffer, "distorted", &args).map_err(scorer_err)?;
        graph.add(&buffer, "ref", &args).map_err(scorer_err)?;
        graph.add(&buffersink, "out", "").map_err(scorer_err)?;
        if let Some(mut sink) = graph.get("out") {
            sink.set_pixel_format(Pixel::YUV420P);
        }

        let spec = self.filter_spec()?;
        trace!(%spec, "building libvmaf graph");
        graph
            .output("distorted", 0)
            .and_then(|p| p.output("ref", 0))
            .and_then(|p| p.input("out", 0))
            .and_then(|p| p.parse(&spec))
            .map_err(scorer_err)?;
        graph.validate().map_err(scorer_err)?;
        Ok(graph)
    }

    fn push(
        graph: &mut filter::Graph,
        source: &str,
        buf: &SampleBuf,
        index: usize,
        pts: i64,
    ) -> Result<(), Error> {
        // The source takes ownership of the frame's planes, so each push
        // gets a fresh allocation.
        let mut frame = frame::Video::new(Pixel::YUV420P, buf.width(), buf.height());
        buf.fill_frame(index, &mut frame);
        frame.set_pts(Some(pts));
        graph
            .get(source)
            .ok_or_else(not_found)?
            .source()
            .add(&frame)
            .map_err(scorer_err)
    }

    fn drain(graph: &mut filter::Graph) -> Result<(), Error> {
        let mut scored = frame::Video::empty();
        loop {
            let status = graph
                .get("out")
                .ok_or_else(not_found)?
                .sink()
                .frame(&mut scored);
            match status {
                Ok(()) => {}
                Err(FfmpegError::Other { errno: EAGAIN }) | Err(FfmpegError::Eof) => return Ok(()),
                Err(e) => return Err(scorer_err(e)),
            }
        }
    }
}

impl QualityScorer for Vmaf {
    fn score(
        &mut self,
        reference: &SampleBuf,
        distorted: &SampleBuf,
        range: Range<usize>,
    ) -> Result<f64, Error> {
        if (reference.width(), reference.height()) != (distorted.width(), distorted.height()) {
            return Err(Error::Scorer("reference and distorted shapes differ".into()));
        }
        let hi = range.end.min(reference.frames()).min(distorted.frames());
        let lo = range.start.min(hi);
        if lo == hi {
            return Err(Error::Scorer("empty scoring range".into()));
        }

        let mut graph = self.build_graph(reference.width(), reference.height())?;
        for (pts, index) in (lo..hi).enumerate() {
            Self::push(&mut graph, "distorted", distorted, index, pts as i64)?;
            Self::push(&mut graph, "ref", reference, index, pts as i64)?;
            Self::drain(&mut graph)?;
        }
        for source in ["distorted", "ref"] {
            graph
                .get(source)
                .ok_or_else(not_found)?
                .source()
                .flush()
                .map_err(scorer_err)?;
        }
        Self::drain(&mut graph)?;
        // The filter writes its log when the graph is torn down.
        drop(graph);

        let scores = read_vmaf_log(&self.opts.log_path)?;
        if scores.is_empty() {
            return Err(Error::Scorer("libvmaf produced no frame scores".into()));
        }
        Ok(mean(&scores))
    }
}

fn not_found() -> Error {
    Error::Scorer("libvmaf graph node missing".into())
}

fn scorer_err(e: FfmpegError) -> Error {
    Error::Scorer(e.to_string())
}

#[derive(Deserialize, Debug)]
struct VmafScore {
    vmaf: f64,
}

#[derive(Deserialize, Debug)]
struct VmafFrame {
    metrics: VmafScore,
}

#[derive(Deserialize, Debug)]
struct VmafResult {
    frames: Vec<VmafFrame>,
}

fn parse_vmaf_log(raw: &str) -> Result<Vec<f64>, Error> {
    let result: VmafResult = serde_json::from_str(raw)
        .map_err(|e| Error::Scorer(format!("malformed libvmaf log: {e}")))?;
    Ok(result.frames.into_iter().map(|f| f.metrics.vmaf).collect())
}

pub fn read_vmaf_log(path: &Path) -> Result<Vec<f64>, Error> {
    let raw = std::fs::read_to_string(path)?;
    parse_vmaf_log(&raw)
}

fn mean(scores: &[f64]) -> f64 {
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// Fails early when the loaded ffmpeg build lacks the libvmaf filter.
pub fn validate_libvmaf() -> Result<(), Error> {
    if filter::find("libvmaf").is_none() {
        return Err(Error::Scorer(
            "ffmpeg is not built with --enable-libvmaf, but quality scoring requires it".into(),
        ));
    }
    Ok(())
}

/// Escapes a path for use inside a filter option value; ffmpeg treats the
/// drive colon of absolute Windows paths as an option separator.
fn escape_path_in_filter(path: &Path) -> Result<String, Error> {
    let abs = PathAbs::new(path)
        .map_err(|e| Error::Scorer(format!("cannot resolve path {}: {e}", path.display())))?;
    let raw = abs
        .as_path()
        .to_str()
        .ok_or_else(|| Error::Scorer(format!("non-unicode path {}", path.display())))?;
    if cfg!(target_os = "windows") {
        Ok(raw.replace('\\', "/").replace(':', r"\\:"))
    } else {
        Ok(raw.to_string())
    }
}
