
use std::ops::Range;
use std::sync::atomic::Ordering;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffer::SampleBuf;
use crate::error::Error;
use crate::sample::GopSample;
use crate::sharpness;
use crate::table::GopRecord;
use crate::trial::TrialEncoder;
use crate::unsharp::Prefilter;
use crate::vmaf::QualityScorer;
use crate::CancelToken;

/// Unsharpen grid probed by stage 0.
pub const UNSHARPEN_GRID: [f64; 10] = [0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9];

/// Frames scored at the tail of each reconstruction.
const SCORED_TAIL: usize = 5;

/// Leading frames of the short stage-2 sample left to codec warm-up.
const SHORT_WARMUP: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Frames of pixels retained per GOP sample (N).
    pub sample_frames:      usize,
    /// Truncated sample length for stage-2 probes (K).
    pub short_frames:       usize,
    /// Minimum decoded frames before a keyframe may close a GOP.
    pub min_gop:            usize,
    /// Stage-1 stopping threshold on Δbitrate/Δquality, kb/s per point.
    pub marginal_threshold: f64,
    /// Fabricated marginal cost for the first stage-1 probe, strictly above
    /// the threshold so a single point never stops the sweep.
    pub bootstrap_marginal: f64,
    /// Fixed rate factor for the stage-0 unsharpen probes.
    pub probe_crf:          u32,
    pub min_crf:            u32,
    pub max_crf:            u32,
    /// Stage 2 never steps past this rate factor.
    pub stage2_max_crf:     u32,
    pub target_floor:       f64,
    pub target_ceil:        f64,
    /// Lower the stage-2 target by 2 when that stays at or above 91.
    pub relaxed_target:     bool,
    /// Score stages 0 and 1 against a CRF-5 reconstruction of the sample
    /// instead of the decoded pixels themselves.
    pub crf5_reference:     bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            sample_frames:      50,
            short_frames:       10,
            min_gop:            300,
            marginal_threshold: 400.0,
            bootstrap_marginal: 600.0,
            probe_crf:          23,
            min_crf:            18,
            max_crf:            50,
            stage2_max_crf:     40,
            target_floor:       90.0,
            target_ceil:        96.0,
            relaxed_target:     false,
            crf5_reference:     false,
        }
    }
}

/// Per-GOP orchestration of the three search stages. Owns the scratch
/// buffers; collaborators only ever see borrows of them.
pub struct SearchDriver<T, F, S> {
    opts:      SearchOptions,
    trial:     T,
    filter:    F,
    scorer:    S,
    cancel:    CancelToken,
    reference: SampleBuf,
    filtered:  SampleBuf,
    recon:     SampleBuf,
    trials:    usize,
}

impl<T, F, S> SearchDriver<T, F, S>
where
    T: TrialEncoder,
    F: Prefilter,
    S: QualityScorer,
{
    pub fn new(opts: SearchOptions, trial: T, filter: F, scorer: S, cancel: CancelToken) -> Self {
        SearchDriver {
            opts,
            trial,
            filter,
            scorer,
            cancel,
            reference: SampleBuf::new(),
            filtered: SampleBuf::new(),
            recon: SampleBuf::new(),
            trials: 0,
        }
    }

    /// Runs stages 0–2 for one GOP and returns its parameter record. On
    /// cancellation the in-flight GOP yields `Interrupted` and nothing is
    /// produced for it.
    pub fn process_gop(&mut self, sample: &GopSample, fps: i32) -> Result<GopRecord, Error> {
        self.check_cancel()?;
        self.trials = 0;

        let sharpness = sample.sharpness();
        let aq_strength = sharpness::aq_strength(sharpness);
        let hint = sharpness::unsharpen_hint(sharpness);
        debug!(sharpness, aq_strength, hint, frames = sample.frame_count(), "gop analyzed");

        if self.opts.crf5_reference {
            let frames = sample.buffer().frames();
            self.trial.trial(sample.buffer(), frames, 5, &mut self.reference)?;
        }

        let started = Instant::now();
        let unsharpen = self.stage0(sample, hint)?;
        let stage0_done = Instant::now();
        let target_quality = self.stage1(sample, fps)?;
        let stage1_done = Instant::now();
        let crf = self.stage2(sample, fps, unsharpen, target_quality)?;
        debug!(
            stage0_ms = stage0_done.duration_since(started).as_millis() as u64,
            stage1_ms = stage1_done.duration_since(stage0_done).as_millis() as u64,
            stage2_ms = stage1_done.elapsed().as_millis() as u64,
            "gop search timing"
        );

        Ok(GopRecord {
            frame_count: sample.frame_count(),
            unsharpen,
            aq_strength,
            target_quality,
            crf,
        })
    }

    /// Stage 0: walk the unsharpen grid upward, probing each amount at the
    /// fixed rate factor, until quality stops improving or the amount
    /// passes the sharpness hint.
    fn stage0(&mut self, sample: &GopSample, hint: f64) -> Result<f64, Error> {
        let mut prev: Option<(f64, f64)> = None;
        let mut chosen = UNSHARPEN_GRID[UNSHARPEN_GRID.len() - 1];

        for &amount in &UNSHARPEN_GRID {
            self.check_cancel()?;
            let limit = sample.buffer().frames();
            self.filter.apply(sample.buffer(), amount, limit, &mut self.filtered)?;
            let frames = self.trial_frames(sample.buffer().frames());
            self.trial.trial(&self.filtered, frames, self.opts.probe_crf, &mut self.recon)?;
            let range = tail_range(self.recon.frames());
            let reference = if self.opts.crf5_reference {
                &self.reference
            } else {
                sample.buffer()
            };
            let score = self.scorer.score(reference, &self.recon, range)?;
            debug!(amount, score, "unsharpen probe");

            if let Some((prev_amount, prev_score)) = prev {
                if score <= prev_score {
                    chosen = prev_amount;
                    break;
                }
            }
            if amount > hint {
                chosen = amount;
                break;
            }
            prev = Some((amount, score));
        }

        debug!(unsharpen = chosen, "unsharpen amount selected");
        Ok(chosen)
    }

    /// Stage 1: sweep the rate factor upward on the unfiltered sample and
    /// stop once the marginal bitrate cost of a quality point falls under
    /// the threshold; the score there becomes the quality target.
    fn stage1(&mut self, sample: &GopSample, fps: i32) -> Result<f64, Error> {
        let seconds = (self.opts.sample_frames as f64 - 2.0) / f64::from(fps);
        let mut prev_bitrate = 0.0;
        let mut prev_score = 0.0;
        let mut first = true;
        let mut last_score = 0.0;

        for crf in self.opts.min_crf..=self.opts.max_crf {
            self.check_cancel()?;
            let frames = self.trial_frames(sample.buffer().frames());
            let bytes = self.trial.trial(sample.buffer(), frames, crf, &mut self.recon)?;
            let range = tail_range(self.recon.frames());
            let reference = if self.opts.crf5_reference {
                &self.reference
            } else {
                sample.buffer()
            };
            let score = self.scorer.score(reference, &self.recon, range)?;
            let bitrate = bytes as f64 * 8.0 / seconds / 1024.0;

            let marginal = if first || (score - prev_score).abs() <= 1e-6 {
                first = false;
                self.opts.bootstrap_marginal
            } else {
                (bitrate - prev_bitrate) / (score - prev_score)
            };
            debug!(crf, bitrate, score, marginal, "rate-quality probe");
            last_score = score;

            if marginal <= self.opts.marginal_threshold {
                let target = score.clamp(self.opts.target_floor, self.opts.target_ceil);
                debug!(crf, target, "quality target selected");
                return Ok(target);
            }
            prev_bitrate = bitrate;
            prev_score = score;
        }

        let target = last_score.clamp(self.opts.target_floor, self.opts.target_ceil);
        debug!(target, "sweep exhausted, targeting the last score");
        Ok(target)
    }

    /// Stage 2: adaptive-step search for the final rate factor on the
    /// unsharpened short sample. Every stop rule accepts `crf + 1`.
    fn stage2(
        &mut self,
        sample: &GopSample,
        fps: i32,
        unsharpen: f64,
        target_quality: f64,
    ) -> Result<u32, Error> {
        self.check_cancel()?;
        let short = self.opts.short_frames;
        self.filter.apply(sample.buffer(), unsharpen, short, &mut self.filtered)?;

        let target = if self.opts.relaxed_target && target_quality - 2.0 >= 91.0 {
            target_quality - 2.0
        } else {
            target_quality
        };
        let encode_frames = short
            .saturating_sub(SHORT_WARMUP)
            .max(1)
            .min(self.filtered.frames());
        let seconds = short.saturating_sub(SHORT_WARMUP).max(1) as f64 / f64::from(fps);

        let start = self.opts.min_crf as i32;
        let cap = self.opts.stage2_max_crf as i32;
        let mut crf = start;
        let mut last_crf = start;
        let mut best: Option<(i32, f64, f64)> = None;

        let accepted = loop {
            self.check_cancel()?;
            let bytes = self.trial.trial(&self.filtered, encode_frames, crf as u32, &mut self.recon)?;
            let range = tail_range(self.recon.frames());
            let score = self.scorer.score(&self.filtered, &self.recon, range)?;
            let bitrate = bytes as f64 * 8.0 / seconds / 1024.0;
            let diff = score - target;
            debug!(crf, bitrate, score, diff, "filtered probe");

            let better = match best {
                None => true,
                Some((_, best_bitrate, _)) => diff > -1.0 && bitrate < best_bitrate,
            };
            if better {
                best = Some((crf, bitrate, score));
            }

            if diff.abs() < 1.0 && diff < 0.2 {
                break crf + 1;
            }

            let anchor = ((crf - start) as f64 / 10.0).max(0.2);
            let scale = if diff > 20.0 {
                1.5
            } else if diff > 15.0 {
                2.0
            } else if diff > 10.0 {
                2.5
            } else {
                4.0
            };
            let step_quality = (anchor * scale).max(1.0);

            let step = if diff > 0.0 {
                if crf < last_crf {
                    break crf + 1;
                }
                (diff / step_quality).max(1.0)
            } else {
                if crf == start || crf == last_crf + 1 || crf == last_crf - 1 {
                    break crf + 1;
                }
                (diff / step_quality).min(-1.0)
            };
            let step = step.clamp(-2.0, 5.0);
            // A fractional downward step moves one rate factor, never two.
            let step = if step < 0.0 { step.trunc() } else { step };

            last_crf = crf;
            if crf as f64 + step > f64::from(cap) {
                break crf + 1;
            }
            crf = (crf as f64 + step) as i32;
            if score < target {
                break crf + 1;
            }
        };

        if let Some((crf, bitrate, score)) = best {
            debug!(crf, bitrate, score, "best in-tolerance probe");
        }
        debug!(crf = accepted, target, "final rate factor selected");
        Ok(accepted as u32)
    }

    /// The very first trial of a GOP encodes one frame fewer, budgeting for
    /// the codec's deferred first frame.
    fn trial_frames(&mut self, available: usize) -> usize {
        self.trials += 1;
        if self.trials == 1 {
            available.saturating_sub(1).max(1)
        } else {
            available
        }
    }

    fn check_cancel(&self) -> Result<(), Error> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(Error::Interrupted);
        }
        Ok(())
    }
}

fn tail_range(frames: usize) -> Range<usize> {
    frames.saturating_sub(SCORED_TAIL)..frames
}
