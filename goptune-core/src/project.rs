use std::path::PathBuf;

use tracing::info;

use crate::error::Error;
use crate::sample::GopSampler;
use crate::search::{SearchDriver, SearchOptions};
use crate::table::{Journal, ParamTable};
use crate::trial::{TrialOptions, X264Trial};
use crate::unsharp::UnsharpFilter;
use crate::vmaf::{self, Vmaf, VmafOptions};
use crate::CancelToken;

/// One parameter-search run over one input file.
#[derive(Debug, Clone)]
pub struct Project {
    /// Input video.
    pub input:          PathBuf,
    /// Parameter-table journal destination; `None` keeps the table in
    /// memory only.
    pub output:         Option<PathBuf>,
    pub search:         SearchOptions,
    /// libvmaf model file; `None` uses the library default.
    pub vmaf_model:     Option<PathBuf>,
    /// Directory for the libvmaf score log.
    pub log_dir:        PathBuf,
    pub vmaf_threads:   usize,
    pub vmaf_subsample: usize,
}

impl Project {
    /// Walks the input GOP by GOP, appending one record per GOP. On
    /// cancellation the table holds every fully searched GOP and the
    /// in-flight one is discarded.
    pub fn run(&self, cancel: CancelToken) -> Result<ParamTable, Error> {
        ffmpeg::init().map_err(Error::Init)?;
        vmaf::validate_libvmaf()?;

        let mut sampler =
            GopSampler::open(&self.input, self.search.sample_frames, self.search.min_gop)?;
        let fps = sampler.frame_rate();
        info!(input = %self.input.display(), fps, "starting parameter search");

        let trial = X264Trial::new(TrialOptions {
            fps,
            tune_ssim: true,
        });
        let filter = UnsharpFilter::new(fps);
        let scorer = Vmaf::new(VmafOptions {
            model:     self.vmaf_model.clone(),
            log_path:  self.log_dir.join("vmaf.json"),
            threads:   self.vmaf_threads,
            subsample: self.vmaf_subsample,
            fps,
        });
        let mut driver = SearchDriver::new(self.search.clone(), trial, filter, scorer, cancel);

        let mut table = ParamTable::new();
        let mut journal = match &self.output {
            Some(path) => Some(Journal::create(path)?),
            None => None,
        };

        while let Some(sample) = sampler.next_sample()? {
            let record = driver.process_gop(sample, fps)?;
            info!(
                gop = table.len(),
                frames = record.frame_count,
                unsharpen = record.unsharpen,
                aq_strength = record.aq_strength,
                target_quality = record.target_quality,
                crf = record.crf,
                "gop parameters selected"
            );
            if let Some(journal) = journal.as_mut() {
                journal.append(&record)?;
            }
            table.append(record);
        }

        info!(gops = table.len(), frames = table.total_frames(), "parameter search complete");
        Ok(table)
    }
}
