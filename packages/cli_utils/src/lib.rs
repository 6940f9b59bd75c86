#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal output for the `opencellid_ingest` binary: one bar for the dump
//! download, one for the documents being loaded, and a logger that prints
//! above them.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use opencellid_models::progress::ProgressCallback;

pub use indicatif::MultiProgress;

const TICK: Duration = Duration::from_millis(100);

/// Progress of one ingest phase drawn with `indicatif`.
///
/// Starts out as a spinner. When the phase learns its size (the dump's
/// Content-Length, say) it turns into a bar with a percentage.
pub struct IndicatifProgress {
    bar: ProgressBar,
    sized: ProgressStyle,
}

impl IndicatifProgress {
    fn spinner(
        multi: &MultiProgress,
        message: &str,
        template: &str,
        sized: ProgressStyle,
    ) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(TICK);
        bar.set_style(
            ProgressStyle::with_template(template)
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());

        Arc::new(Self { bar, sized })
    }

    /// Bar for the dump download, counted in bytes.
    #[must_use]
    pub fn download_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        Self::spinner(
            multi,
            message,
            "{spinner:.cyan} {msg}",
            sized_style(
                "  {msg} {wide_bar:.cyan/dim} {bytes}/{total_bytes} {percent}% [{bytes_per_sec}, {eta}]",
            ),
        )
    }

    /// Running count of documents written to the collection. Dumps carry no
    /// row count, so this normally never gets a total.
    #[must_use]
    pub fn records_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        Self::spinner(
            multi,
            message,
            "{spinner:.yellow} {msg} {human_pos} records [{elapsed}]",
            sized_style("  {msg} {wide_bar:.yellow/dim} {human_pos}/{human_len} {percent}% [{eta}]"),
        )
    }
}

fn sized_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(self.sized.clone());
    }

    fn set_position(&self, pos: u64) {
        self.bar.set_position(pos);
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

/// Installs `pretty_env_logger` behind `indicatif-log-bridge` and returns
/// the [`MultiProgress`] the ingest bars belong to.
///
/// `RUST_LOG` picks the level; without it only `info` and above are shown.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(log::LevelFilter::Info);
    let logger = builder.parse_env("RUST_LOG").build();
    let level = logger.filter();

    // A second call in the same process keeps the first logger.
    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok();

    log::set_max_level(level);

    multi
}

#[cfg(test)]
mod tests {
    use indicatif::ProgressDrawTarget;

    use super::*;

    #[test]
    fn download_bar_takes_the_dump_length() {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        let bar = multi.add(ProgressBar::new_spinner());
        let progress = IndicatifProgress {
            bar: bar.clone(),
            sized: sized_style("{bytes}/{total_bytes}"),
        };

        progress.inc(512);
        progress.set_total(2048);
        progress.inc(1024);

        assert_eq!(bar.length(), Some(2048));
        assert_eq!(bar.position(), 1024);
    }
}
