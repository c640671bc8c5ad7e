use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// One bar per scenario, drawn on stderr so stdout stays clean for the digest.
pub(crate) struct HumanProgress {
    inner: Mutex<Inner>,
}

struct Inner {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl HumanProgress {
    pub(crate) fn new() -> Self {
        let multi = MultiProgress::new();
        multi.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));

        Self {
            inner: Mutex::new(Inner {
                multi,
                bars: HashMap::new(),
            }),
        }
    }

    pub(crate) fn update(&self, scenario: &str, timeline: Duration, elapsed: Duration, message: String) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let Inner { multi, bars } = &mut *inner;
        let pb = bars.entry(scenario.to_string()).or_insert_with(|| {
            let pb = multi.add(ProgressBar::new(0));
            pb.set_style(bar_style());
            pb.set_prefix(scenario.to_string());
            pb
        });

        let total_ms = u64::try_from(timeline.as_millis()).unwrap_or(u64::MAX);
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        pb.set_length(total_ms);
        pb.set_position(elapsed_ms.min(total_ms));
        pb.set_message(message);
    }

    pub(crate) fn finish(&self) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for (_, pb) in inner.bars.drain() {
            pb.finish_and_clear();
        }

        let _ = inner.multi.clear();
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [ {bar:20.cyan/blue} ] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░")
}
