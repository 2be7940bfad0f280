use crate::container::Progress;
use core::fmt::{Debug, Formatter};
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Instant;

const DETERMINATE_TEMPLATE: &str = "{prefix:>12.bold.cyan} [{bar:25}] {msg}";
const DETERMINATE_TEMPLATE_NO_COLOR: &str = "{prefix:>12} [{bar:25}] {msg}";
const INDETERMINATE_TEMPLATE: &str = "{prefix:>12.bold.cyan} [{spinner}] {elapsed}: {msg}";
const INDETERMINATE_TEMPLATE_NO_COLOR: &str = "{prefix:>12} [{spinner}] {elapsed}: {msg}";

/// A progress bar on stderr that delays showing itself until a threshold is reached.
///
/// Row loops report after every row; `indicatif` rate-limits the actual drawing.
pub struct ProgressReporter {
    bar: ProgressBar,
    visible_after: Instant,
    visible: AtomicBool,
    styled: AtomicBool,
    use_colors: bool,
}

impl ProgressReporter {
    /// Create a new progress reporter.
    ///
    /// The progress bar will only become visible if operations continue beyond the delay threshold.
    /// When `use_colors` is false, progress bar chrome is rendered without ANSI styling.
    #[must_use]
    pub fn new(delay: Duration, use_colors: bool) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_draw_target(ProgressDrawTarget::hidden());

        Self {
            bar,
            visible_after: Instant::now() + delay,
            visible: AtomicBool::new(false),
            styled: AtomicBool::new(false),
            use_colors,
        }
    }

    fn apply_style(&self, determinate: bool) {
        if self.styled.swap(true, Ordering::Relaxed) {
            return;
        }

        let style = if determinate {
            let template = if self.use_colors { DETERMINATE_TEMPLATE } else { DETERMINATE_TEMPLATE_NO_COLOR };
            ProgressStyle::default_bar()
                .template(template)
                .map(|style| style.progress_chars("=> "))
        } else {
            let template = if self.use_colors { INDETERMINATE_TEMPLATE } else { INDETERMINATE_TEMPLATE_NO_COLOR };
            ProgressStyle::default_spinner().template(template)
        };

        match style {
            Ok(style) => self.bar.set_style(style),
            Err(e) => log::debug!("could not create progress bar style: {e}"),
        }
    }
}

impl Progress for ProgressReporter {
    fn set_phase(&self, phase: &str) {
        self.bar.set_prefix(phase.to_string());
        self.styled.store(false, Ordering::Relaxed);
    }

    fn set_progress(&self, current: u64, total: Option<u64>, message: &str) {
        if !self.visible.load(Ordering::Relaxed) {
            if Instant::now() < self.visible_after {
                return;
            }

            self.visible.store(true, Ordering::Relaxed);
            self.bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        }

        self.apply_style(total.is_some());
        if let Some(total) = total {
            self.bar.set_length(total);
        }
        self.bar.set_position(current);
        self.bar.set_message(message.to_string());
    }

    fn done(&self) {
        if self.visible.load(Ordering::Relaxed) {
            self.bar.finish_and_clear();
        }
    }
}

impl Debug for ProgressReporter {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("bar", &self.bar)
            .field("visible_after", &self.visible_after)
            .field("visible", &self.visible)
            .field("use_colors", &self.use_colors)
            .finish_non_exhaustive()
    }
}
