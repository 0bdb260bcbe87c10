use crate::output::is_quiet;
use crate::record::Progress;
use crate::ui::{theme, Icons};
use indicatif::{HumanDuration, ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::OwoColorize;
use std::time::Duration;

/// Progress display for a read run, drawn on stderr.
///
/// Determinate bar when the total is known, spinner otherwise. Hidden when
/// stderr is not a terminal.
pub struct ReadProgress {
    pb: ProgressBar,
}

impl ReadProgress {
    pub fn new(initial: Progress) -> Self {
        let visible = console::Term::stderr().is_term() && !is_quiet();

        let pb = match initial.total {
            _ if !visible => ProgressBar::hidden(),
            Some(total) => {
                let pb = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stderr());
                if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} documents ({eta})") {
                    pb.set_style(style);
                }
                pb
            }
            None => {
                let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
                if let Ok(style) = ProgressStyle::with_template("{spinner} {pos} documents") {
                    pb.set_style(style);
                }
                pb.enable_steady_tick(Duration::from_millis(100));
                pb
            }
        };
        pb.set_position(initial.completed);

        Self { pb }
    }

    pub fn update(&self, progress: Progress) {
        self.pb.set_position(progress.completed);
    }

    pub fn abandon(&self) {
        self.pb.abandon();
    }

    pub fn finish_with_summary(&self, duration: Duration, documents: u64) {
        self.pb.finish_and_clear();
        if is_quiet() {
            return;
        }
        eprintln!(
            "{} {}",
            Icons::CHECK.style(theme().success.clone()),
            format!("Complete in {}", HumanDuration(duration)).style(theme().success.clone())
        );
        eprintln!("  {} {}", Icons::FILE.style(theme().info.clone()), documents);
    }
}
