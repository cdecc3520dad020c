//! Terminal progress for identification commands.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use arbolado::identify::{Progress, ProgressObserver};

/// Spinner shown while a single image is being classified.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            bar.set_style(style);
        }
        Self { bar }
    }
}

impl ProgressObserver for Spinner {
    fn on_pending(&self, image_ref: &str) {
        self.bar.set_message(format!("Identificando {image_ref}..."));
        self.bar.enable_steady_tick(Duration::from_millis(100));
    }

    fn on_finished(&self, _image_ref: &str, _success: bool) {
        self.bar.finish_and_clear();
    }
}

/// Bar advanced once per finished bulk row.
pub struct BulkProgress {
    bar: ProgressBar,
}

impl BulkProgress {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{bar:40.green/white} {pos}/{len} ({percent}%) {msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressObserver for BulkProgress {
    fn on_finished(&self, image_ref: &str, success: bool) {
        if !success {
            self.bar.println(format!("  ✗ {image_ref}"));
        }
    }

    fn on_progress(&self, progress: Progress) {
        self.bar.set_length(progress.total as u64);
        self.bar.set_position(progress.current as u64);
    }
}
