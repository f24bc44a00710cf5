use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::transfer::{DownloadProgress, UploadProgress};

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// Terminal rendering of upload progress, one tick per uploaded chunk
pub struct UploadBar {
    pb: ProgressBar,
}

impl UploadBar {
    pub fn new(file_name: &str, total_chunks: usize, visible: bool) -> Self {
        let pb = ProgressBar::new(total_chunks as u64);
        if !visible {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        pb.set_style(bar_style(
            "{spinner:.green} {prefix} [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}",
        ));
        pb.set_prefix(file_name.to_string());
        Self { pb }
    }

    pub fn update(&self, progress: &UploadProgress) {
        self.pb.set_position(progress.loaded as u64);
        self.pb.set_message(upload_message(progress));
    }

    pub fn finish(&self) {
        self.pb.finish_with_message("done");
    }

    pub fn abandon(&self, reason: &str) {
        self.pb.abandon_with_message(reason.to_string());
    }
}

/// Terminal rendering of download progress in percent
pub struct DownloadBar {
    pb: ProgressBar,
}

impl DownloadBar {
    pub fn new(visible: bool) -> Self {
        let pb = ProgressBar::new(100);
        if !visible {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        pb.set_style(bar_style(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}",
        ));
        Self { pb }
    }

    pub fn update(&self, progress: &DownloadProgress) {
        self.pb.set_position(progress.current as u64);
        self.pb.set_message(download_message(progress));
    }

    pub fn finish(&self) {
        self.pb.finish_with_message("verified");
    }

    pub fn abandon(&self, reason: &str) {
        self.pb.abandon_with_message(reason.to_string());
    }
}

fn upload_message(progress: &UploadProgress) -> String {
    format!("@ {}", progress.throughput)
}

fn download_message(progress: &DownloadProgress) -> String {
    match progress.size {
        Some(size) => format!(
            "{} ({:.2} MB) @ {}",
            progress.name,
            size as f64 / 1_048_576.0,
            progress.speed
        ),
        None => format!("{} @ {}", progress.name, progress.speed),
    }
}
