//! Batch progress aggregation.
//!
//! Folds per-file percentages into one overall percentage for the whole
//! batch, giving every file an equal `1/num_files` share. The aggregator is
//! a plain sequential fold: the orchestrator feeds it and forwards the
//! returned [`ProgressUpdate`]s to whatever displays progress.

/// Display mode of a progress indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    Determinate,
    Indeterminate,
}

/// A change the progress display should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUpdate {
    SetDeterminate(bool),
    Percent(u8),
}

/// Combines per-file progress into a monotonic 0–100 batch percentage.
///
/// - Starts `Indeterminate`; the first update switches to `Determinate`.
/// - When a non-final file reaches 100 %, switches to `Indeterminate` until
///   the next file reports, so the bar does not sit "stuck" at a full share.
/// - Emits a percentage only when it differs from the last one emitted.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    num_files: usize,
    mode: ProgressMode,
    last_reported: Option<u8>,
    /// Set after a non-final file completed; holds that file's index.
    waiting_after: Option<usize>,
}

impl ProgressAggregator {
    pub fn new(num_files: usize) -> Self {
        Self {
            num_files: num_files.max(1),
            mode: ProgressMode::Indeterminate,
            last_reported: None,
            waiting_after: None,
        }
    }

    /// Overall percentage for `file_percent` of file `file_index`.
    ///
    /// `floor(i * 100 / n) + floor(p / n)`, except that a finished file
    /// reports the full `floor((i + 1) * 100 / n)` so the last file ends
    /// at exactly 100.
    pub fn overall_for(num_files: usize, file_index: usize, file_percent: u8) -> u8 {
        let n = num_files.max(1) as u64;
        let i = file_index as u64;
        let p = u64::from(file_percent.min(100));

        let overall = if p >= 100 {
            (i + 1) * 100 / n
        } else {
            i * 100 / n + p / n
        };
        overall.min(100) as u8
    }

    /// Records progress of one file and returns the display changes.
    pub fn on_file_percent(&mut self, file_index: usize, file_percent: u8) -> Vec<ProgressUpdate> {
        let mut updates = Vec::new();
        let file_percent = file_percent.min(100);

        let back_to_determinate = match (self.mode, self.waiting_after) {
            (ProgressMode::Indeterminate, None) => true,
            (ProgressMode::Indeterminate, Some(done)) => file_index > done,
            (ProgressMode::Determinate, _) => false,
        };
        if back_to_determinate {
            self.mode = ProgressMode::Determinate;
            self.waiting_after = None;
            updates.push(ProgressUpdate::SetDeterminate(true));
        }

        let overall = Self::overall_for(self.num_files, file_index, file_percent)
            .max(self.last_reported.unwrap_or(0));

        if self.last_reported != Some(overall) {
            self.last_reported = Some(overall);
            updates.push(ProgressUpdate::Percent(overall));
        }

        let is_final_file = file_index + 1 >= self.num_files;
        if file_percent == 100 && !is_final_file && self.mode == ProgressMode::Determinate {
            self.mode = ProgressMode::Indeterminate;
            self.waiting_after = Some(file_index);
            updates.push(ProgressUpdate::SetDeterminate(false));
        }

        updates
    }

    /// Last percentage emitted (0 before any update).
    pub fn overall_percent(&self) -> u8 {
        self.last_reported.unwrap_or(0)
    }

    pub fn mode(&self) -> ProgressMode {
        self.mode
    }

    pub fn num_files(&self) -> usize {
        self.num_files
    }
}
