fn main() {
    println!("Run `cargo test -p batch-scenarios` to execute the batch scenarios.");
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use chunkdrop_transfer::{
        ConnectCause, ErrorKind, PartLimits, S3_MAX_PARTS, S3_MIN_PART_SIZE, TransferResult,
        UploadTask, plan,
    };
    use chunkdrop_upload::mock::{MockChannel, MockFailure, RecordingNotifier};
    use chunkdrop_upload::{BatchOutcome, BatchReport, UploadOptions, UploadOrchestrator};
    use proptest::prelude::*;
    use tempfile::TempDir;

    /// Writes one file per entry of `sizes` and builds a task over them.
    fn task_with_sizes(dir: &Path, sizes: &[usize]) -> UploadTask {
        let paths: Vec<PathBuf> = sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| {
                let path = dir.join(format!("file{i}.bin"));
                let data: Vec<u8> = (0..size).map(|b| (b % 251) as u8).collect();
                std::fs::write(&path, data).unwrap();
                path
            })
            .collect();
        UploadTask::from_paths(&paths, "batch").unwrap()
    }

    async fn run_batch(
        channel: &MockChannel,
        task: &UploadTask,
    ) -> (BatchReport, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let report = UploadOrchestrator::new(
            channel.clone(),
            notifier.clone(),
            UploadOptions::default(),
        )
        .run(task)
        .await
        .unwrap();
        (report, notifier)
    }

    // --- Part planning ---

    #[test]
    fn small_file_gets_one_minimum_sized_part() {
        let p = plan(1_000_000, S3_MAX_PARTS, S3_MIN_PART_SIZE);
        assert_eq!(p.part_size_bytes, 5_242_880);
        assert_eq!(p.num_parts, 1);
    }

    #[test]
    fn huge_file_is_capped_at_max_parts() {
        let p = PartLimits::S3.plan(100_000_000_000);
        assert_eq!(p.part_size_bytes, 10_000_000);
        assert_eq!(p.num_parts, 10_000);
    }

    // --- Batch scenarios ---

    #[tokio::test]
    async fn three_files_progress_to_thirds() {
        let dir = TempDir::new().unwrap();
        let task = task_with_sizes(dir.path(), &[12, 12, 12]);
        let channel = MockChannel::new();

        let (report, notifier) = run_batch(&channel, &task).await;

        assert!(report.fully_succeeded);
        let percents = notifier.percents();
        assert!(percents.contains(&33));
        assert!(percents.contains(&66));
        assert_eq!(percents.last(), Some(&100));
        // Connecting, then one indeterminate gap per file boundary.
        assert_eq!(
            notifier.mode_changes(),
            vec![false, true, false, true, false, true]
        );
    }

    #[tokio::test]
    async fn middle_file_failure_is_isolated() {
        let dir = TempDir::new().unwrap();
        let task = task_with_sizes(dir.path(), &[12, 12, 12]);
        let channel = MockChannel::new().fail_part(1, 1, MockFailure::Terminal, 1);

        let (report, _) = run_batch(&channel, &task).await;

        let kinds: Vec<Option<ErrorKind>> =
            report.results.iter().map(TransferResult::error_kind).collect();
        assert_eq!(kinds, vec![None, Some(ErrorKind::Transfer), None]);
        assert_eq!(channel.aborted(), vec![1]);
        assert_eq!(report.outcome, BatchOutcome::PartiallyFailed);
    }

    #[tokio::test]
    async fn connect_failure_sends_nothing() {
        let dir = TempDir::new().unwrap();
        let task = task_with_sizes(dir.path(), &[12, 12, 12]);
        let channel = MockChannel::new().fail_connect(ConnectCause::NotFound, "Server not found.");
        let notifier = Arc::new(RecordingNotifier::new());

        let result = UploadOrchestrator::new(
            channel.clone(),
            notifier.clone(),
            UploadOptions::default(),
        )
        .run(&task)
        .await;

        assert!(result.is_err());
        assert_eq!(channel.send_part_calls(), 0);
        assert_eq!(notifier.errors().len(), 1);
        assert!(notifier.percents().is_empty());
    }

    #[tokio::test]
    async fn collisions_pick_next_free_suffix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, b"jpeg data").unwrap();
        let task = UploadTask::from_paths(&[&path], "").unwrap();

        let channel = MockChannel::new().with_existing(&["photo.jpg"]);
        run_batch(&channel, &task).await;
        assert_eq!(channel.finalized(), vec!["photo-1.jpg"]);

        let channel = MockChannel::new().with_existing(&["photo.jpg", "photo-1.jpg"]);
        run_batch(&channel, &task).await;
        assert_eq!(channel.finalized(), vec!["photo-2.jpg"]);
    }

    #[tokio::test]
    async fn single_file_has_primary_url() {
        let dir = TempDir::new().unwrap();
        let task = task_with_sizes(dir.path(), &[9]);

        let (report, _) = run_batch(&MockChannel::new(), &task).await;

        assert_eq!(report.primary_url.as_deref(), Some("batch/file0.bin"));
        assert_eq!(report.clipboard_text().as_deref(), Some("batch/file0.bin"));
    }

    #[tokio::test]
    async fn several_files_have_url_list_only() {
        let dir = TempDir::new().unwrap();
        let task = task_with_sizes(dir.path(), &[9, 3]);

        let (report, _) = run_batch(&MockChannel::new(), &task).await;

        assert!(report.primary_url.is_none());
        assert_eq!(report.urls, vec!["batch/file0.bin", "batch/file1.bin"]);
    }

    // --- Properties ---

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn percents_rise_without_repeats_to_100(
            sizes in proptest::collection::vec(0usize..64, 1..6),
        ) {
            let dir = TempDir::new().unwrap();
            let task = task_with_sizes(dir.path(), &sizes);
            let channel = MockChannel::new();

            let (report, notifier) = runtime().block_on(run_batch(&channel, &task));

            prop_assert!(report.fully_succeeded);
            let percents = notifier.percents();
            prop_assert!(percents.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(percents.last().copied(), Some(100));
        }

        #[test]
        fn results_follow_input_order(
            sizes in proptest::collection::vec(1usize..40, 1..6),
            failing in proptest::collection::vec(any::<bool>(), 6),
        ) {
            let dir = TempDir::new().unwrap();
            let task = task_with_sizes(dir.path(), &sizes);
            let mut channel = MockChannel::new();
            for (file, _) in failing.iter().take(sizes.len()).enumerate().filter(|(_, f)| **f) {
                channel = channel.fail_part(file, 0, MockFailure::Terminal, 1);
            }

            let (report, _) = runtime().block_on(run_batch(&channel, &task));

            prop_assert_eq!(report.results.len(), sizes.len());
            for (i, (result, file)) in report.results.iter().zip(task.files()).enumerate() {
                prop_assert_eq!(result.local_path(), file.path().display().to_string());
                prop_assert_eq!(result.is_success(), !failing[i]);
            }
        }
    }
}
