//! End-to-end sync runs against an in-memory remote tree.

mod common;

use common::{files_in, init_tracing, options, read, FakeSource, ROOT};
use futures_util::StreamExt;
use ilias_client::RetryConfig;
use ilias_core::RemoteSource;
use ilias_sync::{
    CrawlEvent, CrawlOptions, Crawler, ItemOutcome, ManifestStore, SyncError, SyncRunner,
    MANIFEST_FILE,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// `root/{A.txt, sub/{B.txt}}`
fn basic_tree() -> Arc<FakeSource> {
    let source = FakeSource::new();
    source.add_file(ROOT, "1", "A.txt", b"alpha");
    source.add_folder(ROOT, "2", "sub");
    source.add_file("2", "3", "B.txt", b"bravo bravo");
    Arc::new(source)
}

async fn run(source: &Arc<FakeSource>, options: ilias_sync::SyncOptions) -> ilias_sync::SyncReport {
    SyncRunner::new(Arc::clone(source), options, CancellationToken::new())
        .run()
        .await
        .unwrap()
}

// =============================================================================
// Basic scenarios
// =============================================================================

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn test_first_run_creates_then_second_run_skips() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();

        let first = run(&source, options(dir.path())).await;
        assert_eq!(first.outcome_of("A.txt"), Some(ItemOutcome::Created));
        assert_eq!(first.outcome_of("sub/B.txt"), Some(ItemOutcome::Created));
        assert!(!first.has_problems());
        assert_eq!(read(dir.path(), "A.txt"), b"alpha");
        assert_eq!(read(dir.path(), "sub/B.txt"), b"bravo bravo");

        let second = run(&source, options(dir.path())).await;
        assert_eq!(second.outcome_of("A.txt"), Some(ItemOutcome::Skipped));
        assert_eq!(second.outcome_of("sub/B.txt"), Some(ItemOutcome::Skipped));
        assert_eq!(source.total_opens(), 2, "second run must not download");

        assert_eq!(
            files_in(dir.path()),
            vec![MANIFEST_FILE.to_string(), "A.txt".to_string(), "sub/B.txt".to_string()]
        );
    }

    #[tokio::test]
    async fn test_manifest_records_hash_and_identity() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        run(&source, options(dir.path())).await;

        let store = ManifestStore::load(dir.path()).await.unwrap();
        let entry = store.manifest().get("A.txt").unwrap();
        assert_eq!(entry.remote_id.as_str(), "1");
        assert_eq!(entry.local.size, 5);
        // sha256("alpha")
        assert_eq!(
            entry.local.sha256,
            "8ed3f6ad685b959ead7022518e1af76cd816f8e8ec7ccdda1ed4018e8f2223f8"
        );
        assert!(entry.orphaned_since.is_none());
    }

    #[tokio::test]
    async fn test_removed_remote_file_is_orphaned_and_kept() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        run(&source, options(dir.path())).await;

        source.unlink("2", "3");
        let report = run(&source, options(dir.path())).await;

        assert_eq!(report.outcome_of("sub/B.txt"), Some(ItemOutcome::Orphaned));
        assert!(dir.path().join("sub/B.txt").exists());
        let store = ManifestStore::load(dir.path()).await.unwrap();
        assert!(store.manifest().get("sub/B.txt").unwrap().orphaned_since.is_some());
    }

    #[tokio::test]
    async fn test_orphans_deleted_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        run(&source, options(dir.path())).await;
        source.unlink("2", "3");

        let mut opts = options(dir.path());
        opts.delete_orphans = true;
        let report = run(&source, opts).await;

        assert_eq!(report.outcome_of("sub/B.txt"), Some(ItemOutcome::Deleted));
        assert!(!dir.path().join("sub/B.txt").exists());
        let store = ManifestStore::load(dir.path()).await.unwrap();
        assert!(store.manifest().get("sub/B.txt").is_none());
    }

    #[tokio::test]
    async fn test_remote_change_updates_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        run(&source, options(dir.path())).await;

        source.set_content("1", b"alpha, second edition");
        let report = run(&source, options(dir.path())).await;

        assert_eq!(report.outcome_of("A.txt"), Some(ItemOutcome::Updated));
        assert_eq!(read(dir.path(), "A.txt"), b"alpha, second edition");
    }

    #[tokio::test]
    async fn test_local_edit_and_remote_change_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        run(&source, options(dir.path())).await;

        std::fs::write(dir.path().join("A.txt"), b"my notes").unwrap();
        source.set_content("1", b"alpha v2");
        let report = run(&source, options(dir.path())).await;

        assert_eq!(report.outcome_of("A.txt"), Some(ItemOutcome::Conflict));
        assert_eq!(read(dir.path(), "A.txt"), b"my notes");
        assert!(report.has_problems());
    }

    #[tokio::test]
    async fn test_deleted_local_file_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        run(&source, options(dir.path())).await;

        std::fs::remove_file(dir.path().join("sub/B.txt")).unwrap();
        let report = run(&source, options(dir.path())).await;

        assert_eq!(report.outcome_of("sub/B.txt"), Some(ItemOutcome::Created));
        assert_eq!(read(dir.path(), "sub/B.txt"), b"bravo bravo");
    }

    #[tokio::test]
    async fn test_moved_file_follows_remote() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        run(&source, options(dir.path())).await;

        source.unlink(ROOT, "1");
        source.link("2", "1");
        let report = run(&source, options(dir.path())).await;

        assert_eq!(report.outcome_of("sub/A.txt"), Some(ItemOutcome::Updated));
        assert!(!dir.path().join("A.txt").exists());
        let store = ManifestStore::load(dir.path()).await.unwrap();
        assert!(store.manifest().get("A.txt").is_none());
        assert!(store.manifest().get("sub/A.txt").is_some());
    }

    #[tokio::test]
    async fn test_move_never_overwrites_untracked_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        run(&source, options(dir.path())).await;

        std::fs::write(dir.path().join("sub/A.txt"), b"MY OWN NOTES").unwrap();
        source.unlink(ROOT, "1");
        source.link("2", "1");
        let report = run(&source, options(dir.path())).await;

        assert_eq!(report.outcome_of("sub/A.txt"), Some(ItemOutcome::Conflict));
        assert_eq!(read(dir.path(), "sub/A.txt"), b"MY OWN NOTES");
        assert_eq!(read(dir.path(), "A.txt"), b"alpha");
        let store = ManifestStore::load(dir.path()).await.unwrap();
        assert_eq!(store.manifest().get("A.txt").unwrap().remote_id.as_str(), "1");
        assert!(store.manifest().get("sub/A.txt").is_none());
    }

    #[tokio::test]
    async fn test_swapped_names_follow_remote() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        source.add_file(ROOT, "4", "B.txt", b"bravo at the top");
        run(&source, options(dir.path())).await;

        source.rename("1", "B.txt");
        source.rename("4", "A.txt");
        let mut opts = options(dir.path());
        opts.jobs = 2;
        let report = run(&source, opts).await;

        assert_eq!(report.outcome_of("A.txt"), Some(ItemOutcome::Updated));
        assert_eq!(report.outcome_of("B.txt"), Some(ItemOutcome::Updated));
        assert!(!report.has_problems());
        assert_eq!(read(dir.path(), "A.txt"), b"bravo at the top");
        assert_eq!(read(dir.path(), "B.txt"), b"alpha");

        let again = run(&source, options(dir.path())).await;
        assert_eq!(again.summary().skipped, 3);
    }

    #[tokio::test]
    async fn test_skip_files_only_creates_folders() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        let mut opts = options(dir.path());
        opts.skip_files = true;

        let report = run(&source, opts).await;
        assert!(report.items.is_empty());
        assert!(dir.path().join("sub").is_dir());
        assert_eq!(source.total_opens(), 0);
    }

    #[tokio::test]
    async fn test_force_redownloads() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        run(&source, options(dir.path())).await;

        let mut opts = options(dir.path());
        opts.force = true;
        let report = run(&source, opts).await;
        assert_eq!(report.summary().updated, 2);
        assert_eq!(source.total_opens(), 4);
    }
}

// =============================================================================
// Graph shape: sharing, cycles, collisions, determinism
// =============================================================================

mod graph {
    use super::*;

    #[tokio::test]
    async fn test_shared_file_downloaded_once_at_shallowest_path() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::new();
        source.add_folder(ROOT, "10", "deep");
        source.add_folder("10", "11", "deeper");
        source.add_file("11", "99", "shared.pdf", b"shared");
        source.add_folder(ROOT, "20", "b");
        source.link("20", "99");
        source.add_folder(ROOT, "30", "a");
        source.link("30", "99");
        let source = Arc::new(source);

        let report = run(&source, options(dir.path())).await;

        // depth 2 beats depth 3; "a" beats "b"
        assert_eq!(report.paths_with(ItemOutcome::Created), vec!["a/shared.pdf"]);
        assert_eq!(source.open_calls("99"), 1);
    }

    #[tokio::test]
    async fn test_cycles_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::new();
        source.add_folder(ROOT, "10", "loop");
        source.link("10", ROOT);
        source.link("10", "10");
        source.add_file("10", "11", "x.txt", b"x");
        let source = Arc::new(source);

        let report = run(&source, options(dir.path())).await;
        assert_eq!(report.paths_with(ItemOutcome::Created), vec!["loop/x.txt"]);
        assert_eq!(source.list_calls(ROOT), 1);
        assert_eq!(source.list_calls("10"), 1);
    }

    #[tokio::test]
    async fn test_name_collisions_get_id_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::new();
        source.add_file(ROOT, "7", "Skript.pdf", b"one");
        source.add_file(ROOT, "5", "Skript.pdf", b"two");
        source.add_file(ROOT, "6", "a/b", b"three");
        let source = Arc::new(source);

        let report = run(&source, options(dir.path())).await;
        assert_eq!(
            report.paths_with(ItemOutcome::Created),
            vec!["Skript (7).pdf", "Skript.pdf", "a_b"]
        );
        assert_eq!(read(dir.path(), "Skript.pdf"), b"two");
    }

    #[tokio::test]
    async fn test_remote_file_named_like_manifest_is_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        source.add_file(ROOT, "8", MANIFEST_FILE, b"{\"not\": \"ours\"}");

        let report = run(&source, options(dir.path())).await;
        let renamed = format!("_{}", MANIFEST_FILE);
        assert_eq!(report.outcome_of(&renamed), Some(ItemOutcome::Created));
        assert_eq!(read(dir.path(), &renamed), b"{\"not\": \"ours\"}");

        let store = ManifestStore::load(dir.path()).await.unwrap();
        assert_eq!(store.manifest().get(&renamed).unwrap().remote_id.as_str(), "8");
        let again = run(&source, options(dir.path())).await;
        assert_eq!(again.summary().skipped, 3);
    }

    #[tokio::test]
    async fn test_output_independent_of_timing_and_jobs() {
        let build = || {
            let source = FakeSource::new();
            for (i, name) in ["x", "y", "z"].iter().enumerate() {
                let id = format!("{}", 100 + i);
                source.add_folder(ROOT, &id, name);
                source.add_file(&id, &format!("{}1", id), "notes.txt", name.as_bytes());
            }
            source.add_file("102", "shared", "common.txt", b"c");
            source.link("101", "shared");
            source.link("100", "shared");
            source
        };

        let sequential = Arc::new(build());
        let seq_dir = tempfile::tempdir().unwrap();
        let seq = run(&sequential, options(seq_dir.path())).await;

        let concurrent = build();
        // Make the folder that wins the tie answer last
        concurrent.delay_listing("100", Duration::from_millis(50));
        concurrent.delay_listing("101", Duration::from_millis(10));
        let concurrent = Arc::new(concurrent);
        let conc_dir = tempfile::tempdir().unwrap();
        let mut opts = options(conc_dir.path());
        opts.jobs = 4;
        let conc = run(&concurrent, opts).await;

        assert_eq!(
            seq.paths_with(ItemOutcome::Created),
            conc.paths_with(ItemOutcome::Created)
        );
        assert!(seq.paths_with(ItemOutcome::Created).contains(&"x/common.txt"));
        assert_eq!(files_in(seq_dir.path()), files_in(conc_dir.path()));
    }

    #[tokio::test]
    async fn test_crawl_stream_reports_each_node_once() {
        let source = basic_tree();
        source.link("2", "1");
        let crawler = Crawler::new(
            Arc::clone(&source),
            CrawlOptions {
                jobs: 2,
                retry: RetryConfig::fast(2),
            },
            CancellationToken::new(),
        );
        let root = source.resolve_root("").await.unwrap();
        let events: Vec<CrawlEvent> = crawler.crawl(root).collect().await;

        let paths: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                CrawlEvent::Discovered(d) => Some(d.path.clone()),
                CrawlEvent::FolderFailed { .. } => None,
            })
            .collect();
        assert_eq!(paths, vec!["A.txt", "sub", "sub/B.txt"]);
    }
}

// =============================================================================
// Failures: partial crawls, flaky downloads, cancellation
// =============================================================================

mod failures {
    use super::*;

    #[tokio::test]
    async fn test_failed_folder_does_not_stop_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        source.add_folder(ROOT, "4", "locked");
        source.add_file("4", "5", "secret.txt", b"s");
        source.break_folder("4");

        let report = run(&source, options(dir.path())).await;
        assert_eq!(report.summary().created, 2);
        assert_eq!(report.failed_folders.len(), 1);
        assert_eq!(report.failed_folders[0].path, "locked");
        assert!(report.has_problems());
    }

    #[tokio::test]
    async fn test_entries_under_failed_folder_are_not_orphaned() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        run(&source, options(dir.path())).await;

        source.break_folder("2");
        let report = run(&source, options(dir.path())).await;
        assert!(report.paths_with(ItemOutcome::Orphaned).is_empty());
        assert!(dir.path().join("sub/B.txt").exists());

        source.repair_folder("2");
        let report = run(&source, options(dir.path())).await;
        assert_eq!(report.outcome_of("sub/B.txt"), Some(ItemOutcome::Skipped));
    }

    #[tokio::test]
    async fn test_transient_listing_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        source.fail_listing("2", 2);

        let report = run(&source, options(dir.path())).await;
        assert!(report.failed_folders.is_empty());
        assert_eq!(report.outcome_of("sub/B.txt"), Some(ItemOutcome::Created));
        assert_eq!(source.list_calls("2"), 3);
    }

    #[tokio::test]
    async fn test_transient_download_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        source.fail_open("1", 2);

        let report = run(&source, options(dir.path())).await;
        assert_eq!(report.outcome_of("A.txt"), Some(ItemOutcome::Created));
        assert_eq!(source.open_calls("1"), 3);
    }

    #[tokio::test]
    async fn test_short_body_never_lands_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        source.truncate("1");

        let report = run(&source, options(dir.path())).await;
        assert_eq!(report.outcome_of("A.txt"), Some(ItemOutcome::Failed));
        assert_eq!(report.outcome_of("sub/B.txt"), Some(ItemOutcome::Created));
        assert_eq!(source.open_calls("1"), 3);

        assert_eq!(
            files_in(dir.path()),
            vec![MANIFEST_FILE.to_string(), "sub/B.txt".to_string()]
        );
        let store = ManifestStore::load(dir.path()).await.unwrap();
        assert!(store.manifest().get("A.txt").is_none());
    }

    #[tokio::test]
    async fn test_cancel_discards_partial_download() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        source.stall("1");
        let cancel = CancellationToken::new();

        let runner = SyncRunner::new(Arc::clone(&source), options(dir.path()), cancel.clone());
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        };
        let (report, ()) = tokio::join!(runner.run(), trigger);
        let report = report.unwrap();

        assert!(report.cancelled);
        assert!(report.has_problems());
        assert_eq!(report.outcome_of("A.txt"), Some(ItemOutcome::Failed));
        assert!(files_in(dir.path()).iter().all(|f| !f.ends_with(".part")));
        assert!(!dir.path().join("A.txt").exists());
    }

    #[tokio::test]
    async fn test_unreachable_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        source.make_root_unreachable();

        let result = SyncRunner::new(Arc::clone(&source), options(dir.path()), CancellationToken::new())
            .run()
            .await;
        assert!(matches!(result, Err(SyncError::RootUnreachable(_))));
    }

    #[tokio::test]
    async fn test_root_listing_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        source.break_folder(ROOT);

        let result = SyncRunner::new(Arc::clone(&source), options(dir.path()), CancellationToken::new())
            .run()
            .await;
        assert!(matches!(result, Err(SyncError::RootUnreachable(_))));
    }

    #[tokio::test]
    async fn test_rejected_login_below_root_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        source.add_folder(ROOT, "4", "z-later");
        source.add_folder("4", "5", "deeper");
        source.add_file("5", "6", "later.txt", b"l");
        source.reject_credentials("2");

        let result = SyncRunner::new(Arc::clone(&source), options(dir.path()), CancellationToken::new())
            .run()
            .await;
        assert!(matches!(result, Err(ref e) if e.is_invalid_credentials()));
        assert_eq!(source.list_calls("2"), 1, "a rejected login is not retried");
        assert_eq!(source.list_calls("5"), 0, "the crawl stops at the rejection");
        assert_eq!(source.total_opens(), 0);
    }

    #[tokio::test]
    async fn test_rejected_login_during_download_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        source.add_file(ROOT, "4", "C.txt", b"charlie");
        source.reject_credentials("4");

        let result = SyncRunner::new(Arc::clone(&source), options(dir.path()), CancellationToken::new())
            .run()
            .await;
        assert!(matches!(result, Err(ref e) if e.is_invalid_credentials()));
        assert_eq!(source.open_calls("4"), 1);
        // A.txt sorts first and was downloaded before the rejection
        assert!(files_in(dir.path()).iter().all(|f| !f.ends_with(".part")));
        let store = ManifestStore::load(dir.path()).await.unwrap();
        assert!(store.manifest().get("A.txt").is_some());
        assert!(store.manifest().get("sub/B.txt").is_none());
    }

    #[tokio::test]
    async fn test_corrupt_manifest_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), b"garbage").unwrap();
        let source = basic_tree();

        let result = SyncRunner::new(Arc::clone(&source), options(dir.path()), CancellationToken::new())
            .run()
            .await;
        assert!(matches!(result, Err(SyncError::Manifest(_))));
        assert_eq!(source.total_opens(), 0);
    }

    #[tokio::test]
    async fn test_invalid_glob_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = basic_tree();
        let mut opts = options(dir.path());
        opts.include = vec!["[".to_string()];

        let result = SyncRunner::new(Arc::clone(&source), opts, CancellationToken::new())
            .run()
            .await;
        assert!(matches!(result, Err(SyncError::InvalidOptions(_))));
    }
}
