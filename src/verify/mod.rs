//! Post-copy checksum verification.
//!
//! Walks the source tree, hashes each file on both sides with SHA-256, and
//! reconciles the destination for files the source no longer has. The scan
//! is cancellable at file granularity.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Local;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

use crate::pipeline::{stamped, LogEntry, LogProducer};

const PROGRESS_EVERY: usize = 100;
const HASH_BUF_SIZE: usize = 1024 * 1024;
const SEPARATOR_WIDTH: usize = 70;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("source directory does not exist: {0}")]
    SourceMissing(PathBuf),
    #[error("failed to enumerate {path}")]
    Enumerate {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("hash worker failed")]
    Worker(#[from] tokio::task::JoinError),
}

/// Per-file tallies from one verification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyTally {
    pub matched: u64,
    pub mismatched: u64,
    pub missing_in_dest: u64,
    pub missing_in_source: u64,
    pub errors: u64,
}

impl VerifyTally {
    pub fn fully_matched(&self) -> bool {
        self.mismatched == 0
            && self.missing_in_dest == 0
            && self.missing_in_source == 0
            && self.errors == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Completed(VerifyTally),
    Cancelled,
}

/// Verify `dest` against `source`. Findings stream into the copy-result
/// queue; scan progress into the progress queue.
pub async fn verify(
    source: &Path,
    dest: &Path,
    cancel: CancellationToken,
    producer: &LogProducer,
) -> Result<VerifyOutcome, VerifyError> {
    if !source.is_dir() {
        return Err(VerifyError::SourceMissing(source.to_path_buf()));
    }

    producer.progress(LogEntry::new(stamped(&format!(
        "checksum verification: {} <-> {}",
        source.display(),
        dest.display()
    ))));
    producer.progress(LogEntry::new("─".repeat(SEPARATOR_WIDTH)));
    let started = Instant::now();

    let snapshot = {
        let root = source.to_path_buf();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || enumerate(&root, &cancel)).await??
    };
    let Some(source_files) = snapshot else {
        return Ok(cancelled(producer));
    };

    let total = source_files.len();
    producer.progress(LogEntry::new(stamped(&format!("source: {total} files"))));

    let mut tally = VerifyTally::default();
    for (index, rel) in source_files.iter().enumerate() {
        if cancel.is_cancelled() {
            return Ok(cancelled(producer));
        }
        let processed = index + 1;
        if processed % PROGRESS_EVERY == 0 || processed == total {
            producer.progress(LogEntry::new(stamped(&format!(
                "verifying... {processed}/{total} ({:.1}%)",
                processed as f64 * 100.0 / total as f64
            ))));
        }

        let src_path = source.join(rel);
        let dst_path = dest.join(rel);
        if !dst_path.is_file() {
            tally.missing_in_dest += 1;
            producer.copy_result(LogEntry::new(format!(
                "[missing in dest] {}",
                rel.display()
            )));
            continue;
        }

        let src_hash = match hash_file(src_path).await? {
            Ok(hash) => hash,
            Err(e) => {
                record_error(&mut tally, producer, rel, &e);
                continue;
            }
        };
        if cancel.is_cancelled() {
            return Ok(cancelled(producer));
        }
        let dst_hash = match hash_file(dst_path).await? {
            Ok(hash) => hash,
            Err(e) => {
                record_error(&mut tally, producer, rel, &e);
                continue;
            }
        };

        if src_hash == dst_hash {
            tally.matched += 1;
        } else {
            tally.mismatched += 1;
            producer.copy_result(LogEntry::new(format!("[mismatch] {}", rel.display())));
        }
    }

    // Second pass: files the destination has that the source does not.
    if dest.is_dir() {
        producer.progress(LogEntry::new(stamped("checking for extra files in dest...")));
        let source_set: HashSet<String> = source_files.iter().map(|p| fold_case(p)).collect();
        let snapshot = {
            let root = dest.to_path_buf();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || enumerate(&root, &cancel)).await??
        };
        let Some(dest_files) = snapshot else {
            return Ok(cancelled(producer));
        };
        for rel in &dest_files {
            if !source_set.contains(&fold_case(rel)) {
                tally.missing_in_source += 1;
                producer.copy_result(LogEntry::new(format!(
                    "[missing in source] {}",
                    rel.display()
                )));
            }
        }
    }

    let secs = started.elapsed().as_secs();
    producer.progress(LogEntry::new(format!(
        "── {} verification finished (matched: {}, mismatched: {}, missing in dest: {}, missing in source: {}, errors: {}, elapsed: {:02}:{:02}:{:02}) ──",
        Local::now().format("%Y/%m/%d %H:%M:%S"),
        tally.matched,
        tally.mismatched,
        tally.missing_in_dest,
        tally.missing_in_source,
        tally.errors,
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60,
    )));
    if tally.fully_matched() {
        producer.copy_result(LogEntry::new("all files matched"));
    }
    debug!(?tally, "verification finished");

    Ok(VerifyOutcome::Completed(tally))
}

fn cancelled(producer: &LogProducer) -> VerifyOutcome {
    producer.progress(LogEntry::new(stamped("verification cancelled")));
    VerifyOutcome::Cancelled
}

fn record_error(
    tally: &mut VerifyTally,
    producer: &LogProducer,
    rel: &Path,
    e: &std::io::Error,
) {
    tally.errors += 1;
    producer.copy_result(LogEntry::error(format!("[error] {}: {e}", rel.display())));
}

/// Collect relative file paths under `root`; `Ok(None)` means the walk
/// was cancelled.
fn enumerate(root: &Path, cancel: &CancellationToken) -> Result<Option<Vec<PathBuf>>, VerifyError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let entry = entry.map_err(|source| VerifyError::Enumerate {
            path: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("walked entries live under their root");
        files.push(rel.to_path_buf());
    }
    Ok(Some(files))
}

/// Hashing is blocking I/O, so it runs off the async runtime. The inner
/// result is the per-file I/O outcome, which the caller tallies rather
/// than aborts on.
async fn hash_file(path: PathBuf) -> Result<std::io::Result<[u8; 32]>, VerifyError> {
    let hash = tokio::task::spawn_blocking(move || -> std::io::Result<[u8; 32]> {
        use std::io::Read;
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_BUF_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize().into())
    })
    .await?;
    Ok(hash)
}

/// Destination comparisons ignore case to match filesystems that do.
fn fold_case(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{LogPipeline, MemorySink, PipelineConfig};

    fn pipeline() -> LogPipeline<MemorySink> {
        LogPipeline::new(MemorySink::default(), PipelineConfig::default())
    }

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create dirs");
        }
        std::fs::write(path, contents).expect("write file");
    }

    #[tokio::test]
    async fn reconciles_three_way_difference() {
        let src = tempfile::tempdir().expect("src dir");
        let dst = tempfile::tempdir().expect("dst dir");
        write(src.path(), "a.txt", "same");
        write(dst.path(), "a.txt", "same");
        write(src.path(), "b.txt", "source only");
        write(dst.path(), "c.txt", "dest only");

        let mut pipeline = pipeline();
        let producer = pipeline.producer();
        let outcome = verify(src.path(), dst.path(), CancellationToken::new(), &producer)
            .await
            .expect("verify");

        let VerifyOutcome::Completed(tally) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(tally.matched, 1);
        assert_eq!(tally.missing_in_dest, 1);
        assert_eq!(tally.missing_in_source, 1);
        assert_eq!(tally.mismatched, 0);
        assert_eq!(tally.errors, 0);

        pipeline.flush();
        let sink = pipeline.into_sink();
        assert!(sink
            .copy_result
            .iter()
            .any(|l| l.contains("[missing in dest] b.txt")));
        assert!(sink
            .copy_result
            .iter()
            .any(|l| l.contains("[missing in source] c.txt")));
    }

    #[tokio::test]
    async fn detects_content_mismatch_in_subdirectory() {
        let src = tempfile::tempdir().expect("src dir");
        let dst = tempfile::tempdir().expect("dst dir");
        write(src.path(), "nested/deep/file.bin", "version one");
        write(dst.path(), "nested/deep/file.bin", "version two");

        let mut pipeline = pipeline();
        let producer = pipeline.producer();
        let outcome = verify(src.path(), dst.path(), CancellationToken::new(), &producer)
            .await
            .expect("verify");

        let VerifyOutcome::Completed(tally) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(tally.mismatched, 1);

        pipeline.flush();
        let sink = pipeline.into_sink();
        assert!(sink.copy_result.iter().any(|l| l.contains("[mismatch]")));
    }

    #[tokio::test]
    async fn fully_matched_trees_emit_affirmation() {
        let src = tempfile::tempdir().expect("src dir");
        let dst = tempfile::tempdir().expect("dst dir");
        write(src.path(), "one.txt", "alpha");
        write(dst.path(), "one.txt", "alpha");

        let mut pipeline = pipeline();
        let producer = pipeline.producer();
        let outcome = verify(src.path(), dst.path(), CancellationToken::new(), &producer)
            .await
            .expect("verify");
        assert!(matches!(
            outcome,
            VerifyOutcome::Completed(t) if t.fully_matched()
        ));

        pipeline.flush();
        let sink = pipeline.into_sink();
        assert_eq!(sink.copy_result, vec!["all files matched"]);
    }

    #[tokio::test]
    async fn case_insensitive_dest_comparison() {
        let src = tempfile::tempdir().expect("src dir");
        let dst = tempfile::tempdir().expect("dst dir");
        write(src.path(), "Photo.JPG", "pixels");
        write(dst.path(), "photo.jpg", "pixels");

        let mut pipeline = pipeline();
        let producer = pipeline.producer();
        let outcome = verify(src.path(), dst.path(), CancellationToken::new(), &producer)
            .await
            .expect("verify");

        let VerifyOutcome::Completed(tally) = outcome else {
            panic!("expected completion");
        };
        // The file pair hashes as missing-in-dest on a case-sensitive
        // filesystem, but the second pass must not also flag it extra.
        assert_eq!(tally.missing_in_source, 0);
    }

    #[tokio::test]
    async fn pre_cancelled_token_aborts_before_hashing() {
        let src = tempfile::tempdir().expect("src dir");
        let dst = tempfile::tempdir().expect("dst dir");
        write(src.path(), "a.txt", "data");

        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut pipeline = pipeline();
        let producer = pipeline.producer();
        let outcome = verify(src.path(), dst.path(), cancel, &producer)
            .await
            .expect("verify");
        assert_eq!(outcome, VerifyOutcome::Cancelled);

        pipeline.flush();
        let sink = pipeline.into_sink();
        assert!(sink
            .progress
            .iter()
            .any(|l| l.contains("verification cancelled")));
    }

    #[tokio::test]
    async fn missing_source_root_is_an_error() {
        let dst = tempfile::tempdir().expect("dst dir");
        let mut pipeline = pipeline();
        let producer = pipeline.producer();
        let result = verify(
            Path::new("/no/such/robowrap/source"),
            dst.path(),
            CancellationToken::new(),
            &producer,
        )
        .await;
        assert!(matches!(result, Err(VerifyError::SourceMissing(_))));
    }
}
