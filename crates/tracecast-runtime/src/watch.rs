use crate::Result;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Fallback poll period; OS notification is the primary signal.
const POLL_FALLBACK: Duration = Duration::from_secs(2);

/// One read of the transcript tail.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchBatch {
    /// Complete new lines read from the stored offset
    Lines { lines: Vec<String>, new_offset: u64 },
    /// The file shrank below the stored offset (truncation or rotation);
    /// the session must reset before the replay batches arrive.
    Truncated,
}

/// Tail a transcript file, emitting batches of complete lines.
///
/// A notify watcher on the parent directory provides the wake-ups; rapid
/// notifications inside the coalescing window collapse into a single read.
/// The task exits when `shutdown` flips to true or the batch receiver is
/// dropped.
pub fn spawn_tail(
    path: PathBuf,
    start_offset: u64,
    coalesce_window: Duration,
    shutdown: watch::Receiver<bool>,
) -> Result<mpsc::Receiver<WatchBatch>> {
    let (batch_tx, batch_rx) = mpsc::channel(8);
    let (notify_tx, notify_rx) = mpsc::channel::<()>(16);

    let watcher = {
        use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

        let tx = notify_tx.clone();
        let mut watcher: RecommendedWatcher = Watcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                if let Ok(event) = res
                    && matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                {
                    let _ = tx.try_send(());
                }
            },
            notify::Config::default(),
        )?;

        // Watch the parent directory: the file may not exist yet when the
        // destination attaches ahead of the CLI's first write.
        let watch_dir = path.parent().unwrap_or(&path);
        watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
        watcher
    };

    tokio::spawn(run_tail(
        path,
        start_offset,
        coalesce_window,
        watcher,
        notify_rx,
        batch_tx,
        shutdown,
    ));

    Ok(batch_rx)
}

async fn run_tail(
    path: PathBuf,
    start_offset: u64,
    coalesce_window: Duration,
    _watcher: notify::RecommendedWatcher,
    mut notify_rx: mpsc::Receiver<()>,
    batch_tx: mpsc::Sender<WatchBatch>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut offset = start_offset;

    // One-shot catch-up before the first notification.
    if !emit_new_lines(&path, &mut offset, &batch_tx).await {
        return;
    }

    loop {
        tokio::select! {
            notified = notify_rx.recv() => {
                if notified.is_none() {
                    break;
                }
                // Batch rapid writes into one read.
                tokio::time::sleep(coalesce_window).await;
                while notify_rx.try_recv().is_ok() {}

                if !emit_new_lines(&path, &mut offset, &batch_tx).await {
                    break;
                }
            }
            _ = tokio::time::sleep(POLL_FALLBACK) => {
                // Notification can be missed on some platforms; poll size.
                let current_len = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(offset);
                if current_len != offset
                    && !emit_new_lines(&path, &mut offset, &batch_tx).await {
                    break;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!(path = %path.display(), "tail shutting down");
                    break;
                }
            }
        }
    }
}

/// Read and forward everything new at `offset`. Returns false when the
/// downstream receiver is gone.
async fn emit_new_lines(path: &Path, offset: &mut u64, batch_tx: &mpsc::Sender<WatchBatch>) -> bool {
    loop {
        match read_since(path.to_path_buf(), *offset).await {
            Ok(ReadOutcome::Unchanged) => return true,
            Ok(ReadOutcome::Truncated) => {
                warn!(path = %path.display(), "transcript truncated; resetting offset");
                *offset = 0;
                if batch_tx.send(WatchBatch::Truncated).await.is_err() {
                    return false;
                }
                // Loop again to replay from the start.
            }
            Ok(ReadOutcome::Data { lines, new_offset }) => {
                *offset = new_offset;
                return batch_tx
                    .send(WatchBatch::Lines { lines, new_offset })
                    .await
                    .is_ok();
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "transcript read failed");
                return true;
            }
        }
    }
}

enum ReadOutcome {
    Unchanged,
    Truncated,
    Data { lines: Vec<String>, new_offset: u64 },
}

/// Read complete lines appended after `offset`.
///
/// A trailing chunk without a newline is left unconsumed; the offset never
/// advances past it. File I/O runs on the blocking pool.
async fn read_since(path: PathBuf, offset: u64) -> std::io::Result<ReadOutcome> {
    tokio::task::spawn_blocking(move || -> std::io::Result<ReadOutcome> {
        let mut file = match std::fs::File::open(&path) {
            Ok(file) => file,
            // Vanished files are not fatal; the session resumes if the
            // file reappears.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ReadOutcome::Unchanged);
            }
            Err(err) => return Err(err),
        };

        let file_len = file.metadata()?.len();
        if file_len < offset {
            return Ok(ReadOutcome::Truncated);
        }
        if file_len == offset {
            return Ok(ReadOutcome::Unchanged);
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity((file_len - offset) as usize);
        file.read_to_end(&mut buf)?;

        // Only consume up to the last complete line.
        let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
            return Ok(ReadOutcome::Unchanged);
        };
        let consumed = &buf[..=last_newline];

        let lines: Vec<String> = String::from_utf8_lossy(consumed)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.to_string())
            .collect();

        Ok(ReadOutcome::Data {
            lines,
            new_offset: offset + consumed.len() as u64,
        })
    })
    .await
    .map_err(|e| std::io::Error::other(e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    async fn read_at(path: &Path, offset: u64) -> ReadOutcome {
        read_since(path.to_path_buf(), offset).await.unwrap()
    }

    #[tokio::test]
    async fn reads_only_complete_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.jsonl");
        std::fs::write(&path, "{\"a\":1}\n{\"b\":2}\n{\"partial\"").unwrap();

        match read_at(&path, 0).await {
            ReadOutcome::Data { lines, new_offset } => {
                assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
                assert_eq!(new_offset, 16);
            }
            _ => panic!("expected data"),
        }

        // The partial tail alone is not consumed.
        assert!(matches!(read_at(&path, 16).await, ReadOutcome::Unchanged));

        // Completing the line makes it readable.
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, ":3}}").unwrap();
        match read_at(&path, 16).await {
            ReadOutcome::Data { lines, .. } => assert_eq!(lines, vec!["{\"partial\":3}"]),
            _ => panic!("expected data"),
        }
    }

    #[tokio::test]
    async fn empty_file_is_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.jsonl");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(read_at(&path, 0).await, ReadOutcome::Unchanged));
    }

    #[tokio::test]
    async fn shrunk_file_reports_truncation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.jsonl");
        std::fs::write(&path, "{\"a\":1}\n").unwrap();
        assert!(matches!(read_at(&path, 100).await, ReadOutcome::Truncated));
    }

    #[tokio::test]
    async fn missing_file_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("never.jsonl");
        assert!(matches!(read_at(&path, 0).await, ReadOutcome::Unchanged));
    }

    #[tokio::test]
    async fn tail_emits_appends_and_truncation_reset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.jsonl");
        std::fs::write(&path, "{\"n\":1}\n").unwrap();

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut rx = spawn_tail(path.clone(), 0, Duration::from_millis(20), shutdown_rx).unwrap();

        // Initial catch-up.
        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel open");
        assert_eq!(
            batch,
            WatchBatch::Lines {
                lines: vec!["{\"n\":1}".to_string()],
                new_offset: 8
            }
        );

        // Append: picked up by notification or the poll fallback.
        {
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "{{\"n\":2}}").unwrap();
        }
        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel open");
        match batch {
            WatchBatch::Lines { lines, new_offset } => {
                assert_eq!(lines, vec!["{\"n\":2}".to_string()]);
                assert_eq!(new_offset, 16);
            }
            other => panic!("unexpected {:?}", other),
        }

        // Truncate: a reset, then the replay from offset zero.
        std::fs::write(&path, "{\"n\":9}\n").unwrap();
        let mut saw_truncated = false;
        loop {
            let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out")
                .expect("channel open");
            match batch {
                WatchBatch::Truncated => saw_truncated = true,
                WatchBatch::Lines { lines, new_offset } => {
                    assert!(saw_truncated, "replay must follow the truncation signal");
                    assert_eq!(lines, vec!["{\"n\":9}".to_string()]);
                    assert_eq!(new_offset, 8);
                    break;
                }
            }
        }
    }
}
