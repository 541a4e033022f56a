//! Serialized content hashing worker.
//!
//! Digest requests from every handler funnel through one FIFO queue and
//! are computed one at a time on a dedicated OS thread, so hashing never
//! competes with the async runtime and large-file digests cannot pile up
//! in parallel. The digest thread is spawned lazily and replaced lazily
//! after a fault: a panic rejects only the job that caused it, queued
//! jobs are served by the replacement thread.

use crate::metrics::HASH_WORKER_FAULTS;
use bytes::Bytes;
use std::io::Read;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use stowage_core::hash::HashAlgorithm;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

const FILE_READ_BUF: usize = 64 * 1024;

/// Hash worker errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("digest worker fault")]
    WorkerFault,

    #[error("hash worker is shut down")]
    ShutDown,

    #[error("digest I/O error: {0}")]
    Io(String),
}

/// Input to a digest request.
#[derive(Debug, Clone)]
pub enum HashInput {
    /// Hash an in-memory buffer (chunk verification).
    Bytes(Bytes),
    /// Stream a file from disk (whole-file verification). The file never
    /// materializes in memory.
    File(PathBuf),
}

/// Digest computation seam, implemented on the dedicated thread.
pub trait Digester: Send + 'static {
    fn digest(&self, algorithm: HashAlgorithm, input: &HashInput) -> Result<String, HashError>;
}

/// Default digester: in-memory buffers directly, files via a buffered
/// streaming read.
pub struct StreamingDigester;

impl Digester for StreamingDigester {
    fn digest(&self, algorithm: HashAlgorithm, input: &HashInput) -> Result<String, HashError> {
        match input {
            HashInput::Bytes(data) => Ok(algorithm.digest_hex(data)),
            HashInput::File(path) => {
                let mut file =
                    std::fs::File::open(path).map_err(|e| HashError::Io(e.to_string()))?;
                let mut digester = algorithm.digester();
                let mut buf = vec![0u8; FILE_READ_BUF];
                loop {
                    let n = file.read(&mut buf).map_err(|e| HashError::Io(e.to_string()))?;
                    if n == 0 {
                        break;
                    }
                    digester.update(&buf[..n]);
                }
                Ok(digester.finalize_hex())
            }
        }
    }
}

type DigesterFactory = Arc<dyn Fn() -> Box<dyn Digester> + Send + Sync>;

struct Work {
    algorithm: HashAlgorithm,
    input: HashInput,
    reply: oneshot::Sender<Result<String, HashError>>,
}

enum Msg {
    Digest(Work),
    Shutdown,
}

/// Handle to the process-wide hash worker.
pub struct HashWorker {
    tx: mpsc::UnboundedSender<Msg>,
}

impl HashWorker {
    /// Spawn a worker with the default streaming digester.
    pub fn spawn() -> Self {
        Self::spawn_with(Arc::new(|| Box::new(StreamingDigester) as Box<dyn Digester>))
    }

    /// Spawn a worker with a custom digester factory. The factory runs
    /// once per digest thread, including replacements after a fault.
    pub fn spawn_with(factory: DigesterFactory) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(supervise(rx, factory));
        Self { tx }
    }

    /// Compute the hex digest of the input. Requests are served strictly
    /// in submission order, one at a time.
    pub async fn calculate(
        &self,
        algorithm: HashAlgorithm,
        input: HashInput,
    ) -> Result<String, HashError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Msg::Digest(Work {
                algorithm,
                input,
                reply,
            }))
            .map_err(|_| HashError::ShutDown)?;
        rx.await.map_err(|_| HashError::ShutDown)?
    }

    /// Stop the worker. Queued requests are rejected with
    /// [`HashError::ShutDown`].
    pub fn shutdown(&self) {
        let _ = self.tx.send(Msg::Shutdown);
    }
}

async fn supervise(mut rx: mpsc::UnboundedReceiver<Msg>, factory: DigesterFactory) {
    let mut thread: Option<DigestThread> = None;

    while let Some(msg) = rx.recv().await {
        let work = match msg {
            Msg::Digest(work) => work,
            Msg::Shutdown => break,
        };

        let result = dispatch(&mut thread, &factory, work.algorithm, work.input).await;
        if matches!(result, Err(HashError::WorkerFault)) {
            HASH_WORKER_FAULTS.inc();
            tracing::warn!("digest thread faulted; a replacement will spawn on the next job");
            thread = None;
        }
        let _ = work.reply.send(result);
    }

    rx.close();
    while let Ok(msg) = rx.try_recv() {
        if let Msg::Digest(work) = msg {
            let _ = work.reply.send(Err(HashError::ShutDown));
        }
    }
    tracing::debug!("hash worker stopped");
}

/// Send one job to the digest thread and await its result, respawning
/// the thread once if it is found dead before the job is accepted.
async fn dispatch(
    thread: &mut Option<DigestThread>,
    factory: &DigesterFactory,
    algorithm: HashAlgorithm,
    input: HashInput,
) -> Result<String, HashError> {
    for _ in 0..2 {
        let t = thread.get_or_insert_with(|| DigestThread::spawn(factory.clone()));
        let (done_tx, done_rx) = oneshot::channel();
        let work = Work {
            algorithm,
            input: input.clone(),
            reply: done_tx,
        };
        if t.tx.send(work).is_err() {
            // Thread exited since the last job; retry on a fresh one.
            *thread = None;
            continue;
        }
        return match done_rx.await {
            Ok(result) => result,
            Err(_) => Err(HashError::WorkerFault),
        };
    }
    Err(HashError::WorkerFault)
}

struct DigestThread {
    tx: std::sync::mpsc::Sender<Work>,
}

impl DigestThread {
    fn spawn(factory: DigesterFactory) -> Self {
        let (tx, rx) = std::sync::mpsc::channel::<Work>();
        std::thread::spawn(move || {
            let digester = factory();
            while let Ok(work) = rx.recv() {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    digester.digest(work.algorithm, &work.input)
                }));
                match outcome {
                    Ok(result) => {
                        let _ = work.reply.send(result);
                    }
                    Err(_) => {
                        // Report the fault and tear this thread down; the
                        // supervisor spawns a replacement lazily.
                        let _ = work.reply.send(Err(HashError::WorkerFault));
                        break;
                    }
                }
            }
        });
        Self { tx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use stowage_core::hash::ContentHash;

    struct RecordingDigester {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Digester for RecordingDigester {
        fn digest(&self, algorithm: HashAlgorithm, input: &HashInput) -> Result<String, HashError> {
            if let HashInput::Bytes(data) = input {
                let label = String::from_utf8_lossy(data).to_string();
                if label == "boom" {
                    panic!("intentional test fault");
                }
                self.seen.lock().unwrap().push(label);
            }
            StreamingDigester.digest(algorithm, input)
        }
    }

    fn recording_worker(seen: Arc<Mutex<Vec<String>>>) -> HashWorker {
        HashWorker::spawn_with(Arc::new(move || {
            Box::new(RecordingDigester { seen: seen.clone() }) as Box<dyn Digester>
        }))
    }

    #[tokio::test]
    async fn test_bytes_digest_matches_direct_hash() {
        let worker = HashWorker::spawn();
        let digest = worker
            .calculate(
                HashAlgorithm::Sha256,
                HashInput::Bytes(Bytes::from_static(b"hello world")),
            )
            .await
            .unwrap();
        assert_eq!(digest, ContentHash::compute(b"hello world").to_hex());
    }

    #[tokio::test]
    async fn test_file_digest_streams_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"some file contents").unwrap();

        let worker = HashWorker::spawn();
        let digest = worker
            .calculate(HashAlgorithm::Sha256, HashInput::File(path))
            .await
            .unwrap();
        assert_eq!(digest, ContentHash::compute(b"some file contents").to_hex());
    }

    #[tokio::test]
    async fn test_requests_served_in_submission_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let worker = recording_worker(seen.clone());

        let a = worker.calculate(
            HashAlgorithm::Sha256,
            HashInput::Bytes(Bytes::from_static(b"first")),
        );
        let b = worker.calculate(
            HashAlgorithm::Sha256,
            HashInput::Bytes(Bytes::from_static(b"second")),
        );
        let c = worker.calculate(
            HashAlgorithm::Sha256,
            HashInput::Bytes(Bytes::from_static(b"third")),
        );
        let (ra, rb, rc) = tokio::join!(a, b, c);
        ra.unwrap();
        rb.unwrap();
        rc.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_fault_rejects_job_and_replacement_serves_next() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let worker = recording_worker(seen.clone());

        // The follow-up is queued while the faulting job is in flight;
        // it must survive the fault and be served by the replacement.
        let boom = worker.calculate(
            HashAlgorithm::Sha256,
            HashInput::Bytes(Bytes::from_static(b"boom")),
        );
        let after = worker.calculate(
            HashAlgorithm::Sha256,
            HashInput::Bytes(Bytes::from_static(b"after")),
        );
        let (fault, survivor) = tokio::join!(boom, after);

        assert_eq!(fault.unwrap_err(), HashError::WorkerFault);
        assert_eq!(survivor.unwrap(), ContentHash::compute(b"after").to_hex());
        assert_eq!(*seen.lock().unwrap(), vec!["after"]);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_requests() {
        let worker = HashWorker::spawn();
        worker.shutdown();

        let err = worker
            .calculate(
                HashAlgorithm::Sha256,
                HashInput::Bytes(Bytes::from_static(b"late")),
            )
            .await
            .unwrap_err();
        assert_eq!(err, HashError::ShutDown);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let worker = HashWorker::spawn();
        let err = worker
            .calculate(
                HashAlgorithm::Sha256,
                HashInput::File(PathBuf::from("/nonexistent/file.bin")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HashError::Io(_)));
    }
}
