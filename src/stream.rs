use super::errors::JobError;
use std::sync::Arc;
use futures::Stream;
use tokio::sync::{mpsc, oneshot, Mutex};

struct Reported {
    err: JobError,
    taken: Option<oneshot::Sender<()>>,
}

impl Reported {
    fn accept(self) -> JobError {
        if let Some(taken) = self.taken {
            let _ = taken.send(());
        }
        self.err
    }
}

/// Builds the error stream. With `buffer == 0` nothing is buffered: a report
/// returns only once a reader has taken the failure.
pub(crate) fn channel(buffer: usize) -> (ErrorSink, ErrorStream) {
    // tokio mpsc needs room for one item; the hand off is completed by `taken`.
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let sink = ErrorSink {
        tx,
        handoff: buffer == 0,
    };
    let stream = ErrorStream {
        rx: Arc::new(Mutex::new(rx)),
    };
    (sink, stream)
}

/// Worker side of the error stream.
#[derive(Clone)]
pub(crate) struct ErrorSink {
    tx: mpsc::Sender<Reported>,
    handoff: bool,
}

impl ErrorSink {
    /// Waits while the buffer is full, or with no buffer until a reader takes
    /// the failure. Hands the failure back if the stream is closed.
    pub(crate) async fn report(&self, err: JobError) -> Result<(), JobError> {
        if !self.handoff {
            return self
                .tx
                .send(Reported { err, taken: None })
                .await
                .map_err(|e| e.0.err);
        }
        let (taken, waiter) = oneshot::channel();
        self.tx
            .send(Reported {
                err,
                taken: Some(taken),
            })
            .await
            .map_err(|e| e.0.err)?;
        // Err only if the receiver went away with the failure unread.
        let _ = waiter.await;
        Ok(())
    }
}

/// Receive-only view of the pool's bounded error stream.
///
/// All clones read from the same channel, so every failure is delivered to
/// exactly one reader. The stream ends after the pool is stopped and every
/// buffered failure has been read.
///
/// Workers block while the buffer is full, so the stream must be drained
/// continuously.
#[derive(Clone)]
pub struct ErrorStream {
    rx: Arc<Mutex<mpsc::Receiver<Reported>>>,
}

impl ErrorStream {
    /// Next failure, or `None` once the stream is closed and empty.
    pub async fn recv(&self) -> Option<JobError> {
        self.rx.lock().await.recv().await.map(Reported::accept)
    }

    /// Next buffered failure without waiting. Also `None` while another clone
    /// is inside `recv`.
    pub fn try_recv(&self) -> Option<JobError> {
        self.rx.try_lock().ok()?.try_recv().ok().map(Reported::accept)
    }

    /// Takes every failure buffered right now.
    pub fn drain(&self) -> Vec<JobError> {
        let Ok(mut rx) = self.rx.try_lock() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while let Ok(reported) = rx.try_recv() {
            out.push(reported.accept());
        }
        out
    }

    pub fn into_stream(self) -> impl Stream<Item = JobError> + Send + 'static {
        futures::stream::unfold(self, |errors| async move {
            let next = errors.recv().await;
            next.map(|err| (err, errors))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::time::Duration;

    fn failed(name: &str) -> JobError {
        JobError::Failed {
            name: name.to_string(),
            source: anyhow::anyhow!("failed"),
        }
    }

    #[tokio::test]
    async fn clones_share_one_channel() {
        let (sink, a) = channel(4);
        let b = a.clone();
        sink.report(failed("one")).await.unwrap();
        sink.report(failed("two")).await.unwrap();

        assert_eq!(a.recv().await.unwrap().name(), "one");
        assert_eq!(b.try_recv().unwrap().name(), "two");
        assert!(a.try_recv().is_none());
    }

    #[tokio::test]
    async fn stream_ends_when_senders_drop() {
        let (sink, errors) = channel(4);
        sink.report(failed("x")).await.unwrap();
        sink.report(failed("y")).await.unwrap();
        drop(sink);

        let names: Vec<String> = errors
            .into_stream()
            .map(|e| e.name().to_string())
            .collect()
            .await;
        assert_eq!(names, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn drain_takes_buffered_only() {
        let (sink, errors) = channel(4);
        assert!(errors.drain().is_empty());
        sink.report(failed("x")).await.unwrap();
        assert_eq!(errors.drain().len(), 1);
    }

    #[tokio::test]
    async fn zero_buffer_report_waits_for_reader() {
        let (sink, errors) = channel(0);
        let reporter = tokio::spawn(async move { sink.report(failed("x")).await.is_ok() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reporter.is_finished(), "no failure may sit unread in the stream");

        assert_eq!(errors.recv().await.unwrap().name(), "x");
        assert!(reporter.await.unwrap());
    }

    #[tokio::test]
    async fn report_after_close_hands_failure_back() {
        let (sink, errors) = channel(1);
        drop(errors);
        let err = sink.report(failed("lost")).await.unwrap_err();
        assert_eq!(err.name(), "lost");
    }
}
