use super::errors::JobError;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::oneshot;

/// Single-slot completion channel of one dispatched job.
///
/// Resolves to the job's outcome. If the execution unit goes away without
/// reporting, resolves to [`JobError::Lost`].
pub(crate) struct ExecHandle {
    name: Arc<str>,
    receiver: oneshot::Receiver<Result<(), JobError>>,
}

impl ExecHandle {
    pub(crate) fn channel(name: Arc<str>) -> (oneshot::Sender<Result<(), JobError>>, Self) {
        let (tx, receiver) = oneshot::channel();
        (tx, Self { name, receiver })
    }
}

impl Future for ExecHandle {
    type Output = Result<(), JobError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(res) => Poll::Ready(res.unwrap_or_else(|_| {
                Err(JobError::Lost {
                    name: this.name.to_string(),
                })
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}
