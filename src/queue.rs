use super::{errors::SpawnError, job::Job};
use crossbeam::deque::{Injector, Steal};
use tokio::sync::{oneshot, Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

struct Queued {
    job: Job,
    taken: Option<oneshot::Sender<()>>,
}

/// Bounded multi-producer multi-consumer FIFO of jobs.
///
/// `slots` holds one permit per free place and `ready` one permit per queued
/// job. With zero capacity there are no slots: a producer pushes and then
/// waits until a consumer has taken its job.
pub(crate) struct JobQueue {
    jobs: Injector<Queued>,
    slots: Option<Semaphore>,
    ready: Semaphore,
    closed: CancellationToken,
}

/// Reserved room for one job. Dropping it unused gives the room back.
pub(crate) struct Slot<'a> {
    queue: &'a JobQueue,
    permit: Option<SemaphorePermit<'a>>,
}

impl JobQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            jobs: Injector::new(),
            slots: (capacity > 0).then(|| Semaphore::new(capacity)),
            ready: Semaphore::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// Waits for free room. Fails once submissions are closed.
    pub(crate) async fn reserve(&self) -> Result<Slot<'_>, SpawnError> {
        if self.closed.is_cancelled() {
            return Err(SpawnError::Stopped);
        }
        let permit = match &self.slots {
            Some(slots) => Some(slots.acquire().await.map_err(|_| SpawnError::Stopped)?),
            None => None,
        };
        Ok(Slot {
            queue: self,
            permit,
        })
    }

    /// Next job in FIFO order, or `None` once the queue is closed.
    /// Cancel safe.
    pub(crate) async fn pop(&self) -> Option<Job> {
        self.ready.acquire().await.ok()?.forget();
        self.take()
    }

    #[cfg(test)]
    pub(crate) fn try_pop(&self) -> Option<Job> {
        self.ready.try_acquire().ok()?.forget();
        self.take()
    }

    fn take(&self) -> Option<Job> {
        let queued = loop {
            match self.jobs.steal() {
                Steal::Success(q) => break q,
                Steal::Empty => return None,
                Steal::Retry => std::hint::spin_loop(),
            }
        };
        if let Some(slots) = &self.slots {
            slots.add_permits(1);
        }
        if let Some(taken) = queued.taken {
            let _ = taken.send(());
        }
        Some(queued.job)
    }

    /// True when the queue has no room and every push is a hand off.
    #[inline]
    pub(crate) fn is_rendezvous(&self) -> bool {
        self.slots.is_none()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Wakes producers blocked on a full queue with an error and rejects new
    /// reservations. Queued jobs stay available to consumers.
    pub(crate) fn close_submissions(&self) {
        if let Some(slots) = &self.slots {
            slots.close();
        }
    }

    /// Closes both ends and hands back whatever was never dequeued.
    pub(crate) fn close(&self) -> Vec<Job> {
        self.close_submissions();
        self.closed.cancel();
        self.ready.close();
        self.drain()
    }

    fn drain(&self) -> Vec<Job> {
        let mut left = Vec::new();
        loop {
            match self.jobs.steal() {
                Steal::Success(q) => left.push(q.job),
                Steal::Empty => break,
                Steal::Retry => std::hint::spin_loop(),
            }
        }
        left
    }
}

impl Slot<'_> {
    /// Pushes the job. In rendezvous mode also waits until a consumer took it,
    /// and fails if the queue closes first.
    pub(crate) async fn send(mut self, job: Job) -> Result<(), SpawnError> {
        let queue = self.queue;
        if let Some(permit) = self.permit.take() {
            permit.forget();
            queue.jobs.push(Queued { job, taken: None });
            queue.ready.add_permits(1);
            return Ok(());
        }

        let (tx, mut rx) = oneshot::channel();
        queue.jobs.push(Queued {
            job,
            taken: Some(tx),
        });
        queue.ready.add_permits(1);
        tokio::select! {
            biased;
            taken = &mut rx => return taken.map_err(|_| SpawnError::Stopped),
            _ = queue.closed.cancelled() => {}
        }
        // No consumer is left once closed: drop whatever is still queued, ours
        // included, then see whether ours was taken before that.
        drop(queue.drain());
        rx.await.map_err(|_| SpawnError::Stopped)
    }
}
