use super::{
    context::{ExecutionContext, Release},
    errors::JobError,
    handle::ExecHandle,
};
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};
use futures::{future::BoxFuture, FutureExt};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Display name used when a job is submitted without one.
pub const ANONYMOUS_JOB: &str = "<anonymous task>";

pub(crate) type AsyncBody =
    Box<dyn FnOnce(ExecutionContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + 'static>;
pub(crate) type BlockingBody =
    Box<dyn FnOnce(ExecutionContext) -> anyhow::Result<()> + Send + 'static>;

/// What a job runs. Caller parameters are already captured inside.
pub(crate) enum JobBody {
    Async(AsyncBody),
    Blocking(BlockingBody),
}

/// One unit of work, from submission until a worker has dispatched it.
pub(crate) struct Job {
    name: Arc<str>,
    body: JobBody,
    ctx: ExecutionContext,
    release: Release,
}

/// A job that has been handed to its execution unit.
pub(crate) struct Dispatched {
    pub(crate) name: Arc<str>,
    pub(crate) ctx: ExecutionContext,
    pub(crate) release: Release,
    pub(crate) handle: ExecHandle,
}

impl Job {
    pub(crate) fn new(
        name: &str,
        body: JobBody,
        parent: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Self {
        let name: Arc<str> = if name.is_empty() {
            Arc::from(ANONYMOUS_JOB)
        } else {
            Arc::from(name)
        };
        let (ctx, release) = ExecutionContext::new(parent, timeout, name.clone());
        Self {
            name,
            body,
            ctx,
            release,
        }
    }

    #[inline]
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Spawns the body as a detached execution unit and returns the handle the
    /// worker races against the deadline. The unit is never aborted.
    pub(crate) fn dispatch(self) -> Dispatched {
        let Job {
            name,
            body,
            ctx,
            release,
        } = self;
        let (tx, handle) = ExecHandle::channel(name.clone());
        let exec_ctx = ctx.clone();
        let unit_name = name.clone();

        match body {
            JobBody::Async(f) => {
                tokio::spawn(async move {
                    let res = AssertUnwindSafe(async move { f(exec_ctx).await })
                        .catch_unwind()
                        .await;
                    let _ = tx.send(outcome(&unit_name, res));
                });
            }
            JobBody::Blocking(f) => {
                tokio::task::spawn_blocking(move || {
                    let res = std::panic::catch_unwind(AssertUnwindSafe(move || f(exec_ctx)));
                    let _ = tx.send(outcome(&unit_name, res));
                });
            }
        }

        Dispatched {
            name,
            ctx,
            release,
            handle,
        }
    }
}

fn outcome(
    name: &str,
    res: Result<anyhow::Result<()>, Box<dyn Any + Send>>,
) -> Result<(), JobError> {
    match res {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(JobError::Failed {
            name: name.to_string(),
            source,
        }),
        Err(panic_info) => Err(JobError::Panic {
            name: name.to_string(),
            message: panic_message(panic_info.as_ref()),
        }),
    }
}

fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic in job body".to_string()
    }
}
