use super::{
    context::{DoneCause, ExecutionContext},
    errors::{ConfigError, JobError, SpawnError},
    job::{AsyncBody, BlockingBody, Dispatched, Job, JobBody},
    model::PoolState,
    queue::JobQueue,
    stream::{self, ErrorSink, ErrorStream},
};
use std::{
    future::Future,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use futures::FutureExt;
use tokio::time::Duration;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};


/// Конфигурация пула задач
#[derive(Debug, Clone)]
pub struct Config {
    pub num_workers: usize,
    /// Jobs that may wait for a worker. `0` hands each job straight to a worker.
    pub queue_capacity: usize,
    pub job_timeout: Duration,
    /// Failures buffered before workers block on reporting. `0` buffers none:
    /// a worker waits until a reader takes its failure.
    pub error_buffer: usize,
    pub enable_timeout: bool,
    /// Root scope of every job's execution context.
    pub parent: CancellationToken,
}

impl Default for Config {
    fn default() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_workers: num_cpus,
            queue_capacity: num_cpus * 20,
            job_timeout: Duration::from_secs(30),
            error_buffer: 64,
            enable_timeout: true,
            parent: CancellationToken::new(),
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_workers: num_cpus,
            queue_capacity: num_cpus * 10,
            job_timeout: Duration::from_secs(60),
            ..Default::default()
        }
    }

    pub fn io_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_workers: num_cpus * 2,
            queue_capacity: 1024,
            job_timeout: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Defaults overridden by `JOB_POOL_WORKERS`, `JOB_POOL_QUEUE_CAPACITY`,
    /// `JOB_POOL_TIMEOUT_MS`, `JOB_POOL_ERROR_BUFFER` and
    /// `JOB_POOL_ENABLE_TIMEOUT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = env_value("JOB_POOL_WORKERS")? {
            config.num_workers = v;
        }
        if let Some(v) = env_value("JOB_POOL_QUEUE_CAPACITY")? {
            config.queue_capacity = v;
        }
        if let Some(ms) = env_value("JOB_POOL_TIMEOUT_MS")? {
            config.job_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = env_value("JOB_POOL_ERROR_BUFFER")? {
            config.error_buffer = v;
        }
        if let Some(v) = env_value::<Flag>("JOB_POOL_ENABLE_TIMEOUT")? {
            config.enable_timeout = v.0;
        }
        config.validate()?;
        Ok(config)
    }

    /// `with_config` does not call this; a zero-worker pool simply never runs
    /// anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }

    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.enable_timeout.then_some(self.job_timeout)
    }
}

fn env_value<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        Err(_) => Ok(None),
    }
}

struct Flag(bool);

impl FromStr for Flag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Flag(true)),
            "0" | "false" | "no" | "off" => Ok(Flag(false)),
            _ => Err(()),
        }
    }
}


pub type JobPool = Arc<JobPoolInner>;

/// Пул фиксированного размера с ограниченной очередью задач
///
/// Each job's body runs as its own task. With timeouts enabled a worker stops
/// waiting once the job's deadline passes and moves on; the body itself is
/// left running and only stops if it watches its [`ExecutionContext`]. Such
/// jobs are counted in [`PoolState::abandoned`] and never in `finished`.
pub struct JobPoolInner {
    queue: JobQueue,
    shutdown: CancellationToken,
    workers: TaskTracker,
    submissions: TaskTracker,
    errors_tx: Mutex<Option<ErrorSink>>,
    errors: ErrorStream,
    submitted: AtomicU64,
    finished: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    lifecycle: AtomicU8,
    config: Config,
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

impl JobPoolInner {
    pub fn new(num_workers: usize, queue_capacity: usize) -> JobPool {
        let config = Config {
            num_workers,
            queue_capacity,
            ..Default::default()
        };
        Self::with_config(config)
    }

    /// Builds a stopped pool. Jobs may be queued before [`start`](Self::start).
    pub fn with_config(config: Config) -> JobPool {
        let (errors_tx, errors) = stream::channel(config.error_buffer);

        Arc::new(JobPoolInner {
            queue: JobQueue::new(config.queue_capacity),
            shutdown: CancellationToken::new(),
            workers: TaskTracker::new(),
            submissions: TaskTracker::new(),
            errors_tx: Mutex::new(Some(errors_tx)),
            errors,
            submitted: AtomicU64::new(0),
            finished: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            lifecycle: AtomicU8::new(IDLE),
            config,
        })
    }

    /// Spawns the workers and returns. Must be called inside a tokio runtime.
    /// Calling it again, or after [`stop`](Self::stop), does nothing.
    pub fn start(self: &Arc<Self>) {
        // Keeps a racing stop from finishing before our workers are tracked.
        let _starting = self.workers.token();
        match self
            .lifecycle
            .compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {}
            Err(RUNNING) => {
                debug!("job pool already started");
                return;
            }
            Err(_) => {
                warn!("start called on a stopped job pool");
                return;
            }
        }
        let Some(errors) = self.error_sender().clone() else {
            return;
        };

        // Запускаем воркеры
        for id in 0..self.config.num_workers {
            let pool = self.clone();
            let errors = errors.clone();
            self.workers.spawn(async move {
                pool.worker_loop(id, errors).await;
            });
        }
        info!(
            workers = self.config.num_workers,
            queue_capacity = self.config.queue_capacity,
            timeout = ?self.config.timeout(),
            "job pool started"
        );
    }

    async fn worker_loop(&self, id: usize, errors: ErrorSink) {
        loop {
            // Queued jobs win over shutdown so stop drains the queue.
            tokio::select! {
                biased;
                job = self.queue.pop() => match job {
                    Some(job) => self.run_job(id, job, &errors).await,
                    None => break,
                },
                _ = self.shutdown.cancelled() => break,
            }
        }
        debug!(worker = id, "worker exited");
    }

    async fn run_job(&self, id: usize, job: Job, errors: &ErrorSink) {
        if self.queue.is_rendezvous() {
            // Handed off jobs count once taken.
            self.submitted.fetch_add(1, Ordering::Relaxed);
        }
        let Dispatched {
            name,
            ctx,
            release,
            handle,
        } = job.dispatch();
        debug!(worker = id, job = %name, "job dispatched");

        let outcome = if self.config.enable_timeout {
            tokio::select! {
                biased;
                res = handle => Some(res),
                _ = ctx.done() => None,
            }
        } else {
            Some(handle.await)
        };

        match outcome {
            Some(res) => {
                if let Err(err) = res {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    match &err {
                        JobError::Panic { message, .. } => {
                            error!(worker = id, job = %name, %message, "job panicked")
                        }
                        _ => debug!(worker = id, job = %name, error = %err, "job failed"),
                    }
                    // Blocks while the stream is full.
                    if errors.report(err).await.is_err() {
                        warn!(worker = id, job = %name, "error stream closed, failure dropped");
                    }
                } else {
                    debug!(worker = id, job = %name, "job done");
                }
                self.finished.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.abandoned.fetch_add(1, Ordering::Relaxed);
                match ctx.cause() {
                    Some(DoneCause::Cancelled) => {
                        warn!(worker = id, job = %name, "job cancelled, no longer waiting on it")
                    }
                    _ => warn!(
                        worker = id,
                        job = %name,
                        timeout = ?self.config.job_timeout,
                        "job exceeds time limit, left running detached"
                    ),
                }
            }
        }
        release.release();
    }

    /// Queues an async job. Waits while the queue is full.
    ///
    /// Returns `Err` only when the pool is stopped; failures of the job itself
    /// arrive on [`errors`](Self::errors).
    pub async fn add_job<P, F, Fut>(&self, exec: F, params: P, name: &str) -> Result<(), SpawnError>
    where
        P: Send + 'static,
        F: FnOnce(ExecutionContext, P) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let body: AsyncBody = Box::new(move |ctx: ExecutionContext| exec(ctx, params).boxed());
        self.submit(JobBody::Async(body), name).await
    }

    /// Like [`add_job`](Self::add_job) for synchronous bodies, which run on
    /// tokio's blocking threads. A blocking body past its deadline keeps its
    /// thread until it returns.
    pub async fn add_blocking_job<P, F>(&self, exec: F, params: P, name: &str) -> Result<(), SpawnError>
    where
        P: Send + 'static,
        F: FnOnce(ExecutionContext, P) -> anyhow::Result<()> + Send + 'static,
    {
        let body: BlockingBody = Box::new(move |ctx: ExecutionContext| exec(ctx, params));
        self.submit(JobBody::Blocking(body), name).await
    }

    async fn submit(&self, body: JobBody, name: &str) -> Result<(), SpawnError> {
        // Held until the job is queued so stop can wait for us.
        let _submission = self.submissions.token();
        if self.lifecycle.load(Ordering::SeqCst) == STOPPED {
            return Err(SpawnError::Stopped);
        }

        let job = Job::new(name, body, &self.config.parent, self.config.timeout());
        let slot = self.queue.reserve().await?;
        if !self.queue.is_rendezvous() {
            self.submitted.fetch_add(1, Ordering::Relaxed);
        }
        debug!(job = job.name(), "job queued");
        slot.send(job).await
    }

    /// Stops the pool and waits for every worker to exit.
    ///
    /// Already queued jobs are still run. Producers blocked on a full queue get
    /// [`SpawnError::Stopped`]. Jobs left running detached after a timeout are
    /// not waited for. A worker blocked on a full error stream keeps `stop`
    /// waiting until the stream is read.
    pub async fn stop(&self) {
        let was = self.lifecycle.swap(STOPPED, Ordering::SeqCst);
        if was == STOPPED {
            return;
        }
        self.queue.close_submissions();
        if was == IDLE {
            self.discard(self.queue.close());
        }
        self.submissions.close();
        self.submissions.wait().await;

        self.shutdown.cancel();
        self.workers.close();
        self.workers.wait().await;

        self.discard(self.queue.close());
        self.error_sender().take();
        info!(state = ?self.state(), "job pool stopped");
    }

    /// Dropping the jobs releases their contexts.
    fn discard(&self, jobs: Vec<Job>) {
        for job in &jobs {
            warn!(job = job.name(), "discarding job that was never run");
        }
    }

    fn error_sender(&self) -> MutexGuard<'_, Option<ErrorSink>> {
        self.errors_tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive-only view of the error stream.
    #[inline]
    pub fn errors(&self) -> ErrorStream {
        self.errors.clone()
    }

    #[inline]
    pub fn state(&self) -> PoolState {
        let submitted = self.submitted.load(Ordering::Relaxed);
        let finished = self.finished.load(Ordering::Relaxed);
        PoolState {
            submitted,
            finished,
            active: submitted.saturating_sub(finished),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }

    /// Jobs waiting for a worker right now.
    #[inline]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.load(Ordering::SeqCst) == RUNNING
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_size_by_cpu_count() {
        let cpus = num_cpus::get();
        assert_eq!(Config::default().num_workers, cpus);
        assert_eq!(Config::io_bound().num_workers, cpus * 2);
        assert_eq!(Config::cpu_bound().job_timeout, Duration::from_secs(60));
    }

    #[test]
    fn timeout_only_when_enabled() {
        let mut config = Config {
            job_timeout: Duration::from_millis(5),
            ..Default::default()
        };
        assert_eq!(config.timeout(), Some(Duration::from_millis(5)));
        config.enable_timeout = false;
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let config = Config {
            num_workers: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroWorkers));
    }

    // The only test in this binary that touches these variables.
    #[test]
    fn from_env_overrides_defaults() {
        std::env::set_var("JOB_POOL_WORKERS", "3");
        std::env::set_var("JOB_POOL_TIMEOUT_MS", "250");
        std::env::set_var("JOB_POOL_ENABLE_TIMEOUT", "off");
        let config = Config::from_env().unwrap();
        assert_eq!(config.num_workers, 3);
        assert_eq!(config.job_timeout, Duration::from_millis(250));
        assert!(!config.enable_timeout);

        std::env::set_var("JOB_POOL_QUEUE_CAPACITY", "lots");
        assert_eq!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid {
                key: "JOB_POOL_QUEUE_CAPACITY",
                value: "lots".into()
            }
        );

        for key in [
            "JOB_POOL_WORKERS",
            "JOB_POOL_TIMEOUT_MS",
            "JOB_POOL_ENABLE_TIMEOUT",
            "JOB_POOL_QUEUE_CAPACITY",
        ] {
            std::env::remove_var(key);
        }
    }

    async fn noop(_ctx: ExecutionContext, _params: ()) -> anyhow::Result<()> {
        Ok(())
    }

    #[tokio::test]
    async fn stop_before_start_discards_queue() {
        let pool = JobPoolInner::new(2, 4);
        pool.add_job(noop, (), "never").await.unwrap();
        assert_eq!(pool.queued(), 1);

        pool.stop().await;
        assert_eq!(pool.queued(), 0);
        assert_eq!(pool.state().submitted, 1);
        assert_eq!(pool.state().finished, 0);
        assert!(pool.errors().recv().await.is_none());
    }

    #[tokio::test]
    async fn start_after_stop_is_noop() {
        let pool = JobPoolInner::new(1, 1);
        pool.stop().await;
        pool.start();
        assert!(!pool.is_running());
    }
}
