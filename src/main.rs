use job_pool::{Config, ExecutionContext, JobPoolInner};
use tokio::time::{sleep, Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};


async fn count_up(ctx: ExecutionContext, times: u32) -> anyhow::Result<()> {
    for i in 0..times {
        if ctx.is_done() {
            anyhow::bail!("{} interrupted at {i}", ctx.name());
        }
        tracing::info!(job = ctx.name(), i, "increasing");
        sleep(Duration::from_millis(u64::from(i % 3) * 10)).await;
    }
    Ok(())
}

async fn count_down(ctx: ExecutionContext, times: u32) -> anyhow::Result<()> {
    for i in (0..times).rev() {
        if ctx.is_done() {
            anyhow::bail!("{} interrupted at {i}", ctx.name());
        }
        tracing::info!(job = ctx.name(), i, "decreasing");
        sleep(Duration::from_millis(u64::from(i % 2) * 10)).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "job_pool=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = JobPoolInner::with_config(Config::from_env()?);

    pool.add_job(count_up, 8, "count up 8 times").await?;
    pool.add_job(count_down, 10, "count down from 10").await?;
    pool.start();

    for second in 0..10 {
        let state = pool.state();
        tracing::info!(second, ?state, "current state");
        if state.is_idle() {
            tracing::info!("all jobs finished");
            break;
        }
        sleep(Duration::from_secs(1)).await;
    }

    let errors = pool.errors();
    let reader = tokio::spawn(async move {
        while let Some(err) = errors.recv().await {
            tracing::error!(error = %err, "job failed");
        }
    });

    pool.stop().await;
    reader.await?;
    tracing::info!(state = ?pool.state(), "pool stopped");
    Ok(())
}
