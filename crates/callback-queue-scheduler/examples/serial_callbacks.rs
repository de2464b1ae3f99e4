use callback_queue_scheduler::{CallbackScheduler, SchedulerConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let scheduler = std::sync::Arc::new(CallbackScheduler::new(SchedulerConfig::default())?);

    // Submissions under the same key run one after another; different keys
    // run in parallel.
    let mut handles = Vec::new();
    for doc in ["doc-a", "doc-b"] {
        for step in 0..3u32 {
            let scheduler = scheduler.clone();
            handles.push(tokio::spawn(async move {
                let version = scheduler
                    .submit(doc, move || async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(step + 1)
                    })
                    .await?;
                println!("{doc}: bumped to version {version}");
                Ok::<_, callback_queue_scheduler::SchedulerError>(())
            }));
        }
    }

    for handle in handles {
        handle.await??;
    }

    println!("workers live: {}", scheduler.worker_count());
    scheduler.shutdown().await;
    println!("scheduler drained");

    Ok(())
}
