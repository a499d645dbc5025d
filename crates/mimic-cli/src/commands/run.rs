use mimic_config::{ConfigStore, MimicConfig};
use mimic_core::IdleCycleStatus;
use mimic_runtime::{BehaviourCatalog, BehaviourManager, default_behaviours};
use std::time::Duration;
use tracing::info;

/// How often the foreground run checks whether the behaviour finished.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub(super) async fn cmd_run(
    config: MimicConfig,
    store: ConfigStore,
    id: String,
    timeout: Option<u64>,
) -> mimic_core::Result<()> {
    let catalog = BehaviourCatalog::build(default_behaviours(&config));
    let mut manager = BehaviourManager::new(catalog, store)?;
    manager.set_idle_cycle(IdleCycleStatus::Stopped);

    let summary = manager.run_behaviour(&id, false).await?;
    println!("▶ {} ({}, {})", summary.display_name, summary.id, summary.category);

    let deadline = timeout.map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));
    let signal = super::start::wait_for_signal();
    tokio::pin!(signal);

    loop {
        if !manager.is_behaviour_running() {
            println!("■ {} finished", summary.id);
            return Ok(());
        }
        if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
            info!(behaviour = %summary.id, "timeout reached");
            break;
        }
        tokio::select! {
            _ = &mut signal => break,
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }

    manager.terminate_behaviour().await;
    println!("■ {} stopped", summary.id);
    Ok(())
}
