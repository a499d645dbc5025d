use mimic_config::{ConfigStore, MimicConfig};
use mimic_core::IdleCycleStatus;
use mimic_remote::RemoteControl;
use mimic_runtime::{BehaviourCatalog, BehaviourManager, ManagerActor, default_behaviours};
use tracing::{error, info, warn};

pub(super) async fn cmd_start(
    config: MimicConfig,
    store: ConfigStore,
    no_remote: bool,
    idle_cycle: Option<IdleCycleStatus>,
) -> mimic_core::Result<()> {
    let catalog = BehaviourCatalog::build(default_behaviours(&config));
    let hostname = config.client.resolved_hostname();

    println!("Mimic v{}", env!("CARGO_PKG_VERSION"));
    println!("   Host: {hostname}");
    println!(
        "   Behaviours: {} available, {} unavailable",
        catalog.available().count(),
        catalog.unavailable().count()
    );

    let mut manager = BehaviourManager::new(catalog, store)?;
    if let Some(status) = idle_cycle {
        manager.set_idle_cycle(status);
    }
    println!("   Idle cycle: {}", manager.idle_cycle());

    let (actor, handle) = ManagerActor::new(manager, &config.scheduler);
    let scheduler = tokio::spawn(actor.run());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let remote = if no_remote || !config.server.enabled {
        println!("   Remote control: disabled");
        None
    } else {
        println!("   Remote control: {}", config.server.websocket_url);
        let remote = RemoteControl::new(&config, handle.clone());
        Some(tokio::spawn(remote.run(shutdown_rx)))
    };
    println!();

    wait_for_signal().await;
    info!("shutdown requested");

    let _ = shutdown_tx.send(true);
    if let Some(remote) = remote {
        if let Err(e) = remote.await {
            error!(error = %e, "remote control task failed");
        }
    }

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "scheduler already stopped");
    }
    if let Err(e) = scheduler.await {
        error!(error = %e, "scheduler task failed");
    }

    info!("goodbye");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
pub(super) async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("received Ctrl+C"),
                    _ = term.recv() => info!("received SIGTERM"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot listen for SIGTERM"),
        }
    }

    if tokio::signal::ctrl_c().await.is_ok() {
        info!("received Ctrl+C");
    }
}
