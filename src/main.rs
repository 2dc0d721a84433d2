use tracing::{error, info, warn};

use slotd::config::Config;
use slotd::tenant::TenantManager;

/// Offline maintenance pass over every tenant log: replay, verify that no
/// provider has overlapping active bookings, compact, exit.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    slotd::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    info!("slotd maintenance");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  working_hours: {:02}:{:02}-{:02}:{:02} (UTC{})",
        config.scheduler.working_hours.start_minute / 60,
        config.scheduler.working_hours.start_minute % 60,
        config.scheduler.working_hours.end_minute / 60,
        config.scheduler.working_hours.end_minute % 60,
        config.scheduler.utc_offset,
    );

    let tenants = TenantManager::new(config.data_dir.clone(), config.compact_threshold, config.scheduler);
    let tenant_ids = tenants.open_existing()?;

    let mut bookings = 0;
    let mut violations = 0;
    let mut failed = 0;
    for tenant_id in &tenant_ids {
        let Some(tenant) = tenants.get(*tenant_id) else {
            continue;
        };
        bookings += tenant.store.booking_count();

        let overlaps = tenant.store.find_overlaps().await;
        for (a, b) in &overlaps {
            warn!("tenant {tenant_id}: active bookings {a} and {b} overlap");
        }
        violations += overlaps.len();

        if let Err(e) = tenant.store.compact().await {
            error!("tenant {tenant_id}: compaction failed: {e}");
            failed += 1;
        }
    }

    info!(
        "checked {} tenants, {bookings} bookings: {violations} overlaps, {failed} compaction failures",
        tenant_ids.len()
    );
    if violations > 0 || failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
