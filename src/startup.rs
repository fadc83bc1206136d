use anyhow::Context;
use tracing::info;

use crate::config::{BaseConfig, StartupType};
use crate::driver::DriverVariant;
use crate::error::SchedulerError;
use crate::snapshot::SnapshotManager;
use crate::traits::Driver;
use crate::types::SurveyTopology;

/// Reconstruct the driver for the configured startup type.
///
/// `retained` is a driver carried over from a previous activation, if any.
/// On failure no driver is produced; the caller stays without one.
pub async fn reconstruct_driver(
    config: &BaseConfig,
    snapshots: &SnapshotManager,
    retained: Option<DriverVariant>,
) -> Result<(DriverVariant, SurveyTopology), SchedulerError> {
    let startup_type = config.startup_type;
    let driver = match startup_type {
        StartupType::Hot => hot_start(config, snapshots, retained).await,
        StartupType::Warm => warm_start(config, snapshots).await,
        StartupType::Cold => cold_start(config).await,
    }
    .map_err(|source| SchedulerError::Startup {
        startup_type,
        source,
    })?;

    let topology = driver.survey_topology();
    info!(
        "Driver '{}' ready after {:?} start: {} general, {} sequence proposals.",
        driver.name(),
        startup_type,
        topology.num_general_props,
        topology.num_seq_props
    );
    Ok((driver, topology))
}

/// Reuse the retained driver when one exists, ignoring any configured
/// snapshot source; otherwise fall back to a warm start.
async fn hot_start(
    config: &BaseConfig,
    snapshots: &SnapshotManager,
    retained: Option<DriverVariant>,
) -> anyhow::Result<DriverVariant> {
    if let Some(driver) = retained {
        info!("Hot start: reusing retained '{}' driver.", driver.name());
        return Ok(driver);
    }
    info!("Hot start requested with no retained driver; warm starting.");
    warm_start(config, snapshots).await
}

/// Cold reconstruction, then a stored snapshot (when one is configured)
/// overrides the replayed state.
async fn warm_start(
    config: &BaseConfig,
    snapshots: &SnapshotManager,
) -> anyhow::Result<DriverVariant> {
    let mut driver = cold_start(config).await?;

    if let Some(uri) = config.snapshot_uri.as_deref() {
        let bytes = snapshots.fetch(uri).await?;
        driver
            .restore_state(&bytes)
            .with_context(|| format!("restoring driver state from {uri}"))?;
        info!("Warm start: restored driver state from {uri}.");
    }
    Ok(driver)
}

/// Construct fresh, then replay the observation history when one is given.
async fn cold_start(config: &BaseConfig) -> anyhow::Result<DriverVariant> {
    let mut driver = DriverVariant::new(config.driver_type);
    if config.startup_database.trim().is_empty() {
        info!("Cold start from a clean state.");
        return Ok(driver);
    }

    let observations = driver
        .parse_observation_record(&config.startup_database)
        .context("parsing observation history")?;
    let count = observations.len();
    driver.cold_start(observations).await?;
    info!("Cold start: replayed {count} historical observations.");
    Ok(driver)
}
