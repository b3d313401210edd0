use crate::pvoutput::{PvOutputClient, Status};
use crate::shared_store::{SharedStore, HOUSE_POWER, SOLAR_POWER};
use chrono::{DateTime, Local};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// House power was not positive yet, nothing was sent
    Skipped,
    /// Everything but the request itself
    DryRun,
    Posted(String),
}

/// A house reading of zero or below means the poller has not produced a
/// valid value yet.
pub fn house_power_is_valid(house_power: Option<&str>) -> bool {
    house_power
        .and_then(|value| value.trim().parse::<f64>().ok())
        .is_some_and(|watts| watts > 0.0)
}

/// Reads the latest solar and house readings from the store and forwards them
/// to PVOutput in a single request.
///
/// There is no retry. A rejected request is returned as an error so the
/// caller can exit non-zero and let its scheduler try again later.
pub async fn run(
    store: &dyn SharedStore,
    client: &PvOutputClient,
    now: DateTime<Local>,
    dry_run: bool,
) -> Result<UploadOutcome, anyhow::Error> {
    let house_power = store.get(HOUSE_POWER).await?;
    let solar_power = store.get(SOLAR_POWER).await?;

    let status = Status::at(
        &now,
        solar_power,
        house_power.clone().unwrap_or_default(),
    );
    info!(
        "{} {} solar={} house={}",
        status.date,
        status.time,
        status.solar_power.as_deref().unwrap_or("-"),
        house_power.as_deref().unwrap_or("-"),
    );

    if !house_power_is_valid(house_power.as_deref()) {
        warn!("House power is not positive yet, skipping upload");
        return Ok(UploadOutcome::Skipped);
    }
    if dry_run {
        info!("Dry run, not posting to {}", client.url());
        return Ok(UploadOutcome::DryRun);
    }

    let body = client.post_status(&status).await?;
    info!("POST OK: {body}");
    Ok(UploadOutcome::Posted(body))
}
