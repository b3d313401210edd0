use crate::config::SensorIdentity;
use crate::reconcile::Reading;
use crate::shared_store::{SharedStore, DATE_TIME, HOUSE_POWER, SOLAR_POWER, VCC_BATT, WH_TODAY};
use anyhow::Context;
use chrono::{DateTime, TimeZone};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::Receiver;
use tracing::{info, warn};

// Far beyond any domestic installation, anything larger is a corrupt value
const MAX_BRIDGE_WATTS: f64 = 1e9;

/// Persists readings to the daily CSV file and publishes them to the shared store.
pub struct ReadingRecorder {
    store: Arc<dyn SharedStore>,
    identity: SensorIdentity,
    script_path: String,
}

impl ReadingRecorder {
    pub fn new(store: Arc<dyn SharedStore>, identity: SensorIdentity, script_path: String) -> Self {
        Self {
            store,
            identity,
            script_path,
        }
    }

    /// Records readings until the sending side hangs up.
    pub async fn run(self, mut readings: Receiver<Reading>) -> Result<(), anyhow::Error> {
        info!("Starting reading recorder");
        while let Some(reading) = readings.recv().await {
            for line in self.record(&reading, &chrono::Local::now()).await? {
                println!("{line}");
            }
        }
        info!("Reading channel closed, recorder exiting");
        Ok(())
    }

    /// Writes one reading and returns the CSV lines appended for it.
    ///
    /// The house figure is netted against the inverter's solar power as
    /// published on the store by the microcontroller.
    pub async fn record<Tz: TimeZone>(
        &self,
        reading: &Reading,
        now: &DateTime<Tz>,
    ) -> Result<Vec<String>, anyhow::Error>
    where
        Tz::Offset: std::fmt::Display,
    {
        let bridge_solar = self.bridge_solar_watts().await;
        let wh_today = self.read_or_empty(WH_TODAY).await;
        let battery = self.read_or_empty(VCC_BATT).await;

        let poll_date = now.format("%d/%m/%Y").to_string();
        let poll_time = now.format("%H:%M:%S").to_string();
        let net_watts = reading.net_watts.saturating_sub(bridge_solar);

        let lines = vec![
            format!(
                "{poll_date},{poll_time},{},{},{net_watts},,",
                reading.sensor_index, reading.sensor_name
            ),
            format!("{poll_date},{poll_time},1,HouseSolar,{bridge_solar},{wh_today},{battery}"),
        ];

        let path = self.csv_path(&now.format("%d-%m-%Y").to_string());
        self.append(&path, &lines)
            .await
            .with_context(|| format!("failed to write data file {}", path.display()))?;

        self.put_or_warn(DATE_TIME, &format!("{poll_date} - {poll_time}"))
            .await;
        if self.identity.is_house(reading.sensor_index) {
            self.put_or_warn(HOUSE_POWER, &net_watts.to_string()).await;
        }

        Ok(lines)
    }

    fn csv_path(&self, date: &str) -> PathBuf {
        PathBuf::from(format!("{}{}.csv", self.script_path, date))
    }

    async fn append(&self, path: &Path, lines: &[String]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let mut text = lines.join("\n");
        text.push('\n');
        file.write_all(text.as_bytes()).await?;
        file.flush().await
    }

    async fn bridge_solar_watts(&self) -> i64 {
        let raw = self.read_or_empty(SOLAR_POWER).await;
        match raw.trim().parse::<f64>() {
            Ok(watts) if watts.is_finite() && watts.abs() <= MAX_BRIDGE_WATTS => {
                watts.round() as i64
            }
            _ => {
                warn!("No usable {SOLAR_POWER} on the bridge ({raw:?}), assuming 0W");
                0
            }
        }
    }

    async fn read_or_empty(&self, key: &str) -> String {
        match self.store.get(key).await {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to read {key} from the bridge: {e}");
                String::new()
            }
        }
    }

    async fn put_or_warn(&self, key: &str, value: &str) {
        if let Err(e) = self.store.put(key, value).await {
            warn!("Failed to write {key} to the bridge: {e}");
        }
    }
}
