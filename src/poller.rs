use crate::config::Config;
use crate::frame_reader::{ClearInput, FrameReader, ReaderSettings};
use crate::recorder::ReadingRecorder;
use crate::shared_store::BridgeStore;
use anyhow::{bail, ensure, Context};
use std::io::Read;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Opens the serial port and bridge named in `config` and records readings
/// until the port fails.
pub async fn run(config: &Config) -> Result<(), anyhow::Error> {
    ensure!(!config.serial_port.is_empty(), "config is missing <serialport>");

    let identity = config.sensor_identity()?;
    let settings = ReaderSettings {
        identity: identity.clone(),
        solar_threshold: config.solar_threshold_watts,
        frame_deadline: config.frame_deadline(),
    };

    let reader = FrameReader::open(&config.serial_port, config.baud_rate)
        .with_context(|| format!("failed to open serial port {}", config.serial_port))?;
    let store = BridgeStore::new(&config.bridge_url)?;
    let recorder = ReadingRecorder::new(Arc::new(store), identity, config.script_path.clone());

    run_with(reader, settings, recorder).await
}

/// Wires a frame reader thread to the recorder through a channel.
///
/// Returns once the reader stops. The reader stopping for any reason other
/// than the recorder hanging up is an error.
pub async fn run_with<P>(
    reader: FrameReader<P>,
    settings: ReaderSettings,
    recorder: ReadingRecorder,
) -> Result<(), anyhow::Error>
where
    P: Read + ClearInput + Send + 'static,
{
    info!("Starting poller");
    let (reading_tx, reading_rx) = mpsc::channel(32);
    let reader_handle = reader.spawn(settings, reading_tx);

    // On a recorder error the receiver is dropped here and the reader thread
    // exits after its next frame, so it is not joined
    recorder.run(reading_rx).await?;

    match tokio::task::spawn_blocking(move || reader_handle.join()).await? {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow::Error::new(e).context("frame reader stopped")),
        Err(_) => bail!("frame reader thread panicked"),
    }
}
