use crate::config::SensorIdentity;
use crate::error::FrameError;
use crate::frame::Frame;
use crate::reconcile::{reconcile, Reading};
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, BufRead, BufReader, ErrorKind, Read};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};

// CC128 realtime and history lines are all well under this
const MAX_LINE_LEN: usize = 4096;

/// Discards whatever the device has sent but we have not read yet.
pub trait ClearInput {
    fn clear_input(&mut self) -> io::Result<()>;
}

impl ClearInput for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Everything the read loop needs besides the port itself.
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub identity: SensorIdentity,
    pub solar_threshold: i64,
    /// Upper bound on the wait for one valid frame, `None` waits forever
    pub frame_deadline: Option<Duration>,
}

/// Reads CurrentCost XML lines from a serial source until one yields a reading.
pub struct FrameReader<P> {
    port: BufReader<P>,
    // Bytes of a line interrupted by a read timeout
    pending: Vec<u8>,
}

impl FrameReader<Box<dyn SerialPort>> {
    /// Opens the monitor's serial port and drops anything already queued on it.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, FrameError> {
        info!("Opening serial port {path} at {baud_rate} baud");
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_secs(1))
            .open()
            .map_err(io::Error::from)?;
        let mut reader = Self::new(port);
        reader.port.get_mut().clear_input()?;
        Ok(reader)
    }
}

impl<P: Read + ClearInput> FrameReader<P> {
    pub fn new(port: P) -> Self {
        Self {
            port: BufReader::new(port),
            pending: Vec::new(),
        }
    }

    /// Blocks until a line parses into a reading for a known sensor.
    ///
    /// Bad lines are logged and skipped straight away, the monitor only emits a
    /// frame every few seconds so there is nothing to back off from. Input left
    /// over after a good frame is discarded so the next call sees fresh data.
    pub fn read_reading(
        &mut self,
        solar_baseline: i64,
        identity: &SensorIdentity,
        solar_threshold: i64,
        deadline: Option<Instant>,
    ) -> Result<Reading, FrameError> {
        loop {
            if let Some(line) = self.read_line()? {
                let result = Frame::parse(&line).and_then(|frame| {
                    if let Some(temperature) = frame.temperature {
                        debug!("Sensor {} reports {temperature}C", frame.sensor_index);
                    }
                    reconcile(&frame, solar_baseline, identity, solar_threshold)
                });
                match result {
                    Ok(reading) => {
                        self.discard_input()?;
                        return Ok(reading);
                    }
                    Err(e) if e.is_transient() => {
                        warn!("Skipping line: {e} in {:?}", line.trim_end())
                    }
                    Err(e) => return Err(e),
                }
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(FrameError::DeadlineElapsed);
            }
        }
    }

    /// Returns the next complete line, or `None` when the port timed out first
    /// or the line grew past `MAX_LINE_LEN` without a newline.
    fn read_line(&mut self) -> Result<Option<String>, FrameError> {
        let room = MAX_LINE_LEN.saturating_sub(self.pending.len()) as u64;
        match (&mut self.port).take(room).read_until(b'\n', &mut self.pending) {
            Ok(0) if self.pending.is_empty() => Err(FrameError::StreamClosed),
            Ok(_) if self.pending.len() >= MAX_LINE_LEN && !self.pending.ends_with(b"\n") => {
                warn!(
                    "Skipping line: no newline within {MAX_LINE_LEN} bytes, dropping {} bytes",
                    self.pending.len()
                );
                self.pending.clear();
                Ok(None)
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                Ok(Some(line))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn discard_input(&mut self) -> Result<(), FrameError> {
        let buffered = self.port.buffer().len();
        self.port.consume(buffered);
        self.pending.clear();
        self.port.get_mut().clear_input()?;
        Ok(())
    }
}

impl<P: Read + ClearInput + Send + 'static> FrameReader<P> {
    /// Runs the read loop on its own thread, sending every reading to `sender`.
    ///
    /// The solar baseline starts at zero and is carried from one reading to the
    /// next. The thread stops once the receiver is dropped or the port fails.
    pub fn spawn(
        self,
        settings: ReaderSettings,
        sender: Sender<Reading>,
    ) -> JoinHandle<Result<(), FrameError>> {
        thread::spawn(move || self.run(settings, sender))
    }

    fn run(mut self, settings: ReaderSettings, sender: Sender<Reading>) -> Result<(), FrameError> {
        info!("Starting frame reader thread");
        let mut solar_baseline = 0;

        loop {
            let deadline = settings.frame_deadline.map(|limit| Instant::now() + limit);
            let reading = self.read_reading(
                solar_baseline,
                &settings.identity,
                settings.solar_threshold,
                deadline,
            )?;
            solar_baseline = reading.solar_baseline;

            if sender.blocking_send(reading).is_err() {
                info!("Reading receiver closed, frame reader thread exiting");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    enum Chunk {
        Data(Vec<u8>),
        Timeout,
    }

    /// Serial port stand-in that replays scripted chunks.
    struct ScriptedPort {
        chunks: VecDeque<Chunk>,
        clears: usize,
    }

    impl ScriptedPort {
        fn new(chunks: Vec<Chunk>) -> Self {
            Self {
                chunks: chunks.into(),
                clears: 0,
            }
        }

        fn lines(lines: &[&str]) -> Self {
            Self::new(
                lines
                    .iter()
                    .map(|line| Chunk::Data(format!("{line}\r\n").into_bytes()))
                    .collect(),
            )
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                None => Ok(0),
                Some(Chunk::Timeout) => Err(io::Error::new(ErrorKind::TimedOut, "timed out")),
                Some(Chunk::Data(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.chunks.push_front(Chunk::Data(data.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }
    }

    impl ClearInput for ScriptedPort {
        fn clear_input(&mut self) -> io::Result<()> {
            self.chunks.clear();
            self.clears += 1;
            Ok(())
        }
    }

    const SOLAR_100: &str = "<msg><sensor>1</sensor><ch1><watts>00100</watts></ch1></msg>";

    fn read(reader: &mut FrameReader<ScriptedPort>, baseline: i64) -> Result<Reading, FrameError> {
        reader.read_reading(baseline, &SensorIdentity::default(), 70, None)
    }

    #[test]
    fn test_skips_malformed_lines_until_valid_frame() {
        let mut reader = FrameReader::new(ScriptedPort::lines(&[
            "<msg><sensor>1</sensor><ch1><watts>00100</wat",
            "garbage from a half-open port",
            "<msg><sensor>0</sensor></msg>",
            "<msg><sensor>0</sensor><ch1><watts>x</watts></ch1></msg>",
            SOLAR_100,
        ]));

        let reading = read(&mut reader, 0).unwrap();
        assert_eq!(reading.sensor_index, 1);
        assert_eq!(reading.net_watts, 100);
        assert_eq!(reading.solar_baseline, 100);
    }

    #[test]
    fn test_discards_backlog_after_valid_frame() {
        let house = "<msg><sensor>0</sensor><ch1><watts>500</watts></ch1><ch2><watts>500</watts></ch2><ch3><watts>500</watts></ch3></msg>";
        let mut reader = FrameReader::new(ScriptedPort::lines(&[SOLAR_100, house]));

        let reading = read(&mut reader, 0).unwrap();
        assert_eq!(reading.sensor_index, 1);
        assert_eq!(reader.port.get_ref().clears, 1);

        // The queued house frame went with the cleared input
        assert!(matches!(read(&mut reader, 100), Err(FrameError::StreamClosed)));
    }

    #[test]
    fn test_line_split_by_timeout_is_reassembled() {
        let mut reader = FrameReader::new(ScriptedPort::new(vec![
            Chunk::Data(b"<msg><sensor>1</sensor><ch1><wa".to_vec()),
            Chunk::Timeout,
            Chunk::Timeout,
            Chunk::Data(b"tts>00100</watts></ch1></msg>\n".to_vec()),
        ]));

        let reading = read(&mut reader, 0).unwrap();
        assert_eq!(reading.net_watts, 100);
    }

    #[test]
    fn test_unknown_sensor_is_skipped() {
        let mut reader = FrameReader::new(ScriptedPort::lines(&[
            "<msg><sensor>7</sensor><ch1><watts>999</watts></ch1></msg>",
            SOLAR_100,
        ]));

        let reading = read(&mut reader, 0).unwrap();
        assert_eq!(reading.sensor_index, 1);
    }

    #[test]
    fn test_out_of_range_frame_is_skipped() {
        let mut reader = FrameReader::new(ScriptedPort::lines(&[
            "<msg><sensor>0</sensor><ch1><watts>9223372036854775807</watts></ch1>\
             <ch2><watts>9223372036854775807</watts></ch2><ch3><watts>1</watts></ch3></msg>",
            SOLAR_100,
        ]));

        let reading = read(&mut reader, 0).unwrap();
        assert_eq!(reading.sensor_index, 1);
        assert_eq!(reading.net_watts, 100);
    }

    #[test]
    fn test_endless_line_is_dropped() {
        let noise = vec![b'x'; MAX_LINE_LEN * 3 + 17];
        let mut reader = FrameReader::new(ScriptedPort::new(vec![
            Chunk::Data(noise),
            Chunk::Data(format!("\n{SOLAR_100}\n").into_bytes()),
        ]));

        let reading = read(&mut reader, 0).unwrap();
        assert_eq!(reading.sensor_index, 1);
        assert!(reader.pending.is_empty());
    }

    #[test]
    fn test_deadline_elapsed() {
        let mut reader = FrameReader::new(ScriptedPort::new(vec![
            Chunk::Data(b"not a frame\n".to_vec()),
            Chunk::Timeout,
            Chunk::Data(SOLAR_100.as_bytes().to_vec()),
        ]));

        let result = reader.read_reading(0, &SensorIdentity::default(), 70, Some(Instant::now()));
        assert!(matches!(result, Err(FrameError::DeadlineElapsed)));
    }

    #[test]
    fn test_spawned_reader_threads_baseline() {
        let (tx, mut rx) = mpsc::channel(8);
        let settings = ReaderSettings {
            identity: SensorIdentity::default(),
            solar_threshold: 70,
            frame_deadline: None,
        };

        // One frame per call survives the input clear, so script one call at a time
        let solar = FrameReader::new(ScriptedPort::lines(&[SOLAR_100]));
        let handle = solar.spawn(settings, tx);

        let reading = rx.blocking_recv().unwrap();
        assert_eq!(reading.solar_baseline, 100);

        // Port is drained after the first frame, so the thread stops on end of stream
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(FrameError::StreamClosed)));
        assert!(rx.blocking_recv().is_none());
    }
}
