//! CurrentCost monitor bridge
//!
//! Reads the monitor's XML frames from a serial port, nets the whole-house
//! reading against solar generation, records readings locally and on the
//! Arduino Yún Bridge, and forwards the latest values to PVOutput.

pub mod config;
pub mod error;
pub mod frame;
pub mod frame_reader;
pub mod poller;
pub mod pvoutput;
pub mod recorder;
pub mod reconcile;
pub mod shared_store;
pub mod upload;

// Re-export commonly used types for easier access
pub use config::{Config, SensorIdentity};
pub use error::{FrameError, StoreError, UploadError};
pub use frame::{Frame, FramePower};
pub use frame_reader::{ClearInput, FrameReader, ReaderSettings};
pub use reconcile::{reconcile, Reading};
pub use shared_store::{BridgeStore, MemoryStore, OverlayStore, SharedStore};
