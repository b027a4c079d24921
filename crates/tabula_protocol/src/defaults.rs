//! Canonical default values shared by the host and the plugin.

use std::time::Duration;

pub const DEFAULT_PLUGIN_BIND_ADDR: &str = "127.0.0.1:0";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_TRANSCRIPT_PATH: &str = ".log";
pub const DEFAULT_REFERENCE_TZ: &str = "UTC";
pub const DEFAULT_SAMPLE_ROWS: usize = 1000;

pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DISCOVER_TIMEOUT: Duration = Duration::from_secs(1);
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound for a single frame payload (16 MiB).
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

/// Records buffered between the row reader and the socket writer.
pub const PUBLISH_CHANNEL_CAPACITY: usize = 256;

pub const CANCELLED_MESSAGE: &str = "Cancelled by signal";
