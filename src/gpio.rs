//! GPIO edge capture feeding an `EdgeCounter`.
//!
//! A watcher thread polls a digital input level and calls
//! `EdgeCounter::record_event` on every activation edge. It plays the role of
//! the platform interrupt callback: a separate execution context that only
//! ever appends to the counter.
//!
//! The `LevelSource` trait keeps the watcher independent of how the pin is
//! read (sysfs on Linux, scripted levels in tests).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::clock::Clock;
use crate::counter::EdgeCounter;

/// Default interval between pin level reads.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Back-off after a failed pin read.
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Reads the logic level of one digital input.
pub trait LevelSource: Send {
    /// Returns `true` for a high level.
    fn read_level(&mut self) -> io::Result<bool>;
}

/// Pin exported through the Linux sysfs GPIO interface.
#[derive(Debug, Clone)]
pub struct SysfsPin {
    value_path: PathBuf,
}

impl SysfsPin {
    const SYSFS_GPIO_ROOT: &'static str = "/sys/class/gpio";

    /// Pin by BCM number under `/sys/class/gpio`.
    pub fn new(pin: u32) -> Self {
        Self::with_root(Self::SYSFS_GPIO_ROOT, pin)
    }

    pub fn with_root(root: impl AsRef<Path>, pin: u32) -> Self {
        Self {
            value_path: root.as_ref().join(format!("gpio{}", pin)).join("value"),
        }
    }

    pub fn value_path(&self) -> &Path {
        &self.value_path
    }
}

impl LevelSource for SysfsPin {
    fn read_level(&mut self) -> io::Result<bool> {
        let content = std::fs::read_to_string(&self.value_path)?;
        match content.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected GPIO value '{}'", other),
            )),
        }
    }
}

/// Turns a stream of levels into activation edges.
///
/// With `active_low` (pull-up wiring, switch to ground) the device is active
/// when the level is low, and an edge is a high-to-low transition.
#[derive(Debug, Clone, Copy)]
pub struct EdgeDetector {
    active_low: bool,
    last_active: Option<bool>,
}

impl EdgeDetector {
    pub fn new(active_low: bool) -> Self {
        Self {
            active_low,
            last_active: None,
        }
    }

    /// Feeds one level sample; returns `true` on an activation edge.
    /// The first sample only primes the detector.
    pub fn update(&mut self, level: bool) -> bool {
        let active = level != self.active_low;
        let edge = self.last_active == Some(false) && active;
        self.last_active = Some(active);
        edge
    }
}

/// Spawns a thread that counts activation edges until `cancel` is set.
pub fn spawn_edge_watcher<S, C>(
    mut source: S,
    counter: Arc<EdgeCounter<C>>,
    active_low: bool,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> io::Result<JoinHandle<()>>
where
    S: LevelSource + 'static,
    C: Clock + 'static,
{
    std::thread::Builder::new()
        .name("edge-watcher".to_string())
        .spawn(move || {
            let mut detector = EdgeDetector::new(active_low);
            let mut failing = false;
            while !cancel.is_cancelled() {
                match source.read_level() {
                    Ok(level) => {
                        if failing {
                            debug!("GPIO read recovered");
                            failing = false;
                        }
                        if detector.update(level) {
                            counter.record_event();
                        }
                        std::thread::sleep(poll_interval);
                    }
                    Err(e) => {
                        if !failing {
                            warn!("GPIO read failed: {}", e);
                            failing = true;
                        }
                        cancel.sleep(ERROR_BACKOFF);
                    }
                }
            }
        })
}
