//! ivaldi - field telemetry client library.
//!
//! Provides the pieces shared by the `ivaldi` binary's subcommands:
//! - `counter` - edge-event counters with windowed rates (rain gauge, anemometer)
//! - `scheduler` - fixed-cadence run loop with drift correction and cancellation
//! - `schema` / `record` / `codec` - binary wire frames for the serial link
//! - `station` - builds a record from counters and environmental sensors
//! - `gpio` - edge capture thread feeding the counters
//! - `output` - terminal line, JSON lines and CSV output
//! - `link` - serial port settings and send/receive helpers

pub mod cancel;
pub mod clock;
pub mod codec;
pub mod counter;
pub mod gpio;
pub mod link;
pub mod output;
pub mod record;
pub mod schedule;
pub mod scheduler;
pub mod schema;
pub mod station;

pub use cancel::CancellationToken;
pub use codec::{DecodeError, FrameReader, decode, encode};
pub use counter::{CounterProfile, EdgeCounter};
pub use record::{Record, Value};
pub use schedule::ScheduleSpec;
pub use scheduler::{RunSummary, Scheduler};
pub use schema::{Field, FieldKind, Schema};
