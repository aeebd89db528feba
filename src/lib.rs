//! Dual-mode adaptive memory arena.
//!
//! [`GenericArena`] is an instrumented general-purpose pool that learns its
//! session peak byte footprint across runs. [`StreamingArena`] additionally
//! owns a jitter-adaptive, pinned ring buffer intended for zero-copy DMA
//! streaming (the original use case is ultrasound RF acquisition: a producer
//! thread fills header/payload slots at a sensor-driven cadence while a
//! consumer thread drains them, and the ring grows when observed lag
//! outgrows its current capacity).
//!
//! Start with a [`Builder`]:
//!
//! ```
//! use adaptive_arena::{Builder, ArenaMode};
//!
//! let arena = Builder::new()
//!     .set_key("example-secret")
//!     .set_mode(ArenaMode::Generic)
//!     .build()
//!     .expect("secret key was provided");
//!
//! let telemetry = arena.telemetry();
//! assert_eq!(telemetry.current_usage, 0);
//! ```

mod arena;
mod builder;
mod config;
mod error;
mod generic_arena;
mod persistence;
mod pinned;
mod predictor;
mod streaming_arena;

#[cfg(test)]
mod test_support;

pub use arena::{Arena, ArenaTelemetry};
pub use builder::Builder;
pub use config::{ArenaMode, Config};
pub use error::ConfigError;
pub use generic_arena::GenericArena;
pub use predictor::MIN_PREDICTED_SLOTS;
pub use streaming_arena::StreamingArena;
