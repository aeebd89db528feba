//! Chainable construction of a concrete [`Arena`].

use std::path::PathBuf;

use crate::arena::Arena;
use crate::config::{ArenaMode, Config};
use crate::error::ConfigError;
use crate::generic_arena::GenericArena;
use crate::pinned;
use crate::streaming_arena::StreamingArena;

/// Fluent builder. Consumes itself on every setter so calls chain:
/// `Builder::new().set_key("k").set_mode(ArenaMode::Streaming).build()`.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn set_key(mut self, key: impl Into<String>) -> Self {
        self.config.secret_key = key.into();
        self
    }

    pub fn set_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_path = path.into();
        self
    }

    pub fn set_hard_limit(mut self, bytes: u64) -> Self {
        self.config.hard_limit_bytes = bytes;
        self
    }

    pub fn set_mode(mut self, mode: ArenaMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn set_gpu_direct(mut self, enabled: bool) -> Self {
        self.config.gpu_direct_preferred = enabled;
        self
    }

    pub fn set_alpha(mut self, alpha: f64) -> Self {
        self.config.alpha = alpha;
        self
    }

    /// Validates configuration and constructs the selected arena. The only
    /// fatal construction error is a missing `secret_key`; every other
    /// failure mode (backend unavailability, persistence I/O) is recovered
    /// internally and surfaced only through telemetry or logging.
    pub fn build(self) -> Result<Box<dyn Arena>, ConfigError> {
        if self.config.secret_key.is_empty() {
            return Err(ConfigError::MissingSecretKey);
        }

        let arena: Box<dyn Arena> = match self.config.mode {
            ArenaMode::Generic => Box::new(GenericArena::new(self.config)),
            ArenaMode::Streaming => {
                let backend = pinned::resolve_backend(self.config.gpu_direct_preferred);
                Box::new(StreamingArena::new(self.config, backend))
            }
        };
        Ok(arena)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_with_empty_key_fails() {
        let result = Builder::new().build();
        assert_eq!(result.unwrap_err(), ConfigError::MissingSecretKey);
    }

    #[test]
    fn build_generic_succeeds_with_key() {
        let dir = tempfile::tempdir().unwrap();
        let arena = Builder::new()
            .set_key("k")
            .set_path(dir.path().join("session.bin"))
            .build()
            .expect("build should succeed");
        let telemetry = arena.telemetry();
        assert_eq!(telemetry.current_usage, 0);
    }

    #[test]
    fn build_streaming_succeeds_and_downcasts() {
        let dir = tempfile::tempdir().unwrap();
        let arena = Builder::new()
            .set_key("k")
            .set_path(dir.path().join("session.bin"))
            .set_mode(ArenaMode::Streaming)
            .build()
            .expect("build should succeed");

        let streaming = arena
            .as_any()
            .downcast_ref::<StreamingArena>()
            .expect("streaming mode should downcast to StreamingArena");
        streaming.initialize_ring(64, 4096, 8);
        assert_eq!(streaming.ring_size(), 8);
    }
}
