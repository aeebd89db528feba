//! The polymorphic arena contract and its telemetry snapshot.

use std::any::Any;

use serde::{Deserialize, Serialize};

/// Common interface implemented by [`crate::generic_arena::GenericArena`] and
/// [`crate::streaming_arena::StreamingArena`].
///
/// `StreamingArena` embeds a `GenericArena` rather than inheriting from it —
/// composition stands in for the source's subclassing.
pub trait Arena: Send + Sync {
    /// Requests `size` bytes aligned to `align` from the upstream allocator.
    /// Returns `None` iff the upstream allocator fails; no state changes on
    /// failure.
    fn allocate(&self, size: usize, align: usize) -> Option<*mut u8>;

    /// Releases a previously-allocated region back to the upstream allocator.
    fn deallocate(&self, ptr: *mut u8, size: usize, align: usize);

    /// Identity comparison: two arenas are interchangeable only if they are
    /// the same object.
    fn equals(&self, other: &dyn Arena) -> bool;

    /// Resets the predictor's learned byte-footprint estimate to cold start.
    fn reset_learning(&self);

    /// Flushes the current peak usage through the persistence codec. Safe to
    /// call at any time; also invoked implicitly on drop.
    fn save_statistics(&self);

    /// A consistent, point-in-time snapshot of usage and learning state.
    fn telemetry(&self) -> ArenaTelemetry;

    /// Downcasting hook for `StreamingArena`-specific operations.
    fn as_any(&self) -> &dyn Any;
}

/// Read-only, serializable snapshot of an arena's usage and learning state.
///
/// Ring-related fields are zero for [`crate::generic_arena::GenericArena`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArenaTelemetry {
    pub current_usage: u64,
    pub peak_usage: u64,
    pub predicted_bytes: u64,
    pub ring_size: u64,
    pub ring_occupancy: u64,
    pub predicted_slots: u64,
    pub average_throughput_gbs: f64,
    pub is_warmed_up: bool,
}

impl ArenaTelemetry {
    /// Serializes this snapshot to a JSON string for external dashboards or
    /// log sinks. `Self` is plain data, so this can only fail if `serde_json`
    /// itself is misconfigured, which cannot happen for this struct shape.
    pub fn telemetry_json(&self) -> String {
        serde_json::to_string(self).expect("ArenaTelemetry always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_json_round_trips_through_serde_json() {
        let telemetry = ArenaTelemetry {
            current_usage: 1024,
            peak_usage: 4096,
            predicted_bytes: 2048,
            ring_size: 8,
            ring_occupancy: 2,
            predicted_slots: 8,
            average_throughput_gbs: 1.5,
            is_warmed_up: true,
        };

        let json = telemetry.telemetry_json();
        let parsed: ArenaTelemetry = serde_json::from_str(&json).expect("valid JSON");
        assert_eq!(parsed, telemetry);
    }
}
