//! Online EMA predictor for peak byte footprint and ring slot count.
//!
//! Pure, stateful, single-owner: the `Predictor` is always driven under the
//! owning arena's lock and never shared. EMA is cheap, branch-free, and has
//! no memory of a full history — transient spikes decay naturally instead of
//! permanently inflating the estimate.

/// Ring slot count never falls below this, even from a cold `observe_lag(0)`.
/// Below 4 slots the ring effectively serializes producers and consumers.
pub const MIN_PREDICTED_SLOTS: u64 = 4;

/// Exponentially-weighted estimator of peak byte footprint and required
/// ring slot count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predictor {
    alpha: f64,
    predicted_bytes: u64,
    predicted_slots: u64,
}

impl Predictor {
    /// Creates a predictor with the given smoothing weight, clamped into `[0, 1]`.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            predicted_bytes: 0,
            predicted_slots: MIN_PREDICTED_SLOTS,
        }
    }

    /// Folds a session's peak byte usage into the running estimate.
    ///
    /// Cold start (`predicted_bytes == 0`) takes the observation verbatim;
    /// otherwise applies `alpha*b + (1-alpha)*predicted_bytes`, truncated.
    pub fn observe_peak(&mut self, bytes: u64) {
        self.predicted_bytes = if self.predicted_bytes == 0 {
            bytes
        } else {
            (self.alpha * bytes as f64 + (1.0 - self.alpha) * self.predicted_bytes as f64) as u64
        };
    }

    /// Folds an observed lag sample into the slot-count estimate. Floored at
    /// [`MIN_PREDICTED_SLOTS`] regardless of how low the observation is.
    pub fn observe_lag(&mut self, lag: u64) {
        let blended = self.alpha * lag as f64 + (1.0 - self.alpha) * self.predicted_slots as f64;
        self.predicted_slots = (blended.round() as u64).max(MIN_PREDICTED_SLOTS);
    }

    /// Current predicted peak byte footprint.
    pub fn predicted_bytes(&self) -> u64 {
        self.predicted_bytes
    }

    /// Current predicted ring slot count.
    pub fn predicted_slots(&self) -> u64 {
        self.predicted_slots
    }

    /// Replaces `predicted_bytes` directly — used when restoring persisted state.
    pub fn restore(&mut self, bytes: u64) {
        self.predicted_bytes = bytes;
    }

    /// Resets learned byte footprint back to cold start. Slot learning is untouched.
    pub fn reset_bytes(&mut self) {
        self.predicted_bytes = 0;
    }
}

impl Default for Predictor {
    fn default() -> Self {
        Self::new(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_takes_observation_verbatim() {
        let mut p = Predictor::new(0.5);
        p.observe_peak(100);
        assert_eq!(p.predicted_bytes(), 100);
    }

    #[test]
    fn restore_then_observe_blends_with_alpha() {
        let mut p = Predictor::new(0.25);
        p.restore(100_000_000);
        p.observe_peak(200_000_000);
        let expected = (0.25 * 200_000_000.0 + 0.75 * 100_000_000.0) as u64;
        assert_eq!(p.predicted_bytes(), expected);
    }

    #[test]
    fn alpha_zero_never_updates_once_seeded() {
        let mut p = Predictor::new(0.0);
        p.restore(42);
        p.observe_peak(999);
        // alpha*b + (1-alpha)*predicted == 0*999 + 1*42
        assert_eq!(p.predicted_bytes(), 42);
    }

    #[test]
    fn alpha_one_acts_as_assignment() {
        let mut p = Predictor::new(1.0);
        p.restore(42);
        p.observe_peak(999);
        assert_eq!(p.predicted_bytes(), 999);
    }

    #[test]
    fn predicted_slots_floors_at_four() {
        let mut p = Predictor::new(1.0);
        p.observe_lag(3);
        assert_eq!(p.predicted_slots(), MIN_PREDICTED_SLOTS);

        let mut p = Predictor::new(1.0);
        p.observe_lag(0);
        assert_eq!(p.predicted_slots(), MIN_PREDICTED_SLOTS);
    }

    #[test]
    fn predicted_slots_grows_with_sustained_lag() {
        let mut p = Predictor::new(0.5);
        for _ in 0..20 {
            p.observe_lag(100);
        }
        assert!(p.predicted_slots() > MIN_PREDICTED_SLOTS);
        assert!(p.predicted_slots() <= 100);
    }

    #[test]
    fn alpha_is_clamped_at_construction() {
        assert_eq!(Predictor::new(-1.0).alpha, 0.0);
        assert_eq!(Predictor::new(2.0).alpha, 1.0);
    }
}
