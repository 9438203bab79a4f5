/// Best-effort snapshot of the pool counters.
///
/// Each field is an independent atomic load, so the values are not
/// guaranteed to describe exactly the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolState {
    pub submitted: u64,
    pub finished: u64,
    /// `submitted - finished`. Jobs abandoned on timeout stay counted here.
    pub active: u64,
    pub failed: u64,
    pub abandoned: u64,
}

impl PoolState {
    pub fn is_idle(&self) -> bool {
        self.active == 0
    }

    pub fn success_rate(&self) -> f64 {
        if self.finished == 0 {
            return 1.0;
        }
        self.finished.saturating_sub(self.failed) as f64 / self.finished as f64
    }
}
