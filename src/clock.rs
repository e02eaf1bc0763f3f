//! Monotonic time source used to bound the suspending waits in the block and USB cores
//! (`submit_and_wait`, `wait_for_qh`, PS/2 polling, ...).
//!
//! The kernel's real clock (TSC calibration, HPET, RTC) lives outside this crate; drivers
//! only need a microsecond-resolution monotonic counter; see §6. [`Clock`] is that
//! boundary. [`set_clock`] installs the kernel-provided implementation; until then (and
//! in unit tests) a [`Deadline`] never expires on its own — callers that need bounded
//! waits in tests use [`Deadline::expired_after`] to force expiry deterministically.

use spin::Once;

/// A monotonic, microsecond-resolution clock.
pub trait Clock: Sync {
    /// Microseconds elapsed since an arbitrary, fixed epoch (e.g. boot).
    fn now_micros(&self) -> u64;
}

static CLOCK: Once<&'static dyn Clock> = Once::new();

/// Installs the kernel-provided clock. Idempotent.
pub fn set_clock(clock: &'static dyn Clock) {
    CLOCK.call_once(|| clock);
}

fn now_micros() -> u64 {
    CLOCK.get().map_or(0, |c| c.now_micros())
}

/// A bounded wait window, as used by every suspension point in §5: `submit_and_wait`
/// (NVMe, xHCI) and `wait_for_qh` (EHCI) each carry one of these.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    expires_at: u64,
    forced_expired: bool,
}

impl Deadline {
    /// A deadline `timeout_us` microseconds from now.
    #[must_use]
    pub fn after_micros(timeout_us: u64) -> Self {
        Self {
            expires_at: now_micros().saturating_add(timeout_us),
            forced_expired: false,
        }
    }

    /// An already-expired deadline, for deterministic timeout tests without a real clock.
    #[must_use]
    pub const fn expired_after() -> Self {
        Self {
            expires_at: 0,
            forced_expired: true,
        }
    }

    #[must_use]
    pub fn expired(&self) -> bool {
        self.forced_expired || now_micros() >= self.expires_at
    }
}

/// Spin on `poll` until it returns `Some`, or the deadline expires. This is the
/// polling primitive ATA PIO, EHCI port enable, and PS/2 controller self-test all share:
/// none of them may block (interrupt handlers can't suspend), so all three burn cycles
/// under a deadline instead.
pub fn poll_until<T>(deadline: Deadline, mut poll: impl FnMut() -> Option<T>) -> Option<T> {
    loop {
        if let Some(v) = poll() {
            return Some(v);
        }
        if deadline.expired() {
            return None;
        }
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_deadline_never_waits() {
        let d = Deadline::expired_after();
        assert!(d.expired());
        let mut calls = 0;
        let result = poll_until(d, || {
            calls += 1;
            None::<()>
        });
        assert!(result.is_none());
        assert_eq!(calls, 1);
    }

    #[test]
    fn poll_until_returns_first_match() {
        let d = Deadline::expired_after();
        let mut n = 0;
        let result = poll_until(d, || {
            n += 1;
            Some(n)
        });
        assert_eq!(result, Some(1));
    }
}
