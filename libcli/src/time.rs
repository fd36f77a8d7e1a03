//! Monotonic timestamps for the timed loop.
//!
//! On aarch64 the virtual counter register is read directly, elsewhere this
//! falls back to `Instant`.

#[cfg(not(target_arch = "aarch64"))]
pub use portable::{Timestamp, now};

#[cfg(target_arch = "aarch64")]
pub use counter::{Timestamp, now};

#[cfg(not(target_arch = "aarch64"))]
mod portable {
    use std::time::{Duration, Instant};

    #[derive(Clone, Copy, Debug)]
    pub struct Timestamp(Instant);

    impl Timestamp {
        pub fn elapsed(&self) -> Duration {
            self.0.elapsed()
        }
    }

    pub fn now() -> Timestamp {
        Timestamp(Instant::now())
    }
}

#[cfg(target_arch = "aarch64")]
mod counter {
    use std::arch::asm;
    use std::time::Duration;

    #[derive(Clone, Copy, Debug)]
    pub struct Timestamp(u64);

    impl Timestamp {
        pub fn elapsed(&self) -> Duration {
            let ticks = ticks().saturating_sub(self.0);
            Duration::from_secs_f64(ticks as f64 / frequency() as f64)
        }
    }

    pub fn now() -> Timestamp {
        Timestamp(ticks())
    }

    #[inline]
    fn frequency() -> u64 {
        let hz: u64;
        unsafe {
            asm!("mrs {}, cntfrq_el0", out(reg) hz, options(nomem, nostack, preserves_flags, pure));
        }
        hz
    }

    #[inline(always)]
    fn ticks() -> u64 {
        let value: u64;
        // No `nomem`: the read must also act as a compiler fence.
        unsafe {
            asm!("mrs {}, cntvct_el0", out(reg) value, options(nostack, preserves_flags));
        }
        value
    }
}
