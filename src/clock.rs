//! Multi-mode virtual time source.
//!
//! Billing due-date checks, idempotency TTLs, and webhook timestamps all go
//! through this clock so tests can fast-forward time deterministically.
//! `now()` is called on every store write, so the read path is a lock-free
//! seqlock over an atomically published anchor; only mode changes and
//! `advance` take the writer lock.

use std::hint;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};

use crate::error::{SimResult, SimulatorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// Wall-clock time (the default).
    Real,
    /// Virtual seconds advance `multiplier`x faster than real seconds.
    Accelerated,
    /// Time is frozen and only moves via `advance`.
    Manual,
}

const MODE_REAL: u8 = 0;
const MODE_ACCELERATED: u8 = 1;
const MODE_MANUAL: u8 = 2;

/// Snapshot read by `now()`. Published atomically via the sequence counter.
struct Anchor {
    mode: u8,
    /// Wall-clock unix micros at the moment the anchor was published.
    real_us: i64,
    /// Virtual unix micros at the moment the anchor was published.
    virtual_us: i64,
    /// Virtual micros per real milli (multiplier * 1000).
    multiplier_millis: u64,
}

pub struct VirtualClock {
    seq: AtomicU64,
    mode: AtomicU8,
    anchor_real_us: AtomicI64,
    anchor_virtual_us: AtomicI64,
    multiplier_millis: AtomicU64,
    // Serializes set_mode / advance. Readers never touch it.
    writer: Mutex<()>,
}

impl VirtualClock {
    /// Starts in real mode, anchored at the current wall clock.
    pub fn new() -> Self {
        let now_us = Utc::now().timestamp_micros();
        Self {
            seq: AtomicU64::new(0),
            mode: AtomicU8::new(MODE_REAL),
            anchor_real_us: AtomicI64::new(now_us),
            anchor_virtual_us: AtomicI64::new(now_us),
            multiplier_millis: AtomicU64::new(1000),
            writer: Mutex::new(()),
        }
    }

    /// Starts frozen at `initial` (manual mode). Convenience for tests.
    pub fn manual(initial: DateTime<Utc>) -> Self {
        let clock = Self::new();
        clock.set_manual(initial);
        clock
    }

    /// Current virtual time. Lock-free; retries on a torn anchor read.
    pub fn now(&self) -> DateTime<Utc> {
        loop {
            let s1 = self.seq.load(Ordering::Acquire);
            if s1 & 1 == 1 {
                hint::spin_loop();
                continue;
            }
            let anchor = Anchor {
                mode: self.mode.load(Ordering::Relaxed),
                real_us: self.anchor_real_us.load(Ordering::Relaxed),
                virtual_us: self.anchor_virtual_us.load(Ordering::Relaxed),
                multiplier_millis: self.multiplier_millis.load(Ordering::Relaxed),
            };
            if self.seq.load(Ordering::Acquire) == s1 {
                return Self::compute(&anchor);
            }
        }
    }

    /// Unix seconds of the current virtual time (webhook signature header).
    pub fn timestamp(&self) -> i64 {
        self.now().timestamp()
    }

    pub fn mode(&self) -> ClockMode {
        match self.mode.load(Ordering::Acquire) {
            MODE_ACCELERATED => ClockMode::Accelerated,
            MODE_MANUAL => ClockMode::Manual,
            _ => ClockMode::Real,
        }
    }

    /// Switch to real mode. The anchor is re-based at the current virtual
    /// instant, so time never jumps backwards even if the clock was ahead.
    pub fn set_real(&self) {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let virtual_now = self.now();
        self.publish(MODE_REAL, virtual_now, 1.0);
    }

    /// Switch to accelerated mode: `multiplier` virtual seconds per real
    /// second, continuing from the current virtual instant.
    pub fn set_accelerated(&self, multiplier: f64) -> SimResult<()> {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(SimulatorError::InvalidInput(format!(
                "clock multiplier must be finite and positive, got {multiplier}"
            )));
        }
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let virtual_now = self.now();
        self.publish(MODE_ACCELERATED, virtual_now, multiplier);
        Ok(())
    }

    /// Freeze the clock at `initial`. The one mode switch allowed to rewind:
    /// test setup needs absolute control of the timeline.
    pub fn set_manual(&self, initial: DateTime<Utc>) {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.publish(MODE_MANUAL, initial, 0.0);
    }

    /// Move a manual clock forward. Fails with `InvalidClockState` in real or
    /// accelerated mode, and rejects negative durations.
    pub fn advance(&self, by: Duration) -> SimResult<DateTime<Utc>> {
        if by < Duration::zero() {
            return Err(SimulatorError::InvalidInput(
                "cannot advance the clock backwards".into(),
            ));
        }
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if self.mode.load(Ordering::Acquire) != MODE_MANUAL {
            return Err(SimulatorError::InvalidClockState(
                "advance is only valid in manual mode".into(),
            ));
        }
        let next = Self::from_micros(
            self.anchor_virtual_us
                .load(Ordering::Relaxed)
                .saturating_add(by.num_microseconds().unwrap_or(i64::MAX)),
        );
        self.publish(MODE_MANUAL, next, 0.0);
        Ok(next)
    }

    /// Convenience for billing-cycle tests.
    pub fn advance_secs(&self, secs: i64) -> SimResult<DateTime<Utc>> {
        self.advance(Duration::seconds(secs))
    }

    // Caller must hold the writer lock.
    fn publish(&self, mode: u8, virtual_now: DateTime<Utc>, multiplier: f64) {
        self.seq.fetch_add(1, Ordering::Release);
        self.mode.store(mode, Ordering::Relaxed);
        self.anchor_real_us
            .store(Utc::now().timestamp_micros(), Ordering::Relaxed);
        self.anchor_virtual_us
            .store(virtual_now.timestamp_micros(), Ordering::Relaxed);
        self.multiplier_millis
            .store((multiplier * 1000.0).round() as u64, Ordering::Relaxed);
        self.seq.fetch_add(1, Ordering::Release);
    }

    fn compute(anchor: &Anchor) -> DateTime<Utc> {
        match anchor.mode {
            MODE_MANUAL => Self::from_micros(anchor.virtual_us),
            _ => {
                let elapsed_us =
                    Utc::now().timestamp_micros().saturating_sub(anchor.real_us) as i128;
                let scaled = elapsed_us * anchor.multiplier_millis as i128 / 1000;
                Self::from_micros(anchor.virtual_us.saturating_add(scaled as i64))
            }
        }
    }

    fn from_micros(us: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(us).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}
