// SPDX-License-Identifier: GPL-3.0-only

use std::time::Duration;

use smithay::utils::{Monotonic, Time};

/// Presentation statistics of a single output.
#[derive(Debug, Default)]
pub struct Timings {
    refresh_interval: Option<Duration>,
    presented: u64,
    missed: u64,
    first: Option<Time<Monotonic>>,
    last: Option<(Time<Monotonic>, u32)>,
}

impl Timings {
    pub fn new(refresh_mhz: u32) -> Self {
        Timings {
            refresh_interval: (refresh_mhz > 0)
                .then(|| Duration::from_secs_f64(1_000.0 / refresh_mhz as f64)),
            ..Default::default()
        }
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval
    }

    pub fn presented(&mut self, time: Time<Monotonic>, sequence: u32) {
        if let Some((_, last_seq)) = self.last {
            let skipped = sequence.wrapping_sub(last_seq);
            if skipped > 1 && skipped < u32::MAX / 2 {
                self.missed += (skipped - 1) as u64;
            }
        }
        self.first.get_or_insert(time);
        self.last = Some((time, sequence));
        self.presented += 1;
    }

    pub fn frames_presented(&self) -> u64 {
        self.presented
    }

    /// Vblanks that passed without a new frame being ready.
    pub fn vblanks_missed(&self) -> u64 {
        self.missed
    }

    pub fn average_frame_time(&self) -> Option<Duration> {
        let first = self.first?;
        let (last, _) = self.last?;
        let frames = self.presented.checked_sub(1).filter(|f| *f > 0)?;
        let elapsed = Time::elapsed(&first, last);
        Some(match u32::try_from(frames) {
            Ok(frames) => elapsed / frames,
            Err(_) => elapsed.div_f64(frames as f64),
        })
    }
}
