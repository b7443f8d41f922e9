// SPDX-License-Identifier: GPL-3.0-only

use smithay::utils::{Clock, Monotonic, Time};

pub static CLEAR_COLOR: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

/// What gets drawn into the next frame of an output.
pub trait FrameContent {
    fn frame_color(&mut self) -> [f32; 4];
}

/// Slowly fades between red, green and blue.
///
/// The animation advances with wall time, not per output, so all outputs show
/// roughly the same colour.
#[derive(Debug)]
pub struct ColorCycle {
    clock: Clock<Monotonic>,
    last: Time<Monotonic>,
    colour: [f32; 3],
    dec: usize,
    cycle_ms: f32,
}

impl ColorCycle {
    pub fn new(cycle_ms: u32) -> Self {
        let clock = Clock::new();
        let last = clock.now();
        ColorCycle {
            clock,
            last,
            colour: [CLEAR_COLOR[0], CLEAR_COLOR[1], CLEAR_COLOR[2]],
            dec: 0,
            cycle_ms: cycle_ms.max(1) as f32,
        }
    }

    /// Moves `ms` worth of intensity from the fading channel to the next one.
    fn advance(&mut self, ms: u64) {
        let ms = (ms % 1000) as f32;
        let inc = (self.dec + 1) % 3;

        self.colour[self.dec] -= ms / self.cycle_ms;
        self.colour[inc] += ms / self.cycle_ms;

        if self.colour[self.dec] < 0.0 {
            self.colour[self.dec] = 0.0;
            self.colour[inc] = 1.0;

            self.dec = inc;
        }
    }

    fn current(&self) -> [f32; 4] {
        [self.colour[0], self.colour[1], self.colour[2], 1.0]
    }
}

impl FrameContent for ColorCycle {
    fn frame_color(&mut self) -> [f32; 4] {
        let now = self.clock.now();
        let elapsed = Time::elapsed(&self.last, now);
        self.last = now;

        self.advance(elapsed.as_millis() as u64);
        self.current()
    }
}
