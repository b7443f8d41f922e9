// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{Context, Result};
use calloop::{
    generic::Generic,
    signals::{Signal, Signals},
    EventLoop, Interest, Mode, PostAction,
};
use smithay::{
    backend::drm::DrmDeviceFd,
    reexports::drm::control::{crtc, Device as ControlDevice, Event as DrmEvent},
};
use std::time::Duration;
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    /// The flip requested on `crtc` completed, the new buffer is being scanned out.
    FlipComplete {
        crtc: crtc::Handle,
        sequence: u32,
        /// Vblank timestamp on the monotonic clock.
        time: Duration,
    },
    /// Shutdown was requested.
    Stop,
}

pub trait EventSource {
    /// Blocks until at least one event is available and returns everything ready.
    fn dispatch(&mut self) -> Result<Vec<LoopEvent>>;
}

/// Waits on the drm device, stdin and termination signals.
pub struct LoopEvents {
    event_loop: EventLoop<'static, Vec<LoopEvent>>,
}

impl LoopEvents {
    pub fn new(device: &DrmDeviceFd, stop_on_stdin: bool) -> Result<Self> {
        let event_loop =
            EventLoop::try_new().with_context(|| "Failed to initialize event loop")?;
        let handle = event_loop.handle();

        let reader = device.clone();
        handle
            .insert_source(
                Generic::new(device.clone(), Interest::READ, Mode::Level),
                move |_, _, events: &mut Vec<LoopEvent>| {
                    for event in reader.receive_events()? {
                        match event {
                            DrmEvent::PageFlip(flip) => {
                                trace!(crtc = ?flip.crtc, seq = flip.frame, "Flip completed");
                                events.push(LoopEvent::FlipComplete {
                                    crtc: flip.crtc,
                                    sequence: flip.frame,
                                    time: flip.duration,
                                });
                            }
                            DrmEvent::Vblank(_) => {}
                            DrmEvent::Unknown(event) => {
                                debug!(?event, "Ignoring unknown drm event");
                            }
                        }
                    }
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|err| err.error)
            .context("Failed to add drm device to event loop")?;

        if stop_on_stdin {
            handle
                .insert_source(
                    Generic::new(std::io::stdin(), Interest::READ, Mode::Level),
                    |_, _, events: &mut Vec<LoopEvent>| {
                        info!("Input on stdin, shutting down");
                        events.push(LoopEvent::Stop);
                        Ok(PostAction::Remove)
                    },
                )
                .map_err(|err| err.error)
                .context("Failed to watch stdin")?;
        }

        let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM])
            .context("Failed to block termination signals")?;
        handle
            .insert_source(signals, |event, _, events: &mut Vec<LoopEvent>| {
                info!(signal = ?event.signal(), "Received signal, shutting down");
                events.push(LoopEvent::Stop);
            })
            .map_err(|err| err.error)
            .context("Failed to add signal source to event loop")?;

        Ok(LoopEvents { event_loop })
    }
}

impl EventSource for LoopEvents {
    fn dispatch(&mut self) -> Result<Vec<LoopEvent>> {
        let mut events = Vec::new();
        while events.is_empty() {
            self.event_loop
                .dispatch(None, &mut events)
                .context("Failed to dispatch events")?;
        }
        Ok(events)
    }
}
