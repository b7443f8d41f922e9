// SPDX-License-Identifier: GPL-3.0-only

//! In-memory stand-ins for the display hardware.

use anyhow::{bail, Result};
use smithay::reexports::drm::control::{connector, crtc, encoder, framebuffer, from_u32};
use std::{cell::RefCell, io, rc::Rc, time::Duration};

use super::{
    device::{
        ConnectorInfo, DisplayMode, EncoderInfo, ExportFramebuffer, KmsDevice, ResourceList,
        SavedCrtc,
    },
    events::{EventSource, LoopEvent},
    render::RenderBackend,
};
use crate::backend::render::FrameContent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeMode {
    pub w: u16,
    pub h: u16,
}

impl Default for FakeMode {
    fn default() -> Self {
        FakeMode { w: 1920, h: 1080 }
    }
}

impl DisplayMode for FakeMode {
    fn dimensions(&self) -> (u16, u16) {
        (self.w, self.h)
    }

    fn refresh_mhz(&self) -> u32 {
        60_000
    }
}

#[derive(Debug, Clone)]
pub struct FakeConnector {
    pub interface_id: u32,
    pub connected: bool,
    pub modes: Vec<FakeMode>,
    current_encoder: Option<usize>,
    encoders: Vec<usize>,
}

impl FakeConnector {
    pub fn connected(interface_id: u32) -> Self {
        FakeConnector {
            interface_id,
            connected: true,
            modes: vec![FakeMode::default(), FakeMode { w: 1280, h: 720 }],
            current_encoder: None,
            encoders: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct FakeEncoder {
    crtc: Option<usize>,
    possible_crtcs: u32,
}

#[derive(Debug, Clone, Default)]
struct FakeCrtc {
    framebuffer: Option<framebuffer::Handle>,
    mode: Option<FakeMode>,
}

/// Connectors, encoders and crtcs of a fake device.
///
/// Handles are derived from indices: connectors start at 100, encoders at 200,
/// crtcs at 300 and framebuffers at 1000.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub connectors: Vec<FakeConnector>,
    encoders: Vec<FakeEncoder>,
    crtcs: Vec<FakeCrtc>,
}

impl Topology {
    /// `connectors` connected connectors, each with one encoder able to drive every crtc.
    pub fn shared_encoders(connectors: usize, crtcs: usize) -> Self {
        let mut topology = Topology {
            crtcs: vec![FakeCrtc::default(); crtcs],
            ..Default::default()
        };
        let mask = (1u32 << crtcs) - 1;
        for idx in 0..connectors {
            topology.push_connector(FakeConnector::connected(idx as u32 + 1), &[mask]);
        }
        topology
    }

    /// Adds a connector with one new encoder per entry of `possible_crtcs`.
    pub fn push_connector(&mut self, mut connector: FakeConnector, possible_crtcs: &[u32]) {
        for &mask in possible_crtcs {
            connector.encoders.push(self.encoders.len());
            self.encoders.push(FakeEncoder {
                crtc: None,
                possible_crtcs: mask,
            });
        }
        self.connectors.push(connector);
    }

    /// Lights up `conn` on `crtc`, as if another program left it configured.
    pub fn activate(&mut self, conn: usize, crtc: usize) {
        let connector = &mut self.connectors[conn];
        let enc = connector.encoders[0];
        connector.current_encoder = Some(enc);
        self.encoders[enc].crtc = Some(crtc);
        self.crtcs[crtc] = FakeCrtc {
            framebuffer: Some(Self::framebuffer(999)),
            mode: connector.modes.first().copied(),
        };
    }

    pub fn connector(idx: usize) -> connector::Handle {
        from_u32(100 + idx as u32).unwrap()
    }

    pub fn encoder(idx: usize) -> encoder::Handle {
        from_u32(200 + idx as u32).unwrap()
    }

    pub fn crtc(idx: usize) -> crtc::Handle {
        from_u32(300 + idx as u32).unwrap()
    }

    pub fn framebuffer(n: usize) -> framebuffer::Handle {
        from_u32(1000 + n as u32).unwrap()
    }
}

/// Every mutating request a [`FakeKms`] received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    AddFramebuffer(framebuffer::Handle),
    RemoveFramebuffer(framebuffer::Handle),
    Modeset {
        crtc: crtc::Handle,
        fb: Option<framebuffer::Handle>,
        connectors: Vec<connector::Handle>,
        mode: Option<FakeMode>,
    },
    PageFlip {
        crtc: crtc::Handle,
        fb: framebuffer::Handle,
    },
}

#[derive(Debug, Default)]
struct FakeState {
    topology: Topology,
    calls: Vec<Call>,
    live: Vec<framebuffer::Handle>,
    added: usize,
    pending: Vec<crtc::Handle>,
    sequence: u32,
    fail_resources: bool,
    fail_framebuffers: bool,
    fail_modesets: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeKms(Rc<RefCell<FakeState>>);

impl FakeKms {
    pub fn new(topology: Topology) -> Self {
        FakeKms(Rc::new(RefCell::new(FakeState {
            topology,
            ..Default::default()
        })))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.0.borrow_mut().calls.clear();
    }

    pub fn live_framebuffers(&self) -> Vec<framebuffer::Handle> {
        self.0.borrow().live.clone()
    }

    pub fn pending_flips(&self) -> usize {
        self.0.borrow().pending.len()
    }

    pub fn fail_resources(&self) {
        self.0.borrow_mut().fail_resources = true;
    }

    pub fn fail_framebuffers(&self) {
        self.0.borrow_mut().fail_framebuffers = true;
    }

    pub fn fail_modesets(&self) {
        self.0.borrow_mut().fail_modesets = true;
    }

    /// Completes every queued flip, one vblank apart.
    pub fn complete_flips(&self) -> Vec<LoopEvent> {
        let mut state = self.0.borrow_mut();
        let pending = std::mem::take(&mut state.pending);
        pending
            .into_iter()
            .map(|crtc| {
                state.sequence += 1;
                LoopEvent::FlipComplete {
                    crtc,
                    sequence: state.sequence,
                    time: Duration::from_micros(16_667 * state.sequence as u64),
                }
            })
            .collect()
    }

    fn crtc_index(state: &FakeState, crtc: crtc::Handle) -> io::Result<usize> {
        (0..state.topology.crtcs.len())
            .find(|idx| Topology::crtc(*idx) == crtc)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }
}

impl KmsDevice for FakeKms {
    type Mode = FakeMode;

    fn resources(&self) -> io::Result<ResourceList> {
        let state = self.0.borrow();
        if state.fail_resources {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        Ok(ResourceList {
            connectors: (0..state.topology.connectors.len())
                .map(Topology::connector)
                .collect(),
            crtcs: (0..state.topology.crtcs.len()).map(Topology::crtc).collect(),
        })
    }

    fn connector(&self, conn: connector::Handle) -> io::Result<ConnectorInfo<FakeMode>> {
        let state = self.0.borrow();
        let info = state
            .topology
            .connectors
            .iter()
            .enumerate()
            .find(|(idx, _)| Topology::connector(*idx) == conn)
            .map(|(_, info)| info)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        Ok(ConnectorInfo {
            name: format!("HDMI-A-{}", info.interface_id),
            connected: info.connected,
            modes: info.modes.clone(),
            current_encoder: info.current_encoder.map(Topology::encoder),
            encoders: info.encoders.iter().copied().map(Topology::encoder).collect(),
        })
    }

    fn encoder(&self, enc: encoder::Handle) -> io::Result<EncoderInfo> {
        let state = self.0.borrow();
        let info = state
            .topology
            .encoders
            .iter()
            .enumerate()
            .find(|(idx, _)| Topology::encoder(*idx) == enc)
            .map(|(_, info)| info)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        Ok(EncoderInfo {
            crtc: info.crtc.map(Topology::crtc),
            possible_crtcs: info.possible_crtcs,
        })
    }

    fn crtc(&self, crtc: crtc::Handle) -> io::Result<SavedCrtc<FakeMode>> {
        let state = self.0.borrow();
        let info = &state.topology.crtcs[Self::crtc_index(&state, crtc)?];
        Ok(SavedCrtc {
            crtc,
            framebuffer: info.framebuffer,
            position: (0, 0),
            mode: info.mode,
        })
    }

    fn remove_framebuffer(&self, fb: framebuffer::Handle) -> io::Result<()> {
        let mut state = self.0.borrow_mut();
        state.calls.push(Call::RemoveFramebuffer(fb));
        let Some(pos) = state.live.iter().position(|live| *live == fb) else {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        };
        state.live.remove(pos);
        Ok(())
    }

    fn modeset(
        &self,
        crtc: crtc::Handle,
        fb: Option<framebuffer::Handle>,
        _position: (u32, u32),
        connectors: &[connector::Handle],
        mode: Option<FakeMode>,
    ) -> io::Result<()> {
        let mut state = self.0.borrow_mut();
        state.calls.push(Call::Modeset {
            crtc,
            fb,
            connectors: connectors.to_vec(),
            mode,
        });
        if state.fail_modesets {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        let idx = Self::crtc_index(&state, crtc)?;
        state.topology.crtcs[idx] = FakeCrtc {
            framebuffer: fb,
            mode,
        };
        Ok(())
    }

    fn page_flip(&self, crtc: crtc::Handle, fb: framebuffer::Handle) -> io::Result<()> {
        let mut state = self.0.borrow_mut();
        // the kernel refuses a second flip before the first one completed
        if state.pending.contains(&crtc) {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        state.calls.push(Call::PageFlip { crtc, fb });
        state.pending.push(crtc);
        Ok(())
    }
}

impl ExportFramebuffer<FakeBuffer> for FakeKms {
    fn add_framebuffer(&self, _buffer: &FakeBuffer) -> io::Result<framebuffer::Handle> {
        let mut state = self.0.borrow_mut();
        if state.fail_framebuffers {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        let fb = Topology::framebuffer(state.added);
        state.added += 1;
        state.calls.push(Call::AddFramebuffer(fb));
        state.live.push(fb);
        Ok(fb)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeBuffer {
    pub id: usize,
    pub size: (u32, u32),
}

impl FakeBuffer {
    pub fn new(id: usize, size: (u32, u32)) -> Self {
        FakeBuffer { id, size }
    }
}

/// Hands out numbered buffers and records which buffer each frame went to.
#[derive(Debug, Default)]
pub struct FakeRenderer {
    created: usize,
    rendered: Vec<usize>,
}

impl FakeRenderer {
    pub fn created(&self) -> usize {
        self.created
    }

    pub fn rendered(&self) -> &[usize] {
        &self.rendered
    }
}

impl RenderBackend for FakeRenderer {
    type Buffer = FakeBuffer;

    fn create_buffer(&mut self, width: u32, height: u32) -> Result<FakeBuffer> {
        let buffer = FakeBuffer::new(self.created, (width, height));
        self.created += 1;
        Ok(buffer)
    }

    fn render(&mut self, target: &mut FakeBuffer, _color: [f32; 4]) -> Result<()> {
        self.rendered.push(target.id);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeContent {
    pub frames: usize,
}

impl FrameContent for FakeContent {
    fn frame_color(&mut self) -> [f32; 4] {
        self.frames += 1;
        [0.0, 0.0, 1.0, 1.0]
    }
}

/// Delivers the completions of flips queued on a [`FakeKms`], one batch per dispatch.
#[derive(Debug)]
pub struct FakeEvents {
    kms: FakeKms,
    stop_at: Option<usize>,
    max_dispatches: usize,
    dispatches: usize,
}

impl FakeEvents {
    pub fn new(kms: &FakeKms) -> Self {
        FakeEvents {
            kms: kms.clone(),
            stop_at: None,
            max_dispatches: 100,
            dispatches: 0,
        }
    }

    /// Adds a stop request to the `n`th dispatch, after its flip completions.
    pub fn stop_at(mut self, n: usize) -> Self {
        self.stop_at = Some(n);
        self
    }

    pub fn dispatches(&self) -> usize {
        self.dispatches
    }
}

impl EventSource for FakeEvents {
    fn dispatch(&mut self) -> Result<Vec<LoopEvent>> {
        if self.dispatches >= self.max_dispatches {
            bail!("Event loop did not terminate");
        }
        self.dispatches += 1;

        let mut events = self.kms.complete_flips();
        if self.stop_at == Some(self.dispatches) {
            events.push(LoopEvent::Stop);
        }
        if events.is_empty() {
            bail!("Dispatch would block forever");
        }
        Ok(events)
    }
}
