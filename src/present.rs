use bevy::prelude::debug;

use crate::config::PresentSource;
use crate::driver::SimulationDriver;
use crate::error::SlimeError;
use crate::host::{ComputeHost, TextureHandle};
use crate::lifecycle::SlimeResources;

/// Copies the latest completed field into the display surface, once per
/// render frame. Never writes a field the next tick reads.
#[derive(Debug, Clone)]
pub struct PresentationBridge {
    source: PresentSource,
    presented: u64,
    skipped: u64,
}

impl PresentationBridge {
    pub fn new(source: PresentSource) -> Self {
        Self {
            source,
            presented: 0,
            skipped: 0,
        }
    }

    pub fn source(&self) -> PresentSource {
        self.source
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented
    }

    pub fn skipped_frames(&self) -> u64 {
        self.skipped
    }

    /// Returns `Ok(false)` without touching the host while the driver is
    /// halted, so the display keeps the last good frame.
    pub fn present<H: ComputeHost>(
        &mut self,
        host: &mut H,
        resources: &SlimeResources,
        driver: &SimulationDriver,
    ) -> Result<bool, SlimeError> {
        if driver.is_halted() {
            self.skipped += 1;
            debug!("slime driver halted, display frozen");
            return Ok(false);
        }

        let source = match self.source {
            PresentSource::Trail => resources.trail()?,
            PresentSource::Diffused => resources.diffused()?,
        };
        let display = resources.display()?;

        let submitted = host
            .copy_texture(source, display)
            .and_then(|()| host.submit());
        if let Err(source) = submitted {
            host.abandon();
            return Err(SlimeError::Dispatch {
                stage: None,
                source,
            });
        }

        self.presented += 1;
        Ok(true)
    }

    /// Non-owning handle of the display surface.
    pub fn display(&self, resources: &SlimeResources) -> Result<TextureHandle, SlimeError> {
        resources.display()
    }
}
