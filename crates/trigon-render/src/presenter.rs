// SPDX-License-Identifier: CEPL-1.0
//! Frame presentation state machine.
//!
//! [`FramePresenter`] drives one acquire → submit → present cycle per call over a
//! ring of frame slots and rebuilds the swapchain generation whenever the surface
//! goes stale. Everything that touches the graphics API sits behind
//! [`PresentBackend`], so the control flow here is independent of it.
//!
//! ```text
//! slot i = frame counter mod K
//!
//!   wait(fence i) ──► acquire(image-available i) ──► reset(fence i)
//!        │                 │ out of date / suboptimal     │
//!        │                 └──► idle + rebuild, drop      ▼
//!        │                                     submit(signals render-finished i
//!        │                                            and fence i)
//!        │                                                │
//!        └──────────────── next call ◄──── present(waits render-finished i)
//!                                            │ out of date / suboptimal
//!                                            └──► idle + rebuild
//! ```
//!
//! The fence is reset only once a usable image is in hand. A stale acquire
//! therefore leaves the fence signaled and the next use of the slot cannot wait
//! on a fence that no submission will ever signal. A suboptimal acquire does
//! signal image-available, so that semaphore is consumed before the frame is
//! dropped.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::RenderSize;

/// Result of a swapchain operation that may ask for a rebuild.
///
/// Fatal conditions travel as `Err(FrameError)`; this type only carries the
/// success and transient cases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapStatus<T> {
    Ready(T),
    /// Usable, but the swapchain no longer matches the surface exactly.
    Suboptimal(T),
    /// Nothing was acquired or presented.
    OutOfDate,
}

impl<T> SwapStatus<T> {
    pub fn needs_rebuild(&self) -> bool {
        !matches!(self, SwapStatus::Ready(_))
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("waiting on the fence of frame slot {slot} failed: {reason}")]
    FenceWait { slot: usize, reason: String },

    #[error("resetting the fence of frame slot {slot} failed: {reason}")]
    FenceReset { slot: usize, reason: String },

    #[error("image acquisition failed: {0}")]
    Acquire(String),

    #[error("queue submission failed: {0}")]
    Submit(String),

    /// The only non-fatal error: the frame is dropped and the loop goes on.
    #[error("presentation failed: {0}")]
    Present(String),

    #[error("device lost")]
    DeviceLost,

    #[error("{framebuffers} framebuffers but {command_buffers} command buffers")]
    CountMismatch {
        framebuffers: usize,
        command_buffers: usize,
    },

    #[error("a presenter needs at least one frame slot")]
    NoFrameSlots,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl FrameError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FrameError::Present(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Acquire found the surface out of date or suboptimal; nothing was rendered.
    StaleOnAcquire,
    /// Present found the surface stale after the work was submitted.
    StaleOnPresent,
    /// Present failed for another reason.
    PresentFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { slot: usize, image: u32 },
    Dropped(DropReason),
    /// The surface has zero area; no GPU work was issued.
    Suspended,
}

/// Graphics-API operations the presenter sequences.
///
/// `slot` is always in `0..frame_slots()`. Implementations own one fence and two
/// semaphores per slot for their whole lifetime, and one swapchain generation
/// that only [`rebuild`](Self::rebuild) replaces.
pub trait PresentBackend {
    fn frame_slots(&self) -> usize;

    /// Blocks until the slot's fence is signaled.
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), FrameError>;
    fn reset_slot(&mut self, slot: usize) -> Result<(), FrameError>;

    /// Acquires the next image, signaling the slot's image-available semaphore.
    fn acquire(&mut self, slot: usize) -> Result<SwapStatus<u32>, FrameError>;

    /// Unsignals the slot's image-available semaphore after an acquire whose
    /// image will not be rendered. Must not touch the slot's fence.
    fn discard_acquire(&mut self, slot: usize) -> Result<(), FrameError>;

    /// Submits the image's recorded commands: waits on image-available, signals
    /// render-finished and the slot's fence.
    fn submit(&mut self, slot: usize, image: u32) -> Result<(), FrameError>;

    /// Presents `image` once the slot's render-finished semaphore is signaled.
    fn present(&mut self, slot: usize, image: u32) -> Result<SwapStatus<()>, FrameError>;

    /// Extent the surface reports right now.
    fn surface_extent(&mut self) -> Result<RenderSize, FrameError>;

    /// Replaces the whole swapchain generation. Called only on an idle device.
    /// Returns the extent the new generation was built with, or a zero-area extent
    /// (leaving the live generation alone) when the surface has no area after all.
    fn rebuild(&mut self, extent: RenderSize) -> Result<RenderSize, FrameError>;

    fn wait_idle(&mut self) -> Result<(), FrameError>;
}

pub struct FramePresenter<B: PresentBackend> {
    backend: B,
    slots: usize,
    frame: u64,
    extent: RenderSize,
    /// Requested rebuild; stays set while the surface has zero area.
    pending: Option<RenderSize>,
    suspended: bool,
    rebuilds: u64,
}

impl<B: PresentBackend> FramePresenter<B> {
    /// Wraps a backend whose first generation was built at `extent`.
    pub fn new(backend: B, extent: RenderSize) -> Result<Self, FrameError> {
        let slots = backend.frame_slots();
        if slots == 0 {
            return Err(FrameError::NoFrameSlots);
        }
        info!(
            "presenter ready: {} frames in flight, {}x{}",
            slots, extent.width, extent.height
        );
        Ok(Self {
            backend,
            slots,
            frame: 0,
            extent,
            pending: None,
            suspended: false,
            rebuilds: 0,
        })
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Extent of the live swapchain generation.
    #[inline]
    pub fn extent(&self) -> RenderSize {
        self.extent
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots
    }

    /// Slot the next call to [`render_one_frame`](Self::render_one_frame) uses.
    #[inline]
    pub fn next_slot(&self) -> usize {
        (self.frame % self.slots as u64) as usize
    }

    #[inline]
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Schedules a rebuild at the top of the next frame.
    pub fn request_rebuild(&mut self, size: RenderSize) {
        debug!("rebuild requested at {}x{}", size.width, size.height);
        self.pending = Some(size);
    }

    pub fn render_one_frame(&mut self) -> Result<FrameOutcome, FrameError> {
        if let Some(requested) = self.pending {
            // A restored window may not announce itself with a resize.
            let target = if requested.is_empty() {
                self.backend.surface_extent()?
            } else {
                requested
            };
            if !self.rebuild(target)? {
                return Ok(FrameOutcome::Suspended);
            }
        }

        let slot = self.next_slot();
        self.frame += 1;

        self.backend.wait_for_slot(slot)?;

        let image = match self.backend.acquire(slot)? {
            SwapStatus::Ready(image) => image,
            SwapStatus::Suboptimal(_) => {
                debug!("frame {}: surface suboptimal at acquire", self.frame);
                self.backend.discard_acquire(slot)?;
                self.rebuild_to_surface()?;
                return Ok(FrameOutcome::Dropped(DropReason::StaleOnAcquire));
            }
            SwapStatus::OutOfDate => {
                debug!("frame {}: surface out of date at acquire", self.frame);
                self.rebuild_to_surface()?;
                return Ok(FrameOutcome::Dropped(DropReason::StaleOnAcquire));
            }
        };

        self.backend.reset_slot(slot)?;
        self.backend.submit(slot, image)?;

        let status = match self.backend.present(slot, image) {
            Ok(status) => status,
            Err(e) if !e.is_fatal() => {
                warn!("frame {}: {e}; frame dropped", self.frame);
                return Ok(FrameOutcome::Dropped(DropReason::PresentFailed));
            }
            Err(e) => return Err(e),
        };
        if !status.needs_rebuild() {
            return Ok(FrameOutcome::Presented { slot, image });
        }

        let outcome = match status {
            SwapStatus::OutOfDate => {
                debug!("frame {}: surface out of date at present", self.frame);
                FrameOutcome::Dropped(DropReason::StaleOnPresent)
            }
            _ => FrameOutcome::Presented { slot, image },
        };
        self.rebuild_to_surface()?;
        Ok(outcome)
    }

    /// Idles the device and releases the backend.
    pub fn shutdown(mut self) -> Result<(), FrameError> {
        self.backend.wait_idle()?;
        info!(
            "presenter shut down after {} frames, {} rebuilds",
            self.frame, self.rebuilds
        );
        Ok(())
    }

    fn rebuild_to_surface(&mut self) -> Result<bool, FrameError> {
        let extent = self.backend.surface_extent()?;
        self.rebuild(extent)
    }

    /// Returns `false` when the surface has zero area; the rebuild then stays
    /// pending and frames are suspended until the surface grows again.
    fn rebuild(&mut self, requested: RenderSize) -> Result<bool, FrameError> {
        if requested.is_empty() {
            return Ok(self.suspend());
        }

        self.backend.wait_idle()?;
        let built = self.backend.rebuild(requested)?;
        if built.is_empty() {
            return Ok(self.suspend());
        }
        if self.suspended {
            info!("surface has area again, resuming");
            self.suspended = false;
        }
        self.pending = None;
        self.extent = built;
        self.rebuilds += 1;
        info!(
            "swapchain rebuilt at {}x{} (rebuild #{})",
            built.width, built.height, self.rebuilds
        );
        Ok(true)
    }

    fn suspend(&mut self) -> bool {
        if !self.suspended {
            info!("surface has zero area, suspending frame submission");
            self.suspended = true;
        }
        // Polled against the surface on every call until it has area again.
        self.pending = Some(RenderSize::new(0, 0));
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_ready_skips_rebuild() {
        assert!(!SwapStatus::Ready(3u32).needs_rebuild());
        assert!(SwapStatus::Suboptimal(3u32).needs_rebuild());
        assert!(SwapStatus::<u32>::OutOfDate.needs_rebuild());
    }

    #[test]
    fn test_only_present_failures_are_recoverable() {
        assert!(!FrameError::Present("surface lost".into()).is_fatal());
        assert!(FrameError::DeviceLost.is_fatal());
        assert!(FrameError::FenceWait {
            slot: 0,
            reason: "timeout".into()
        }
        .is_fatal());
        assert!(FrameError::CountMismatch {
            framebuffers: 3,
            command_buffers: 2
        }
        .is_fatal());
        assert!(FrameError::from(anyhow::anyhow!("create_swapchain")).is_fatal());
    }

    #[test]
    fn test_count_mismatch_message_names_both_counts() {
        let msg = FrameError::CountMismatch {
            framebuffers: 3,
            command_buffers: 2,
        }
        .to_string();
        assert_eq!(msg, "3 framebuffers but 2 command buffers");
    }
}
