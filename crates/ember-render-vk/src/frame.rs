// SPDX-License-Identifier: CEPL-1.0
//! Frames in flight.
//!
//! Each slot cycles Idle -> Acquiring -> Submitted -> Presented. The ring never
//! lets a slot enter Acquiring before its fence reports that the GPU finished
//! the slot's previous submission. The fence is generic so the protocol can be
//! exercised against simulated GPUs.

use ash::vk;
use ember_render::RenderSize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// CPU-observable completion signal of one slot.
pub trait SlotFence {
    /// Blocks until the slot's last submission completed.
    fn wait(&self) -> RenderResult<()>;
    /// Unsignals the fence so the next submission can arm it.
    fn reset(&self) -> RenderResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotPhase {
    Idle,
    Acquiring,
    Submitted,
    Presented,
}

pub struct FrameRing<S> {
    slots: Vec<S>,
    phases: Vec<SlotPhase>,
    current: usize,
    // Slot that last submitted work for each swapchain image.
    image_owner: Vec<Option<usize>>,
}

impl<S: SlotFence> FrameRing<S> {
    pub fn new(slots: Vec<S>) -> Self {
        assert!(!slots.is_empty(), "frame ring needs at least one slot");
        let phases = vec![SlotPhase::Idle; slots.len()];
        Self {
            slots,
            phases,
            current: 0,
            image_owner: Vec::new(),
        }
    }

    #[inline]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn current(&self) -> &S {
        &self.slots[self.current]
    }

    pub fn phase(&self, slot: usize) -> SlotPhase {
        self.phases[slot]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Idle -> Acquiring. Blocks on the slot's fence.
    pub fn begin(&mut self) -> RenderResult<usize> {
        self.slots[self.current].wait()?;
        self.phases[self.current] = SlotPhase::Acquiring;
        Ok(self.current)
    }

    /// Takes ownership of `image` for the current slot, first waiting for the
    /// other slot that last rendered into it.
    pub fn claim_image(&mut self, image: usize) -> RenderResult<()> {
        if image >= self.image_owner.len() {
            self.image_owner.resize(image + 1, None);
        }
        if let Some(owner) = self.image_owner[image] {
            if owner != self.current {
                self.slots[owner].wait()?;
            }
        }
        self.image_owner[image] = Some(self.current);
        Ok(())
    }

    /// Unsignals the current fence right before it is handed to a submission.
    pub fn arm(&mut self) -> RenderResult<()> {
        self.slots[self.current].reset()
    }

    pub fn submitted(&mut self) {
        self.phases[self.current] = SlotPhase::Submitted;
    }

    /// Submitted -> Presented, then moves on to the next slot.
    pub fn presented(&mut self) {
        self.phases[self.current] = SlotPhase::Presented;
        self.current = (self.current + 1) % self.slots.len();
    }

    /// Abandons the frame without advancing; the slot's fence is untouched.
    pub fn abort(&mut self) {
        self.phases[self.current] = SlotPhase::Idle;
    }

    /// Swaps in fresh sync objects for the current slot, e.g. after a failed
    /// submission left its fence unsignalled.
    pub fn replace_current(&mut self, slot: S) -> S {
        self.phases[self.current] = SlotPhase::Idle;
        for owner in self.image_owner.iter_mut() {
            if *owner == Some(self.current) {
                *owner = None;
            }
        }
        std::mem::replace(&mut self.slots[self.current], slot)
    }

    /// Forgets image ownership after the swapchain was rebuilt.
    pub fn reset_image_owners(&mut self, image_count: usize) {
        self.image_owner.clear();
        self.image_owner.resize(image_count, None);
    }
}

/// Semaphores and fence of one frame slot.
pub struct FrameSlot {
    ctx: Arc<DeviceContext>,
    pub image_acquired: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSlot {
    pub fn new(ctx: &Arc<DeviceContext>) -> RenderResult<Self> {
        let device = ctx.device();
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let mut slot = Self {
            ctx: Arc::clone(ctx),
            image_acquired: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
        };
        unsafe {
            slot.image_acquired = device.create_semaphore(&sem_ci, None)?;
            slot.render_finished = device.create_semaphore(&sem_ci, None)?;
            slot.in_flight = device.create_fence(&fence_ci, None)?;
        }
        Ok(slot)
    }

    pub fn ring(ctx: &Arc<DeviceContext>) -> RenderResult<FrameRing<FrameSlot>> {
        let slots = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameSlot::new(ctx))
            .collect::<RenderResult<Vec<_>>>()?;
        debug!("vk: {} frame slots created", slots.len());
        Ok(FrameRing::new(slots))
    }
}

impl SlotFence for FrameSlot {
    fn wait(&self) -> RenderResult<()> {
        unsafe {
            self.ctx
                .device()
                .wait_for_fences(std::slice::from_ref(&self.in_flight), true, u64::MAX)?
        };
        Ok(())
    }

    fn reset(&self) -> RenderResult<()> {
        unsafe { self.ctx.device().reset_fences(std::slice::from_ref(&self.in_flight))? };
        Ok(())
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        unsafe {
            let d = self.ctx.device();
            if self.in_flight != vk::Fence::null() {
                d.destroy_fence(self.in_flight, None);
            }
            if self.render_finished != vk::Semaphore::null() {
                d.destroy_semaphore(self.render_finished, None);
            }
            if self.image_acquired != vk::Semaphore::null() {
                d.destroy_semaphore(self.image_acquired, None);
            }
        }
    }
}

/// Tracks whether the presentation chain must be rebuilt and defers the
/// rebuild while the window has no area.
#[derive(Clone, Copy, Debug)]
pub struct ResizeState {
    size: RenderSize,
    pending: bool,
}

impl ResizeState {
    pub fn new(size: RenderSize) -> Self {
        Self { size, pending: false }
    }

    pub fn request(&mut self, size: RenderSize) {
        self.size = size;
        self.pending = true;
    }

    pub fn mark_out_of_date(&mut self) {
        self.pending = true;
    }

    /// The size to rebuild at, once a rebuild is pending and possible.
    pub fn take_ready(&mut self) -> Option<RenderSize> {
        if self.pending && !self.size.is_zero_area() {
            self.pending = false;
            Some(self.size)
        } else {
            None
        }
    }

    pub fn is_paused(&self) -> bool {
        self.size.is_zero_area()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

/// Drops frames whose submission failed and gives up after `limit` in a row.
#[derive(Clone, Copy, Debug)]
pub struct SubmitFailurePolicy {
    limit: u32,
    consecutive: u32,
}

impl SubmitFailurePolicy {
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            consecutive: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn record_failure(&mut self, result: vk::Result) -> RenderResult<()> {
        self.consecutive += 1;
        warn!(
            "vk: queue_submit failed ({result}), frame dropped [{}/{}]",
            self.consecutive, self.limit
        );
        if self.consecutive >= self.limit {
            return Err(RenderError::SubmitFailures {
                consecutive: self.consecutive,
                last: result,
            });
        }
        Ok(())
    }

    /// A submission failed after its image was acquired. That image can
    /// never be presented, so the swapchain is rebuilt to release it before
    /// the next acquire.
    pub fn record_lost_frame(&mut self, result: vk::Result, resize: &mut ResizeState) -> RenderResult<()> {
        resize.mark_out_of_date();
        self.record_failure(result)
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
