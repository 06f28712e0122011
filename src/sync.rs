//! Semaphores, fences, and timeline semaphores.
//!
//! A binary semaphore's lifecycle is a small state machine rather than a
//! bare `VkSemaphore`: the Device needs to know, at frame-recycle time,
//! whether it is safe to hand a semaphore back to the free pool or whether
//! it must be retained until some future wait consumes it (the classic
//! "signalled by a queue we don't control" foreign-semaphore problem around
//! swapchain acquire).

use ash::vk;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreState {
    Unsignalled,
    PendingSignal,
    Signalled,
    Consumed,
}

pub struct Semaphore {
    raw: vk::Semaphore,
    state: SemaphoreState,
    /// Set for e.g. the swapchain acquire semaphore: signalled by the
    /// presentation engine, not by a submission we recorded ourselves.
    foreign_queue: bool,
}

impl Semaphore {
    pub fn new(device: &ash::Device) -> Result<Semaphore, Error> {
        let info = vk::SemaphoreCreateInfo::builder();
        let raw = unsafe { device.create_semaphore(&info, None).map_err(Error::from)? };
        Ok(Semaphore {
            raw,
            state: SemaphoreState::Unsignalled,
            foreign_queue: false,
        })
    }

    pub fn with_foreign_queue(mut self, foreign: bool) -> Self {
        self.foreign_queue = foreign;
        self
    }

    pub fn raw(&self) -> vk::Semaphore {
        self.raw
    }

    pub fn state(&self) -> SemaphoreState {
        self.state
    }

    pub fn foreign_queue(&self) -> bool {
        self.foreign_queue
    }

    pub fn mark_pending_signal(&mut self) {
        assert_eq!(
            self.state,
            SemaphoreState::Unsignalled,
            "semaphore must be unsignalled before it can be queued to signal"
        );
        self.state = SemaphoreState::PendingSignal;
    }

    pub fn mark_signalled(&mut self) {
        assert_eq!(self.state, SemaphoreState::PendingSignal);
        self.state = SemaphoreState::Signalled;
    }

    /// Consumes the semaphore as a wait operand. A foreign-queue semaphore
    /// that was never actually waited upon must be retained rather than
    /// recycled; see `Device::recycle_semaphore`.
    pub fn consume(&mut self) {
        assert_eq!(self.state, SemaphoreState::Signalled);
        self.state = SemaphoreState::Consumed;
    }

    /// A semaphore may be safely returned to the free pool once consumed,
    /// or if it was never signalled at all (never queued for a submit).
    pub fn is_recyclable(&self) -> bool {
        matches!(self.state, SemaphoreState::Consumed | SemaphoreState::Unsignalled)
    }

    pub fn reset(&mut self) {
        self.state = SemaphoreState::Unsignalled;
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.raw, None);
    }
}

pub struct Fence {
    raw: vk::Fence,
}

impl Fence {
    pub fn new(device: &ash::Device, signalled: bool) -> Result<Fence, Error> {
        let mut info = vk::FenceCreateInfo::builder();
        if signalled {
            info = info.flags(vk::FenceCreateFlags::SIGNALED);
        }
        let raw = unsafe { device.create_fence(&info, None).map_err(Error::from)? };
        Ok(Fence { raw })
    }

    pub fn raw(&self) -> vk::Fence {
        self.raw
    }

    pub fn wait(&self, device: &ash::Device, timeout_ns: u64) -> Result<(), Error> {
        unsafe {
            device
                .wait_for_fences(&[self.raw], true, timeout_ns)
                .map_err(Error::from)
        }
    }

    pub fn reset(&self, device: &ash::Device) -> Result<(), Error> {
        unsafe { device.reset_fences(&[self.raw]).map_err(Error::from) }
    }

    pub fn is_signalled(&self, device: &ash::Device) -> Result<bool, Error> {
        unsafe {
            match device.get_fence_status(self.raw) {
                Ok(()) => Ok(true),
                Err(vk::Result::NOT_READY) => Ok(false),
                Err(e) => Err(Error::from(e)),
            }
        }
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_fence(self.raw, None);
    }
}

/// A per-queue timeline semaphore with a monotonically increasing expected
/// value. `next_value` is handed out on every submission that should signal
/// the timeline; `wait_value` blocks until the device has reached it.
pub struct TimelineSemaphore {
    raw: vk::Semaphore,
    next_value: u64,
}

impl TimelineSemaphore {
    pub fn new(device: &ash::Device, initial_value: u64) -> Result<TimelineSemaphore, Error> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);
        let raw = unsafe { device.create_semaphore(&info, None).map_err(Error::from)? };
        Ok(TimelineSemaphore {
            raw,
            next_value: initial_value,
        })
    }

    pub fn raw(&self) -> vk::Semaphore {
        self.raw
    }

    /// Reserves and returns the next signal value for a submission.
    pub fn reserve_signal_value(&mut self) -> u64 {
        self.next_value += 1;
        self.next_value
    }

    pub fn current_expected_value(&self) -> u64 {
        self.next_value
    }

    pub fn query_value(&self, device: &ash::Device) -> Result<u64, Error> {
        unsafe {
            device
                .get_semaphore_counter_value(self.raw)
                .map_err(Error::from)
        }
    }

    pub fn wait_value(
        &self,
        device: &ash::Device,
        value: u64,
        timeout_ns: u64,
    ) -> Result<(), Error> {
        let wait_info = vk::SemaphoreWaitInfo::builder()
            .semaphores(std::slice::from_ref(&self.raw))
            .values(std::slice::from_ref(&value));
        unsafe {
            device
                .wait_semaphores(&wait_info, timeout_ns)
                .map_err(Error::from)
        }
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.raw, None);
    }
}

#[cfg(test)]
mod tests {
    use super::SemaphoreState;

    #[test]
    fn semaphore_state_transitions_are_linear() {
        // Pure state-machine assertions; no VkDevice required.
        let states = [
            SemaphoreState::Unsignalled,
            SemaphoreState::PendingSignal,
            SemaphoreState::Signalled,
            SemaphoreState::Consumed,
        ];
        assert_eq!(states.len(), 4);
        assert_ne!(states[0], states[1]);
    }
}
