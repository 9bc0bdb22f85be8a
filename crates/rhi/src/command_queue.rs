//! Direct command queue and its fence.
//!
//! The fence is a monotonically increasing 64-bit counter. Each submission
//! signals the next value; a value is reached once the GPU-side counter is at
//! least that value. The counter logic lives in [`FenceTimeline`], which is
//! generic over the native primitive so it can be exercised without a GPU.
//! On Vulkan the primitive is a timeline semaphore ([`TimelineFence`]).

use std::sync::{Arc, Mutex};

use ash::vk;
use tracing::{debug, error, trace};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Native operations behind a fence.
pub trait FenceBackend {
    /// Have the GPU set the counter to `value` once preceding work completes.
    fn signal(&self, value: u64) -> RhiResult<()>;

    /// Value the GPU has reached so far.
    fn completed_value(&self) -> RhiResult<u64>;

    /// Block the calling thread until the counter is at least `value`.
    fn block_until(&self, value: u64) -> RhiResult<()>;
}

/// Fence value bookkeeping on top of a [`FenceBackend`].
///
/// Signalling and value assignment happen under one lock so that concurrent
/// submitters never observe or signal the same value twice. Waiting takes a
/// second lock; it is independent from signalling so a blocked waiter never
/// stalls submission.
pub struct FenceTimeline<B> {
    backend: B,
    initial_value: u64,
    next_value: Mutex<u64>,
    wait_lock: Mutex<()>,
}

impl<B: FenceBackend> FenceTimeline<B> {
    /// `initial_value` is the first value [`signal_next`](Self::signal_next)
    /// hands out.
    pub fn new(backend: B, initial_value: u64) -> Self {
        Self {
            backend,
            initial_value,
            next_value: Mutex::new(initial_value),
            wait_lock: Mutex::new(()),
        }
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn initial_value(&self) -> u64 {
        self.initial_value
    }

    /// Signal the next value and return it.
    pub fn signal_next(&self) -> RhiResult<u64> {
        self.signal_with(|backend, value| backend.signal(value))
    }

    /// Run `submit` with the value to signal, under the signal lock.
    ///
    /// The counter only advances when `submit` succeeds, so a failed
    /// submission can be retried with the same value.
    pub fn signal_with<F>(&self, submit: F) -> RhiResult<u64>
    where
        F: FnOnce(&B, u64) -> RhiResult<()>,
    {
        let mut next = self
            .next_value
            .lock()
            .map_err(|_| RhiError::LockPoisoned("fence value"))?;
        let value = *next;
        submit(&self.backend, value)?;
        *next = value + 1;
        Ok(value)
    }

    /// Most recently signaled value, or `None` before the first signal.
    pub fn last_signaled(&self) -> RhiResult<Option<u64>> {
        let next = self
            .next_value
            .lock()
            .map_err(|_| RhiError::LockPoisoned("fence value"))?;
        Ok((*next > self.initial_value).then(|| *next - 1))
    }

    pub fn completed_value(&self) -> RhiResult<u64> {
        self.backend.completed_value()
    }

    /// Whether `value` has been reached.
    pub fn is_complete(&self, value: u64) -> RhiResult<bool> {
        Ok(self.backend.completed_value()? >= value)
    }

    /// Block until `value` is reached. Returns immediately if it already is.
    pub fn wait_for_value(&self, value: u64) -> RhiResult<()> {
        if self.backend.completed_value()? >= value {
            return Ok(());
        }

        let _guard = self
            .wait_lock
            .lock()
            .map_err(|_| RhiError::LockPoisoned("fence wait"))?;
        if self.backend.completed_value()? < value {
            trace!("Waiting for fence value {value}");
            self.backend.block_until(value)?;
        }
        Ok(())
    }

    /// Signal a new value and wait for it, draining all prior work.
    pub fn wait_for_idle(&self) -> RhiResult<u64> {
        let value = self.signal_next()?;
        self.wait_for_value(value)?;
        Ok(value)
    }
}

/// Timeline semaphore signaled from the direct queue.
pub struct TimelineFence {
    device: Arc<Device>,
    queue: vk::Queue,
    semaphore: vk::Semaphore,
}

impl TimelineFence {
    /// Create a semaphore whose counter starts just below `first_value`.
    fn new(device: Arc<Device>, queue: vk::Queue, first_value: u64) -> RhiResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(first_value - 1);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        Ok(Self {
            device,
            queue,
            semaphore,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Submit `command_buffers` and signal `value` when they finish.
    fn submit(&self, command_buffers: &[vk::CommandBuffer], value: u64) -> RhiResult<()> {
        let signal_values = [value];
        let signal_semaphores = [self.semaphore];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            self.device
                .handle()
                .queue_submit(self.queue, &[submit_info], vk::Fence::null())?;
        }
        Ok(())
    }
}

impl FenceBackend for TimelineFence {
    fn signal(&self, value: u64) -> RhiResult<()> {
        self.submit(&[], value)
    }

    fn completed_value(&self) -> RhiResult<u64> {
        let value = unsafe {
            self.device
                .handle()
                .get_semaphore_counter_value(self.semaphore)?
        };
        Ok(value)
    }

    fn block_until(&self, value: u64) -> RhiResult<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.device.handle().wait_semaphores(&wait_info, u64::MAX)? };
        Ok(())
    }
}

impl Drop for TimelineFence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// The direct queue plus its fence.
pub struct CommandQueue {
    device: Arc<Device>,
    queue: vk::Queue,
    family_index: u32,
    fence: FenceTimeline<TimelineFence>,
}

impl CommandQueue {
    /// Wrap the device's direct queue. The first signaled fence value is
    /// `initial_fence_value`, which must be at least 1.
    pub fn new(device: Arc<Device>, initial_fence_value: u64) -> RhiResult<Self> {
        if initial_fence_value == 0 {
            return Err(RhiError::InvalidArgument(
                "initial fence value must be at least 1".to_string(),
            ));
        }

        let family_index = device
            .queue_families()
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let queue = device.graphics_queue();
        let backend = TimelineFence::new(Arc::clone(&device), queue, initial_fence_value)?;

        debug!("Command queue created (family {family_index}, first fence value {initial_fence_value})");

        Ok(Self {
            device,
            queue,
            family_index,
            fence: FenceTimeline::new(backend, initial_fence_value),
        })
    }

    /// Close `cmd`, submit it and signal the next fence value.
    ///
    /// Returns the value that is reached once `cmd` has executed. On failure
    /// the submission is lost; the queue stays usable.
    pub fn execute(&self, cmd: vk::CommandBuffer) -> RhiResult<u64> {
        if cmd == vk::CommandBuffer::null() {
            error!("Refusing to execute a null command buffer");
            return Err(RhiError::InvalidHandle("command buffer".to_string()));
        }

        unsafe { self.device.handle().end_command_buffer(cmd) }.map_err(|e| {
            error!("Failed to close command list: {e}");
            RhiError::from(e)
        })?;

        self.fence
            .signal_with(|fence, value| fence.submit(&[cmd], value))
            .inspect_err(|e| error!("Command list submission failed: {e}"))
    }

    /// Block until `value` has been reached.
    pub fn wait_for_fence_value(&self, value: u64) -> RhiResult<()> {
        self.fence
            .wait_for_value(value)
            .inspect_err(|e| error!("Wait for fence value {value} failed: {e}"))
    }

    /// Block until all work submitted so far has completed.
    pub fn wait_for_idle(&self) -> RhiResult<u64> {
        self.fence
            .wait_for_idle()
            .inspect_err(|e| error!("Wait for queue idle failed: {e}"))
    }

    pub fn completed_fence_value(&self) -> RhiResult<u64> {
        self.fence.completed_value()
    }

    pub fn last_signaled_value(&self) -> RhiResult<Option<u64>> {
        self.fence.last_signaled()
    }

    #[inline]
    pub fn handle(&self) -> vk::Queue {
        self.queue
    }

    #[inline]
    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        if let Err(e) = self.fence.wait_for_idle() {
            error!("Failed to drain command queue during drop: {e}");
        }
        debug!("Command queue destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::thread;

    /// GPU stand-in: signals are queued, `block_until` lets the "GPU" catch up.
    #[derive(Default)]
    struct MockFence {
        signaled: AtomicU64,
        completed: AtomicU64,
        blocks: AtomicUsize,
        fail_next_signal: AtomicBool,
    }

    impl FenceBackend for MockFence {
        fn signal(&self, value: u64) -> RhiResult<()> {
            if self.fail_next_signal.swap(false, Ordering::SeqCst) {
                return Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST));
            }
            self.signaled.fetch_max(value, Ordering::SeqCst);
            Ok(())
        }

        fn completed_value(&self) -> RhiResult<u64> {
            Ok(self.completed.load(Ordering::SeqCst))
        }

        fn block_until(&self, value: u64) -> RhiResult<()> {
            self.blocks.fetch_add(1, Ordering::SeqCst);
            assert!(
                self.signaled.load(Ordering::SeqCst) >= value,
                "waiting on a value that was never signaled"
            );
            self.completed.fetch_max(value, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_values_start_at_initial_and_increase() {
        let timeline = FenceTimeline::new(MockFence::default(), 5);
        assert_eq!(timeline.last_signaled().unwrap(), None);

        let values: Vec<u64> = (0..4).map(|_| timeline.signal_next().unwrap()).collect();
        assert_eq!(values, vec![5, 6, 7, 8]);
        assert_eq!(timeline.last_signaled().unwrap(), Some(8));
    }

    #[test]
    fn test_wait_returns_only_after_completion() {
        let timeline = FenceTimeline::new(MockFence::default(), 1);
        let value = timeline.signal_next().unwrap();
        assert!(!timeline.is_complete(value).unwrap());

        timeline.wait_for_value(value).unwrap();
        assert!(timeline.completed_value().unwrap() >= value);
        assert_eq!(timeline.backend().blocks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_on_reached_value_does_not_block() {
        let timeline = FenceTimeline::new(MockFence::default(), 1);
        let value = timeline.wait_for_idle().unwrap();
        let blocks = timeline.backend().blocks.load(Ordering::SeqCst);

        timeline.wait_for_value(value).unwrap();
        timeline.wait_for_value(value - 1).unwrap();
        assert_eq!(timeline.backend().blocks.load(Ordering::SeqCst), blocks);
    }

    #[test]
    fn test_wait_for_idle_drains_everything() {
        let timeline = FenceTimeline::new(MockFence::default(), 1);
        for _ in 0..3 {
            timeline.signal_next().unwrap();
        }
        let idle = timeline.wait_for_idle().unwrap();
        assert_eq!(idle, 4);
        assert_eq!(timeline.completed_value().unwrap(), 4);
    }

    #[test]
    fn test_failed_signal_keeps_value_and_timeline_usable() {
        let timeline = FenceTimeline::new(MockFence::default(), 10);
        timeline
            .backend()
            .fail_next_signal
            .store(true, Ordering::SeqCst);

        assert!(timeline.signal_next().is_err());
        assert_eq!(timeline.last_signaled().unwrap(), None);
        assert_eq!(timeline.signal_next().unwrap(), 10);
    }

    #[test]
    fn test_concurrent_signals_are_unique_and_contiguous() {
        const THREADS: u64 = 8;
        const PER_THREAD: u64 = 250;

        let timeline = Arc::new(FenceTimeline::new(MockFence::default(), 1));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let timeline = Arc::clone(&timeline);
                thread::spawn(move || {
                    let mut values = Vec::with_capacity(PER_THREAD as usize);
                    for _ in 0..PER_THREAD {
                        let value = timeline.signal_next().unwrap();
                        if let Some(previous) = values.last() {
                            assert!(value > *previous);
                        }
                        values.push(value);
                    }
                    values
                })
            })
            .collect();

        let all: Vec<u64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        let unique: HashSet<u64> = all.iter().copied().collect();

        assert_eq!(unique.len() as u64, THREADS * PER_THREAD);
        assert_eq!(*unique.iter().min().unwrap(), 1);
        assert_eq!(*unique.iter().max().unwrap(), THREADS * PER_THREAD);
    }
}
