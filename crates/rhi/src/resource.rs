//! Resource state tracking and transition barriers.
//!
//! Every GPU buffer or image that the command layer may transition records a
//! single [`ResourceState`] for the whole resource. [`transition_resource`]
//! compares that state with the requested one, records at most one barrier
//! and updates the tracked state while the command list is still being
//! recorded. Per-subresource states and split barriers are not modelled.

use ash::vk;

/// Access state a resource is in, from the GPU's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Contents may be discarded (freshly created or re-created images).
    Undefined,
    /// General-purpose state usable by any queue operation.
    Common,
    /// Destination of a copy.
    CopyDest,
    /// Read by shaders or the input assembler.
    GenericRead,
    /// Bound as a color attachment.
    RenderTarget,
    /// Handed to the presentation engine.
    Present,
}

impl ResourceState {
    /// Image layout for this state.
    pub fn image_layout(self) -> vk::ImageLayout {
        match self {
            ResourceState::Undefined => vk::ImageLayout::UNDEFINED,
            ResourceState::Common => vk::ImageLayout::GENERAL,
            ResourceState::CopyDest => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ResourceState::GenericRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    /// Memory accesses performed in this state.
    pub fn access_mask(self) -> vk::AccessFlags {
        match self {
            ResourceState::Undefined | ResourceState::Present => vk::AccessFlags::empty(),
            ResourceState::Common => vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            ResourceState::CopyDest => vk::AccessFlags::TRANSFER_WRITE,
            ResourceState::GenericRead => {
                vk::AccessFlags::SHADER_READ
                    | vk::AccessFlags::UNIFORM_READ
                    | vk::AccessFlags::VERTEX_ATTRIBUTE_READ
            }
            ResourceState::RenderTarget => {
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            }
        }
    }

    /// Pipeline stages that touch the resource in this state.
    pub fn stage_mask(self) -> vk::PipelineStageFlags {
        match self {
            ResourceState::Undefined => vk::PipelineStageFlags::TOP_OF_PIPE,
            ResourceState::Common => vk::PipelineStageFlags::ALL_COMMANDS,
            ResourceState::CopyDest => vk::PipelineStageFlags::TRANSFER,
            ResourceState::GenericRead => {
                vk::PipelineStageFlags::VERTEX_INPUT
                    | vk::PipelineStageFlags::VERTEX_SHADER
                    | vk::PipelineStageFlags::FRAGMENT_SHADER
            }
            ResourceState::RenderTarget => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            ResourceState::Present => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        }
    }
}

/// The native object a barrier applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarrierTarget {
    Buffer(vk::Buffer),
    /// Single-mip, single-layer color image.
    Image(vk::Image),
}

/// A whole-resource state transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionBarrier {
    pub target: BarrierTarget,
    pub before: ResourceState,
    pub after: ResourceState,
}

impl TransitionBarrier {
    /// Record this barrier into `cmd`.
    ///
    /// # Safety
    ///
    /// `cmd` must be in the recording state and outside a rendering scope.
    pub unsafe fn record(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        let src_stage = self.before.stage_mask();
        let dst_stage = self.after.stage_mask();

        match self.target {
            BarrierTarget::Buffer(buffer) => {
                let barrier = vk::BufferMemoryBarrier::default()
                    .src_access_mask(self.before.access_mask())
                    .dst_access_mask(self.after.access_mask())
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(buffer)
                    .offset(0)
                    .size(vk::WHOLE_SIZE);
                unsafe {
                    device.cmd_pipeline_barrier(
                        cmd,
                        src_stage,
                        dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[barrier],
                        &[],
                    );
                }
            }
            BarrierTarget::Image(image) => {
                let barrier = vk::ImageMemoryBarrier::default()
                    .src_access_mask(self.before.access_mask())
                    .dst_access_mask(self.after.access_mask())
                    .old_layout(self.before.image_layout())
                    .new_layout(self.after.image_layout())
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                unsafe {
                    device.cmd_pipeline_barrier(
                        cmd,
                        src_stage,
                        dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier],
                    );
                }
            }
        }
    }
}

/// A GPU object with a tracked state.
pub trait Resource {
    fn current_state(&self) -> ResourceState;

    /// Overwrite the tracked state. Only [`transition_resource`] should call
    /// this, right after recording the matching barrier.
    fn set_state(&mut self, state: ResourceState);

    fn barrier_target(&self) -> BarrierTarget;

    /// Debug name used in log lines.
    fn name(&self) -> &str {
        "resource"
    }
}

/// Sink for transition barriers; implemented by command lists.
pub trait BarrierRecorder {
    fn record_barrier(&mut self, barrier: &TransitionBarrier);
}

/// Collects barriers instead of recording them.
impl BarrierRecorder for Vec<TransitionBarrier> {
    fn record_barrier(&mut self, barrier: &TransitionBarrier) {
        self.push(*barrier);
    }
}

/// Move `resource` into `target`.
///
/// Records one barrier and updates the tracked state when the state differs;
/// does nothing otherwise. Returns whether a barrier was recorded.
pub fn transition_resource<R, T>(recorder: &mut R, resource: &mut T, target: ResourceState) -> bool
where
    R: BarrierRecorder + ?Sized,
    T: Resource + ?Sized,
{
    let before = resource.current_state();
    if before == target {
        return false;
    }

    recorder.record_barrier(&TransitionBarrier {
        target: resource.barrier_target(),
        before,
        after: target,
    });
    resource.set_state(target);
    tracing::trace!("{}: {:?} -> {:?}", resource.name(), before, target);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    struct FakeBuffer {
        state: ResourceState,
    }

    impl Resource for FakeBuffer {
        fn current_state(&self) -> ResourceState {
            self.state
        }

        fn set_state(&mut self, state: ResourceState) {
            self.state = state;
        }

        fn barrier_target(&self) -> BarrierTarget {
            BarrierTarget::Buffer(vk::Buffer::from_raw(0x42))
        }
    }

    #[test]
    fn test_repeated_transition_records_one_barrier() {
        let mut barriers = Vec::new();
        let mut buffer = FakeBuffer {
            state: ResourceState::Common,
        };

        assert!(transition_resource(&mut barriers, &mut buffer, ResourceState::GenericRead));
        assert_eq!(buffer.current_state(), ResourceState::GenericRead);

        assert!(!transition_resource(&mut barriers, &mut buffer, ResourceState::GenericRead));
        assert_eq!(buffer.current_state(), ResourceState::GenericRead);

        assert_eq!(barriers.len(), 1);
        assert_eq!(
            barriers[0],
            TransitionBarrier {
                target: BarrierTarget::Buffer(vk::Buffer::from_raw(0x42)),
                before: ResourceState::Common,
                after: ResourceState::GenericRead,
            }
        );
    }

    #[test]
    fn test_same_state_records_nothing() {
        let mut barriers = Vec::new();
        let mut buffer = FakeBuffer {
            state: ResourceState::CopyDest,
        };
        assert!(!transition_resource(&mut barriers, &mut buffer, ResourceState::CopyDest));
        assert!(barriers.is_empty());
    }

    #[test]
    fn test_round_trip_chains_before_and_after() {
        let mut barriers = Vec::new();
        let mut buffer = FakeBuffer {
            state: ResourceState::GenericRead,
        };

        transition_resource(&mut barriers, &mut buffer, ResourceState::CopyDest);
        transition_resource(&mut barriers, &mut buffer, ResourceState::GenericRead);

        assert_eq!(barriers.len(), 2);
        assert_eq!(barriers[0].after, barriers[1].before);
        assert_eq!(barriers[1].after, ResourceState::GenericRead);
    }

    #[test]
    fn test_present_and_render_target_layouts() {
        assert_eq!(
            ResourceState::Present.image_layout(),
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(
            ResourceState::RenderTarget.image_layout(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert!(ResourceState::Present.access_mask().is_empty());
        assert!(
            ResourceState::CopyDest
                .stage_mask()
                .contains(vk::PipelineStageFlags::TRANSFER)
        );
    }
}
