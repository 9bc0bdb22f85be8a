//! Linear descriptor heap for render-target views.
//!
//! The heap hands out contiguous runs of fixed-size slots and never frees
//! them. Slots are allocated once when the swap chain is created and then
//! rewritten in place whenever the back buffers are rebuilt, so a handle stays
//! valid for the lifetime of the heap.

use std::mem::size_of;

use ash::vk;
use tracing::{debug, error};

use crate::error::{RhiError, RhiResult};

/// Kind of view a heap stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorHeapType {
    RenderTarget,
}

impl DescriptorHeapType {
    /// Byte stride between two consecutive slots.
    pub fn descriptor_stride(self) -> u64 {
        match self {
            DescriptorHeapType::RenderTarget => size_of::<vk::ImageView>() as u64,
        }
    }
}

/// Location of one descriptor slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorHandle {
    index: u32,
    offset: u64,
}

impl DescriptorHandle {
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Byte offset from the start of the heap.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

pub struct DescriptorHeap {
    kind: DescriptorHeapType,
    stride: u64,
    next_free: u32,
    slots: Vec<vk::ImageView>,
}

impl DescriptorHeap {
    pub fn new(kind: DescriptorHeapType, capacity: u32) -> Self {
        debug!("Created {kind:?} descriptor heap with {capacity} slot(s)");
        Self {
            kind,
            stride: kind.descriptor_stride(),
            next_free: 0,
            slots: vec![vk::ImageView::null(); capacity as usize],
        }
    }

    /// Reserve `count` contiguous slots and return the first.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DescriptorHeapExhausted`] if fewer than `count`
    /// slots remain; the heap is unchanged in that case.
    pub fn allocate_handles(&mut self, count: u32) -> RhiResult<DescriptorHandle> {
        let available = self.free_count();
        if count > available {
            error!(
                "{:?} descriptor heap exhausted: requested {count}, available {available}",
                self.kind
            );
            return Err(RhiError::DescriptorHeapExhausted {
                requested: count,
                available,
            });
        }

        let first = self.handle_at(self.next_free);
        self.next_free += count;
        Ok(first)
    }

    /// The handle `step` slots after `base`.
    pub fn offset_handle(&self, base: DescriptorHandle, step: u32) -> DescriptorHandle {
        self.handle_at(base.index + step)
    }

    /// Store a render-target view in an allocated slot.
    pub fn write_render_target_view(
        &mut self,
        handle: DescriptorHandle,
        view: vk::ImageView,
    ) -> RhiResult<()> {
        let slot = self.allocated_slot_mut(handle)?;
        *slot = view;
        Ok(())
    }

    /// The view stored at `handle`, if the slot was allocated and written.
    pub fn render_target_view(&self, handle: DescriptorHandle) -> Option<vk::ImageView> {
        if handle.index >= self.next_free {
            return None;
        }
        self.slots
            .get(handle.index as usize)
            .copied()
            .filter(|view| *view != vk::ImageView::null())
    }

    /// Forget the view stored at `handle` without releasing the slot.
    pub fn clear(&mut self, handle: DescriptorHandle) -> RhiResult<()> {
        let slot = self.allocated_slot_mut(handle)?;
        *slot = vk::ImageView::null();
        Ok(())
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    #[inline]
    pub fn free_count(&self) -> u32 {
        self.capacity() - self.next_free
    }

    #[inline]
    pub fn descriptor_stride(&self) -> u64 {
        self.stride
    }

    #[inline]
    pub fn kind(&self) -> DescriptorHeapType {
        self.kind
    }

    fn handle_at(&self, index: u32) -> DescriptorHandle {
        DescriptorHandle {
            index,
            offset: u64::from(index) * self.stride,
        }
    }

    fn allocated_slot_mut(&mut self, handle: DescriptorHandle) -> RhiResult<&mut vk::ImageView> {
        if handle.index >= self.next_free {
            return Err(RhiError::InvalidHandle(format!(
                "descriptor slot {} was never allocated",
                handle.index
            )));
        }
        self.slots
            .get_mut(handle.index as usize)
            .ok_or_else(|| RhiError::InvalidHandle(format!("descriptor slot {}", handle.index)))
    }
}
