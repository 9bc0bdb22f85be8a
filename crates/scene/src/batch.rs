//! Per-frame draw batches ordered by packed sort keys.
//!
//! A [`RenderingKey`] packs `{pass:4, material:32, object:28}` into a `u64`
//! with the pass in the most significant bits:
//!
//! ```text
//!  63    60 59                              28 27                      0
//! +--------+----------------------------------+-------------------------+
//! |  pass  |           material id            |      object index       |
//! +--------+----------------------------------+-------------------------+
//! ```
//!
//! Plain integer ordering therefore sorts by pass, then material, then the
//! order objects were pushed in. Walking the keys in ascending order and
//! rebinding the pipeline only when the material changes keeps pipeline
//! switches to one per material per pass.

use std::collections::BTreeSet;

use tessera_resources::MaterialId;

use crate::error::{SceneError, SceneResult};

const OBJECT_BITS: u32 = 28;
const MATERIAL_BITS: u32 = 32;
const PASS_BITS: u32 = 4;

const OBJECT_SHIFT: u32 = 0;
const MATERIAL_SHIFT: u32 = OBJECT_SHIFT + OBJECT_BITS;
const PASS_SHIFT: u32 = MATERIAL_SHIFT + MATERIAL_BITS;

const OBJECT_MASK: u64 = (1 << OBJECT_BITS) - 1;
const MATERIAL_MASK: u64 = (1 << MATERIAL_BITS) - 1;
const PASS_MASK: u64 = (1 << PASS_BITS) - 1;

/// Largest object index a key can hold.
pub const MAX_OBJECT_INDEX: u32 = OBJECT_MASK as u32;

/// Render pass a draw belongs to; only forward opaque rendering exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum RenderPass {
    #[default]
    Opaque = 0,
}

impl RenderPass {
    fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            0 => Some(RenderPass::Opaque),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderingKey(u64);

impl RenderingKey {
    /// # Errors
    ///
    /// [`SceneError::ObjectIndexOverflow`] if `object_index` exceeds
    /// [`MAX_OBJECT_INDEX`].
    pub fn new(pass: RenderPass, material: MaterialId, object_index: usize) -> SceneResult<Self> {
        if object_index > MAX_OBJECT_INDEX as usize {
            return Err(SceneError::ObjectIndexOverflow {
                index: object_index,
                max: MAX_OBJECT_INDEX,
            });
        }

        let packed = ((pass as u64 & PASS_MASK) << PASS_SHIFT)
            | ((u64::from(material.value()) & MATERIAL_MASK) << MATERIAL_SHIFT)
            | ((object_index as u64 & OBJECT_MASK) << OBJECT_SHIFT);
        Ok(Self(packed))
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// `None` for pass bits no [`RenderPass`] uses.
    pub fn pass(self) -> Option<RenderPass> {
        RenderPass::from_bits((self.0 >> PASS_SHIFT) & PASS_MASK)
    }

    pub fn material(self) -> MaterialId {
        MaterialId::new(((self.0 >> MATERIAL_SHIFT) & MATERIAL_MASK) as u32)
    }

    pub fn object_index(self) -> usize {
        ((self.0 >> OBJECT_SHIFT) & OBJECT_MASK) as usize
    }
}

/// One step of walking a batch in key order.
#[derive(Debug, PartialEq)]
pub enum BatchStep<'a, T> {
    /// The following draws use a different material than the previous ones.
    SwitchMaterial(MaterialId),
    Draw(RenderingKey, &'a T),
}

/// Sorted key set plus the parallel object list it indexes.
///
/// Rebuilt from scratch every frame: [`RenderBatch::clear`], push every
/// visible object, then [`RenderBatch::walk`].
pub struct RenderBatch<T> {
    keys: BTreeSet<RenderingKey>,
    objects: Vec<T>,
}

impl<T> RenderBatch<T> {
    pub fn new() -> Self {
        Self {
            keys: BTreeSet::new(),
            objects: Vec::new(),
        }
    }

    /// Forget last frame's keys and objects.
    pub fn clear(&mut self) {
        self.keys.clear();
        self.objects.clear();
    }

    /// Add `object`; its index is its position in push order.
    pub fn push(&mut self, pass: RenderPass, material: MaterialId, object: T) -> SceneResult<RenderingKey> {
        let key = RenderingKey::new(pass, material, self.objects.len())?;
        self.keys.insert(key);
        self.objects.push(object);
        Ok(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = RenderingKey> + '_ {
        self.keys.iter().copied()
    }

    pub fn object(&self, key: RenderingKey) -> Option<&T> {
        self.objects.get(key.object_index())
    }

    /// Walk the batch in key order, announcing each material change before
    /// the draws that use it. Returns the number of material switches.
    pub fn walk<F, E>(&self, mut step: F) -> Result<usize, E>
    where
        F: FnMut(BatchStep<'_, T>) -> Result<(), E>,
    {
        let mut current: Option<MaterialId> = None;
        let mut switches = 0;

        for key in self.keys() {
            let Some(object) = self.objects.get(key.object_index()) else {
                continue;
            };
            let material = key.material();
            if current != Some(material) {
                step(BatchStep::SwitchMaterial(material))?;
                current = Some(material);
                switches += 1;
            }
            step(BatchStep::Draw(key, object))?;
        }
        Ok(switches)
    }
}

impl<T> Default for RenderBatch<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material(id: u32) -> MaterialId {
        MaterialId::new(id)
    }

    #[test]
    fn test_fields_unpack() {
        let key = RenderingKey::new(RenderPass::Opaque, material(0xDEAD_BEEF), 0x0ABC_DEF).unwrap();
        assert_eq!(key.pass(), Some(RenderPass::Opaque));
        assert_eq!(key.material(), material(0xDEAD_BEEF));
        assert_eq!(key.object_index(), 0x0ABC_DEF);
        assert_eq!(key.raw() >> 60, 0);
    }

    #[test]
    fn test_material_outranks_object_index() {
        let low_material = RenderingKey::new(RenderPass::Opaque, material(3), MAX_OBJECT_INDEX as usize).unwrap();
        let high_material = RenderingKey::new(RenderPass::Opaque, material(4), 0).unwrap();
        assert!(low_material < high_material);
    }

    #[test]
    fn test_pass_outranks_material() {
        let opaque = RenderingKey::new(RenderPass::Opaque, material(u32::MAX), 0).unwrap();
        let later_pass = RenderingKey::from_raw(1 << 60);
        assert!(opaque < later_pass);
        assert_eq!(later_pass.pass(), None);
    }

    #[test]
    fn test_object_index_overflow() {
        let max = MAX_OBJECT_INDEX as usize;
        assert!(RenderingKey::new(RenderPass::Opaque, material(1), max).is_ok());
        assert!(matches!(
            RenderingKey::new(RenderPass::Opaque, material(1), max + 1),
            Err(SceneError::ObjectIndexOverflow { .. })
        ));
    }

    #[test]
    fn test_sorted_by_material_then_insertion() {
        let mut batch = RenderBatch::new();
        for (label, id) in [("first 5", 5), ("second 5", 5), ("only 3", 3), ("only 9", 9)] {
            batch.push(RenderPass::Opaque, material(id), label).unwrap();
        }

        let order: Vec<(u32, &str)> = batch
            .keys()
            .map(|key| (key.material().value(), *batch.object(key).unwrap()))
            .collect();
        assert_eq!(
            order,
            vec![(3, "only 3"), (5, "first 5"), (5, "second 5"), (9, "only 9")]
        );
    }

    #[test]
    fn test_walk_switches_once_per_material() {
        let mut batch = RenderBatch::new();
        for (i, id) in [5, 5, 3, 9, 3, 5].into_iter().enumerate() {
            batch.push(RenderPass::Opaque, material(id), i).unwrap();
        }

        let mut steps = Vec::new();
        let switches = batch
            .walk(|step| {
                steps.push(match step {
                    BatchStep::SwitchMaterial(m) => format!("bind {}", m.value()),
                    BatchStep::Draw(_, object) => format!("draw {object}"),
                });
                Ok::<_, ()>(())
            })
            .unwrap();

        assert_eq!(switches, 3);
        assert_eq!(
            steps,
            vec![
                "bind 3", "draw 2", "draw 4", "bind 5", "draw 0", "draw 1", "draw 5", "bind 9",
                "draw 3",
            ]
        );
    }

    #[test]
    fn test_clear_rebuilds_indices() {
        let mut batch = RenderBatch::new();
        batch.push(RenderPass::Opaque, material(7), 'a').unwrap();
        batch.push(RenderPass::Opaque, material(7), 'b').unwrap();
        batch.clear();
        assert!(batch.is_empty());

        let key = batch.push(RenderPass::Opaque, material(7), 'c').unwrap();
        assert_eq!(key.object_index(), 0);
        assert_eq!(batch.keys().count(), 1);
    }

    #[test]
    fn test_walk_stops_on_error() {
        let mut batch = RenderBatch::new();
        batch.push(RenderPass::Opaque, material(1), 0).unwrap();
        batch.push(RenderPass::Opaque, material(2), 1).unwrap();

        let mut draws = 0;
        let result = batch.walk(|step| match step {
            BatchStep::Draw(..) => {
                draws += 1;
                Err("draw failed")
            }
            BatchStep::SwitchMaterial(_) => Ok(()),
        });
        assert_eq!(result, Err("draw failed"));
        assert_eq!(draws, 1);
    }
}
