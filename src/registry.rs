use crate::ObjectName;
use crate::error::Error;
use crate::platform::FnCrc16;
use crate::region::{LayoutKind, RegionDescriptor};
use alloc::vec::Vec;
use core::fmt::{Debug, Formatter};
#[cfg(feature = "defmt")]
use defmt::warn;

/// The registry index has to fit into the upper half of a [`Handle`].
pub(crate) const MAX_OBJECTS: usize = u16::MAX as usize;

/// Opaque reference to a registered object: the registry index in the upper 16 bits and the
/// integrity tag of the object in the lower 16 bits.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Handle(u32);

impl Handle {
    fn new(index: u16, tag: u16) -> Self {
        Self(((index as u32) << 16) | tag as u32)
    }

    pub const fn into_raw(self) -> u32 {
        self.0
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    fn index(self) -> usize {
        (self.0 >> 16) as usize
    }

    fn tag(self) -> u16 {
        self.0 as u16
    }
}

impl Debug for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("Handle(0x{:0>8x})", self.0))
    }
}

/// Bookkeeping for one registered region.
pub struct ObjectNode {
    name: ObjectName,
    next_id: Option<u32>,
    valid_count: Option<u32>,
    region: RegionDescriptor,
    integrity_tag: u16,
}

impl ObjectNode {
    pub fn name(&self) -> &ObjectName {
        &self.name
    }

    /// The next logical id to be written, `None` until an id was assigned.
    pub fn id(&self) -> Option<u32> {
        self.next_id
    }

    pub fn set_id(&mut self, next_id: Option<u32>) {
        self.next_id = next_id;
    }

    /// Cached number of readable ids. Advisory, see [`ObjectNode::refresh_valid_count`].
    pub fn valid_count(&self) -> Option<u32> {
        self.valid_count
    }

    pub fn set_valid_count(&mut self, valid_count: Option<u32>) {
        self.valid_count = valid_count;
    }

    /// Recomputes the cached valid count from the current id.
    pub fn refresh_valid_count(&mut self) -> Option<u32> {
        self.valid_count = self.region.valid_count(self.next_id);
        self.valid_count
    }

    pub fn struct_type(&self) -> LayoutKind {
        self.region.layout_kind()
    }

    pub fn region(&self) -> &RegionDescriptor {
        &self.region
    }

    /// The tag binds the handle to the identity of the node: its slot in the registry and the
    /// region it tracks.
    fn calculate_tag(crc16: FnCrc16, index: u16, region: &RegionDescriptor) -> u16 {
        let mut result = 0;
        result = crc16(result, &index.to_le_bytes());
        crc16(result, &region.base_address().to_le_bytes())
    }
}

impl Debug for ObjectNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let name = &self.name;
        let next_id = self.next_id;
        let valid_count = self.valid_count;
        let base = self.region.base_address();
        let end = self.region.end_address();
        f.write_fmt(format_args!(
            "ObjectNode {{ name: {name:?}, region: 0x{base:0>8x}..0x{end:0>8x}, next_id: {next_id:?}, valid_count: {valid_count:?} }}"
        ))
    }
}

/// Append only list of registered objects. Objects are never removed, so an index stays valid for
/// the lifetime of the registry.
#[derive(Default)]
pub(crate) struct Registry {
    objects: Vec<ObjectNode>,
}

impl Registry {
    pub(crate) const fn new() -> Self {
        Self {
            objects: Vec::new(),
        }
    }

    /// Adds a region without checking it against the already registered ones, see
    /// [`Registry::overlaps`].
    pub(crate) fn register(
        &mut self,
        region: RegionDescriptor,
        name: &str,
        crc16: FnCrc16,
    ) -> Result<Handle, Error> {
        region.validate()?;

        let index = self.objects.len();
        if index >= MAX_OBJECTS {
            return Err(Error::RegistryFull);
        }
        self.objects
            .try_reserve(1)
            .map_err(|_| Error::OutOfMemory)?;

        let index = index as u16;
        let integrity_tag = ObjectNode::calculate_tag(crc16, index, &region);
        self.objects.push(ObjectNode {
            name: ObjectName::from_str(name),
            next_id: None,
            valid_count: None,
            region,
            integrity_tag,
        });

        Ok(Handle::new(index, integrity_tag))
    }

    pub(crate) fn resolve(&self, handle: Handle) -> Option<&ObjectNode> {
        match self.objects.get(handle.index()) {
            Some(object) if object.integrity_tag == handle.tag() => Some(object),
            _ => {
                #[cfg(feature = "defmt")]
                warn!("resolve: rejected handle {:#010x}", handle.0);
                None
            }
        }
    }

    pub(crate) fn resolve_mut(&mut self, handle: Handle) -> Option<&mut ObjectNode> {
        match self.objects.get_mut(handle.index()) {
            Some(object) if object.integrity_tag == handle.tag() => Some(object),
            _ => {
                #[cfg(feature = "defmt")]
                warn!("resolve: rejected handle {:#010x}", handle.0);
                None
            }
        }
    }

    /// `true` if `region` shares at least one byte with any registered region.
    pub(crate) fn overlaps(&self, region: &RegionDescriptor) -> bool {
        self.objects
            .iter()
            .any(|object| object.region.overlaps(region))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (Handle, &ObjectNode)> {
        self.objects
            .iter()
            .enumerate()
            .map(|(index, object)| (Handle::new(index as u16, object.integrity_tag), object))
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }
}
