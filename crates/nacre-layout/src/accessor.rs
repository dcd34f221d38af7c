//! Typed field accessors for group layouts
//!
//! Field access goes through an `AccessorTable` built once per struct layout:
//! a flat list of `FieldAccessor` entries (byte offset + layout) plus a
//! name-keyed index for members carrying a `name` annotation. Offsets are
//! computed with the same natural-alignment walk the ABI classifier uses, so
//! the two can never disagree.

use rustc_hash::FxHashMap;

use crate::layout::{GroupKind, GroupLayout, Layout};

/// Resolved location of one group member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAccessor {
    /// Byte offset of the member within the group
    pub byte_offset: u64,
    /// The member's layout
    pub layout: Layout,
}

impl FieldAccessor {
    /// The member's bytes within a buffer holding the whole group.
    ///
    /// Returns `None` when the buffer is too short.
    pub fn slice<'a>(&self, bytes: &'a [u8]) -> Option<&'a [u8]> {
        let start = self.byte_offset as usize;
        let end = start + self.layout.byte_size() as usize;
        bytes.get(start..end)
    }

    /// Mutable variant of [`slice`](Self::slice)
    pub fn slice_mut<'a>(&self, bytes: &'a mut [u8]) -> Option<&'a mut [u8]> {
        let start = self.byte_offset as usize;
        let end = start + self.layout.byte_size() as usize;
        bytes.get_mut(start..end)
    }
}

/// Per-group accessor table, resolved once at construction.
#[derive(Debug, Clone)]
pub struct AccessorTable {
    entries: Vec<FieldAccessor>,
    by_name: FxHashMap<String, usize>,
}

impl AccessorTable {
    /// Build the accessor table for a group layout.
    ///
    /// Padding members advance the offset but get no entry. Union members
    /// all sit at offset zero. Struct members are aligned up to their
    /// natural alignment before placement.
    pub fn for_group(group: &GroupLayout) -> Self {
        let mut entries = Vec::with_capacity(group.elements.len());
        let mut by_name = FxHashMap::default();
        let mut offset = 0u64;

        for element in group.elements.iter() {
            let at = match group.kind {
                GroupKind::Struct => {
                    let align = element.byte_alignment();
                    offset = offset.next_multiple_of(align);
                    let at = offset;
                    offset += element.byte_size();
                    at
                }
                GroupKind::Union => 0,
            };
            if element.is_padding() {
                continue;
            }
            if let Some(name) = element.name() {
                by_name.insert(name.to_string(), entries.len());
            }
            entries.push(FieldAccessor {
                byte_offset: at,
                layout: element.clone(),
            });
        }

        Self { entries, by_name }
    }

    /// All non-padding members in declaration order
    pub fn entries(&self) -> &[FieldAccessor] {
        &self.entries
    }

    /// Look up a member by its `name` annotation
    pub fn get(&self, name: &str) -> Option<&FieldAccessor> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }
}
