//! Aligning multiple push accessors to one trigger.

use crate::access_mode::AccessMode;
use crate::accessor::RegisterAccessor;
use crate::data_types::UserType;
use crate::error::{Error, Result};
use crate::transfer::TransferElementId;
use crate::version_number::VersionNumber;
use fnv::FnvBuildHasher;
use hashbrown::HashMap;

/// Tracks the version numbers of a set of push accessors.
///
/// After every read the owner reports the accessor through [`update`]; once
/// every member carries the same non-zero version, the group holds one
/// causally consistent snapshot.
///
/// [`update`]: DataConsistencyGroup::update
#[derive(Default)]
pub struct DataConsistencyGroup {
    versions: HashMap<TransferElementId, VersionNumber, FnvBuildHasher>,
}

impl DataConsistencyGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member. Only readable accessors with `WAIT_FOR_NEW_DATA`
    /// qualify; anything else is a `LogicError`.
    pub fn add<T: UserType>(&mut self, accessor: &RegisterAccessor<T>) -> Result<()> {
        if !accessor.is_readable() {
            return Err(Error::logic(format!(
                "cannot add non-readable accessor for register '{}' to a DataConsistencyGroup",
                accessor.name()
            )));
        }
        if !accessor
            .access_mode_flags()
            .contains(AccessMode::WAIT_FOR_NEW_DATA)
        {
            return Err(Error::logic(format!(
                "cannot add poll-type accessor for register '{}' to a DataConsistencyGroup",
                accessor.name()
            )));
        }
        self.versions
            .insert(accessor.id(), accessor.version_number());
        Ok(())
    }

    /// Records the version of a member that has just seen new data. Returns
    /// whether the element belongs to this group.
    pub fn update<T: UserType>(&mut self, accessor: &RegisterAccessor<T>) -> bool {
        match self.versions.get_mut(&accessor.id()) {
            Some(slot) => {
                *slot = accessor.version_number();
                true
            }
            None => false,
        }
    }

    /// True once every member carries the same non-zero version number.
    pub fn is_consistent(&self) -> bool {
        let mut versions = self.versions.values();
        match versions.next() {
            None => false,
            Some(first) => {
                *first != VersionNumber::BEFORE_EVERYTHING && versions.all(|v| v == first)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
