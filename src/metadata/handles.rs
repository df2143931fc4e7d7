use super::{TypeDescriptor, TypeId};
use crate::error::{DevirtError, Error, Result};

/// Pass-owned reference to a resolved type snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeHandle(u32);

impl TypeHandle {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Arena of type snapshots that lives exactly as long as one pass instance.
///
/// Handles are plain indices; once [`HandleScope::release`] runs every lookup fails
/// with [`DevirtError::HandleReleased`] instead of reading stale metadata.
#[derive(Debug, Default)]
pub struct HandleScope {
    entries: Vec<TypeDescriptor>,
    released: bool,
}

impl HandleScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a snapshot, reusing the handle of an earlier snapshot of the same type.
    ///
    /// # Errors
    ///
    /// Fails once the scope has been released.
    pub fn new_handle(&mut self, ty: TypeDescriptor) -> std::result::Result<TypeHandle, DevirtError> {
        if self.released {
            return Err(DevirtError::HandleReleased);
        }
        if let Some(pos) = self.entries.iter().position(|entry| entry.id == ty.id) {
            return Ok(TypeHandle(u32::try_from(pos).unwrap_or(u32::MAX)));
        }
        let index = u32::try_from(self.entries.len()).map_err(|_| {
            DevirtError::malformed("handle scope exhausted the 32-bit index space")
        })?;
        self.entries.push(ty);
        Ok(TypeHandle(index))
    }

    /// Dereference a handle.
    ///
    /// # Errors
    ///
    /// Fails after release, or for a handle minted by another scope.
    pub fn get(&self, handle: TypeHandle) -> std::result::Result<&TypeDescriptor, DevirtError> {
        if self.released {
            return Err(DevirtError::HandleReleased);
        }
        self.entries
            .get(handle.index())
            .ok_or_else(|| DevirtError::malformed(format!("unknown type handle {}", handle.0)))
    }

    /// Convenience accessor for the type identity behind a handle.
    ///
    /// # Errors
    ///
    /// Same conditions as [`HandleScope::get`].
    pub fn type_id(&self, handle: TypeHandle) -> std::result::Result<TypeId, DevirtError> {
        self.get(handle).map(|desc| desc.id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Drop every snapshot. Returns how many handles were live.
    ///
    /// # Errors
    ///
    /// Releasing twice is a bookkeeping defect and reported as an internal error.
    pub fn release(&mut self) -> Result<usize> {
        if self.released {
            return Err(Error::internal("type handle scope released twice"));
        }
        let live = self.entries.len();
        self.entries.clear();
        self.released = true;
        Ok(live)
    }
}
