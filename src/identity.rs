//! Persistent device identity.
//!
//! The identity lives in a small slot of byte-addressed non-volatile storage:
//! one length byte followed by the UTF-8 text. A length of 0 or 0xFF (erased
//! flash) means nothing is stored.

use embedded_storage::Storage;
use thiserror::Error;

use crate::defaults::DEFAULT_DEVICE_ID;

/// Longest identity that fits in the slot.
pub const MAX_ID_LEN: usize = 24;

/// Bytes reserved for the slot (length byte + text).
pub const SLOT_LEN: usize = 1 + MAX_ID_LEN;

const ERASED: u8 = 0xFF;

/// Device identity string.
pub type DeviceId = heapless::String<MAX_ID_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IdentityError<E> {
    #[error("storage access failed: {0:?}")]
    Storage(E),
    #[error("identity is {0} bytes, longer than the slot allows")]
    TooLong(usize),
    #[error("identity must not be empty")]
    Empty,
    #[error("stored identity is not valid UTF-8")]
    Corrupt,
}

/// Reads and writes the identity slot at a fixed offset.
pub struct IdentityStore<S> {
    storage: S,
    offset: u32,
}

impl<S: Storage> IdentityStore<S> {
    pub fn new(storage: S, offset: u32) -> Self {
        Self { storage, offset }
    }

    /// Load the stored identity, if any.
    pub fn load(&mut self) -> Result<Option<DeviceId>, IdentityError<S::Error>> {
        let mut slot = [0u8; SLOT_LEN];
        self.storage
            .read(self.offset, &mut slot)
            .map_err(IdentityError::Storage)?;

        let len = usize::from(slot[0]);
        if slot[0] == ERASED || len == 0 {
            return Ok(None);
        }
        if len > MAX_ID_LEN {
            return Err(IdentityError::Corrupt);
        }

        let text = core::str::from_utf8(&slot[1..=len]).map_err(|_| IdentityError::Corrupt)?;
        let mut id = DeviceId::new();
        id.push_str(text).map_err(|_| IdentityError::Corrupt)?;
        Ok(Some(id))
    }

    /// Persist `id`, replacing whatever was stored.
    pub fn save(&mut self, id: &str) -> Result<(), IdentityError<S::Error>> {
        validate(id)?;

        let mut slot = [ERASED; SLOT_LEN];
        slot[0] = id.len() as u8;
        slot[1..=id.len()].copy_from_slice(id.as_bytes());

        self.storage
            .write(self.offset, &slot)
            .map_err(IdentityError::Storage)
    }

    /// Erase the slot (all bytes 0xFF).
    pub fn clear(&mut self) -> Result<(), IdentityError<S::Error>> {
        self.storage
            .write(self.offset, &[ERASED; SLOT_LEN])
            .map_err(IdentityError::Storage)
    }
}

fn validate<E>(id: &str) -> Result<(), IdentityError<E>> {
    if id.is_empty() {
        return Err(IdentityError::Empty);
    }
    if id.len() > MAX_ID_LEN {
        return Err(IdentityError::TooLong(id.len()));
    }
    Ok(())
}

/// The node's current identity backed by an [`IdentityStore`].
pub struct Identity<S> {
    store: IdentityStore<S>,
    current: DeviceId,
}

impl<S: Storage> Identity<S> {
    /// Load the persisted identity, falling back to [`DEFAULT_DEVICE_ID`]
    /// when the slot is blank or unreadable.
    pub fn load(mut store: IdentityStore<S>) -> Self
    where
        S::Error: core::fmt::Debug,
    {
        let current = match store.load() {
            Ok(Some(id)) => {
                log::info!("Device identity: {}", id);
                id
            }
            Ok(None) => {
                log::info!("No stored identity, using '{}'", DEFAULT_DEVICE_ID);
                default_id()
            }
            Err(e) => {
                log::warn!("Identity slot unreadable ({:?}), using '{}'", e, DEFAULT_DEVICE_ID);
                default_id()
            }
        };
        Self { store, current }
    }

    pub fn id(&self) -> &str {
        self.current.as_str()
    }

    /// Persist and adopt a new identity.
    pub fn set(&mut self, id: &str) -> Result<(), IdentityError<S::Error>> {
        self.store.save(id)?;
        self.current.clear();
        let _ = self.current.push_str(id);
        log::info!("Device identity set to {}", id);
        Ok(())
    }

    /// Erase the persisted identity and revert to the default.
    pub fn reset(&mut self) -> Result<(), IdentityError<S::Error>> {
        self.store.clear()?;
        self.current = default_id();
        log::info!("Device identity cleared");
        Ok(())
    }
}

fn default_id() -> DeviceId {
    let mut id = DeviceId::new();
    let _ = id.push_str(DEFAULT_DEVICE_ID);
    id
}
