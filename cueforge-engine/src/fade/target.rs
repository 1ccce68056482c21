//! Typed fade targets
//!
//! A [`Fadeable`] is a handle to one numeric field. The fade engine only ever
//! reads and writes through it, so any field can be automated without string
//! paths.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// One automatable numeric field
pub trait Fadeable: Send + Sync {
    /// Owner of the field (cue, patch), used for bulk cancellation
    fn target_id(&self) -> Uuid;

    fn get(&self) -> f32;

    fn set(&self, value: f32);

    /// Field name for logging
    fn label(&self) -> &str {
        "value"
    }
}

/// `f32` stored in an `AtomicU32`, readable from the render callback
#[derive(Default)]
pub struct AtomicGain(AtomicU32);

impl AtomicGain {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl fmt::Debug for AtomicGain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicGain").field(&self.load()).finish()
    }
}

/// Fade target over a shared [`AtomicGain`]
pub struct GainTarget {
    owner: Uuid,
    label: String,
    gain: Arc<AtomicGain>,
}

impl GainTarget {
    pub fn new(owner: Uuid, label: impl Into<String>, gain: Arc<AtomicGain>) -> Arc<Self> {
        Arc::new(Self {
            owner,
            label: label.into(),
            gain,
        })
    }
}

impl Fadeable for GainTarget {
    fn target_id(&self) -> Uuid {
        self.owner
    }

    fn get(&self) -> f32 {
        self.gain.load()
    }

    fn set(&self, value: f32) {
        self.gain.store(value);
    }

    fn label(&self) -> &str {
        &self.label
    }
}

type Getter = Box<dyn Fn() -> f32 + Send + Sync>;
type Setter = Box<dyn Fn(f32) + Send + Sync>;

/// Fade target built from a getter/setter pair
///
/// Used for fields that live behind a lock, such as a crosspoint level.
pub struct FieldTarget {
    owner: Uuid,
    label: String,
    getter: Getter,
    setter: Setter,
}

impl FieldTarget {
    pub fn new(
        owner: Uuid,
        label: impl Into<String>,
        getter: impl Fn() -> f32 + Send + Sync + 'static,
        setter: impl Fn(f32) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            owner,
            label: label.into(),
            getter: Box::new(getter),
            setter: Box::new(setter),
        })
    }
}

impl Fadeable for FieldTarget {
    fn target_id(&self) -> Uuid {
        self.owner
    }

    fn get(&self) -> f32 {
        (self.getter)()
    }

    fn set(&self, value: f32) {
        (self.setter)(value)
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// Plain mutex-guarded value, handy for tests and control-side fields
pub struct ValueTarget {
    owner: Uuid,
    value: Mutex<f32>,
    writes: AtomicU32,
}

impl ValueTarget {
    pub fn new(owner: Uuid, value: f32) -> Arc<Self> {
        Arc::new(Self {
            owner,
            value: Mutex::new(value),
            writes: AtomicU32::new(0),
        })
    }

    /// Number of `set` calls so far
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl Fadeable for ValueTarget {
    fn target_id(&self) -> Uuid {
        self.owner
    }

    fn get(&self) -> f32 {
        *self.value.lock()
    }

    fn set(&self, value: f32) {
        *self.value.lock() = value;
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_gain_round_trip() {
        let gain = AtomicGain::new(0.25);
        assert_eq!(gain.load(), 0.25);
        gain.store(-3.5);
        assert_eq!(gain.load(), -3.5);
    }

    #[test]
    fn test_gain_target_shares_storage() {
        let gain = Arc::new(AtomicGain::new(1.0));
        let target = GainTarget::new(Uuid::new_v4(), "volume", gain.clone());
        target.set(0.5);
        assert_eq!(gain.load(), 0.5);
        assert_eq!(target.label(), "volume");
    }

    #[test]
    fn test_field_target_uses_closures() {
        let store = Arc::new(Mutex::new(2.0f32));
        let (get_store, set_store) = (store.clone(), store.clone());
        let target = FieldTarget::new(
            Uuid::new_v4(),
            "crosspoint",
            move || *get_store.lock(),
            move |v| *set_store.lock() = v,
        );
        assert_eq!(target.get(), 2.0);
        target.set(-6.0);
        assert_eq!(*store.lock(), -6.0);
    }
}
