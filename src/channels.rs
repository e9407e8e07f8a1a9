//! Versioned, copy-on-write channels backing [`crate::state::WorkflowState`].
//!
//! Every write through a channel bumps its version so that a previously
//! taken [`Channel::snapshot`] can never observe a later write (§3
//! WorkflowState invariant: "old data must never leak into subsequent
//! reads").

use rustc_hash::FxHashMap;
use serde_json::Value;

/// A versioned, cloneable container for one slice of workflow state.
pub trait Channel<T: Clone + Default> {
    /// Builds a channel already seeded with `value` at `version`.
    fn new(value: T, version: u32) -> Self;

    /// The current version. Every mutating access through [`get_mut`](Self::get_mut) bumps this.
    fn version(&self) -> u32;

    /// A deep clone of the current value, detached from further mutation.
    fn snapshot(&self) -> T;

    /// Mutable access to the underlying value; bumps the version on next read of it.
    fn get_mut(&mut self) -> &mut T;
}

macro_rules! versioned_channel {
    ($name:ident, $value:ty, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Debug, Default, PartialEq, Eq)]
        pub struct $name {
            value: $value,
            version: u32,
        }

        impl Channel<$value> for $name {
            fn new(value: $value, version: u32) -> Self {
                Self { value, version }
            }

            fn version(&self) -> u32 {
                self.version
            }

            fn snapshot(&self) -> $value {
                self.value.clone()
            }

            fn get_mut(&mut self) -> &mut $value {
                self.version += 1;
                &mut self.value
            }
        }

        impl $name {
            /// Borrow without bumping the version; for read-only call sites.
            #[must_use]
            pub fn get(&self) -> &$value {
                &self.value
            }
        }
    };
}

versioned_channel!(
    DataChannel,
    FxHashMap<String, Value>,
    "Workflow-state `data`: the engine-visible, node-writable map."
);
versioned_channel!(
    MetadataChannel,
    FxHashMap<String, String>,
    "Workflow-state `metadata`: engine/host-attached string tags."
);
