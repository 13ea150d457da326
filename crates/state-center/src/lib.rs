//! Workflow state with per-field merge policies.
//!
//! Every field of a state struct is wrapped in a policy type: [`Replace`]
//! (an update value wins, no update leaves the field alone) or [`Append`]
//! (updates are concatenated, an empty update adds nothing). The policy is
//! part of the field's type, so callers cannot pick it at merge time and can
//! never clear or duplicate accumulated history by accident.
//!
//! [`define_state!`] declares a state struct, its partial-update struct and
//! the [`MergeState`] impl in one place.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::ops::Deref;
use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::to_writer_pretty;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    Replace,
    Append,
}

/// A state field that knows how to absorb its own partial update.
pub trait Field: Default {
    type Update: Default;
    const POLICY: MergePolicy;

    fn apply(&mut self, update: Self::Update);
}

/// Last writer wins; `None` means "no change".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Replace<T>(T);

impl<T> Replace<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Replace<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Default> Field for Replace<T> {
    type Update = Option<T>;
    const POLICY: MergePolicy = MergePolicy::Replace;

    fn apply(&mut self, update: Option<T>) {
        if let Some(value) = update {
            self.0 = value;
        }
    }
}

/// Accumulate-only sequence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Append<T>(Vec<T>);

impl<T> Default for Append<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> Append<T> {
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> Deref for Append<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> Field for Append<T> {
    type Update = Vec<T>;
    const POLICY: MergePolicy = MergePolicy::Append;

    fn apply(&mut self, update: Vec<T>) {
        self.0.extend(update);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub policy: MergePolicy,
}

pub trait MergeState: Sized {
    type Update: Default;

    fn merge(self, update: Self::Update) -> Self;

    /// Declared fields and their policies, in declaration order.
    fn schema() -> &'static [FieldSpec];
}

/// Declares a state struct and its partial update.
///
/// ```
/// use qapilot_state_center::{define_state, Append, MergeState, Replace};
///
/// define_state! {
///     #[derive(Clone, Debug, Default)]
///     pub struct Counter / CounterUpdate {
///         pub total: Replace<u32>,
///         pub log: Append<String>,
///     }
/// }
///
/// let state = Counter::default().merge(CounterUpdate {
///     total: Some(2),
///     ..Default::default()
/// });
/// assert_eq!(*state.total, 2);
/// assert!(state.log.is_empty());
/// ```
#[macro_export]
macro_rules! define_state {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident / $update:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $field:ident : $fty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $field: $fty, )*
        }

        /// Partial update; every field defaults to "no change".
        #[derive(Debug, Default)]
        $vis struct $update {
            $( $fvis $field: <$fty as $crate::Field>::Update, )*
        }

        impl $crate::MergeState for $name {
            type Update = $update;

            fn merge(mut self, update: $update) -> Self {
                $( $crate::Field::apply(&mut self.$field, update.$field); )*
                self
            }

            fn schema() -> &'static [$crate::FieldSpec] {
                const SCHEMA: &[$crate::FieldSpec] = &[
                    $(
                        $crate::FieldSpec {
                            name: stringify!($field),
                            policy: <$fty as $crate::Field>::POLICY,
                        },
                    )*
                ];
                SCHEMA
            }
        }
    };
}

struct Versioned<S> {
    state: S,
    revision: u64,
}

/// Holds the current state and applies updates one at a time.
pub struct StateStore<S> {
    inner: Mutex<Versioned<S>>,
}

impl<S> StateStore<S>
where
    S: MergeState + Default + Clone,
{
    pub fn new(initial: S) -> Self {
        Self {
            inner: Mutex::new(Versioned {
                state: initial,
                revision: 0,
            }),
        }
    }

    /// Merges one update and returns the resulting state.
    pub fn apply(&self, update: S::Update) -> S {
        let mut inner = self.inner.lock();
        let current = std::mem::take(&mut inner.state);
        inner.state = current.merge(update);
        inner.revision += 1;
        inner.state.clone()
    }

    pub fn snapshot(&self) -> S {
        self.inner.lock().state.clone()
    }

    /// Number of updates applied so far.
    pub fn revision(&self) -> u64 {
        self.inner.lock().revision
    }

    pub fn into_inner(self) -> S {
        self.inner.into_inner().state
    }

    pub fn write_snapshot<P: AsRef<Path>>(&self, path: P) -> io::Result<()>
    where
        S: Serialize,
    {
        let snapshot = self.snapshot();
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, &snapshot)?;
        writer.flush()
    }
}
