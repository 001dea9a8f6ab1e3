//! Invocation environment passed to every state-changing operation.

use chrono::{DateTime, Utc};

use crate::storage::RecordStore;
use crate::types::Identity;

/// Target store, authenticated invoker and invocation time.
///
/// The identity is trusted as given; authenticating it is the signer layer's
/// job.
pub struct Env<'a, S: RecordStore + ?Sized> {
    store: &'a S,
    invoker: Identity,
    timestamp: DateTime<Utc>,
}

impl<'a, S: RecordStore + ?Sized> Env<'a, S> {
    /// Environment stamped with the current wall-clock time.
    pub fn new(store: &'a S, invoker: Identity) -> Self {
        Self::at(store, invoker, Utc::now())
    }

    pub fn at(store: &'a S, invoker: Identity, timestamp: DateTime<Utc>) -> Self {
        Self {
            store,
            invoker,
            timestamp,
        }
    }

    /// Same store and time, different invoker.
    pub fn as_invoker(&self, invoker: Identity) -> Self {
        Self::at(self.store, invoker, self.timestamp)
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    pub fn invoker(&self) -> Identity {
        self.invoker
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl<S: RecordStore + ?Sized> Clone for Env<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: RecordStore + ?Sized> Copy for Env<'_, S> {}
