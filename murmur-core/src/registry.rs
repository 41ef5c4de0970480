//! Process-global routing table for engine callback hooks
//!
//! Callback hooks cross the engine boundary as bare function pointers, so
//! they carry no environment. Every processor registers its shared state
//! here under a process-unique `i64` session id; hooks resolve that id back
//! to the owning instance.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::processor::ProcessorShared;

static SESSIONS: Lazy<DashMap<i64, Arc<ProcessorShared>>> = Lazy::new(DashMap::new);
static NEXT_SESSION: AtomicI64 = AtomicI64::new(1);

/// Mint a process-unique session id.
pub(crate) fn mint_session() -> i64 {
    NEXT_SESSION.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn register(session: i64, shared: Arc<ProcessorShared>) {
    SESSIONS.insert(session, shared);
}

/// Remove a session. Removing an already-removed session is a no-op.
pub(crate) fn unregister(session: i64) {
    SESSIONS.remove(&session);
}

/// Resolve a session id from a callback frame.
///
/// Panics when the id is unknown. Hooks can only legally fire while their
/// owning processor is registered; a miss means the routing state is broken
/// and continuing would dispatch into the wrong instance.
pub(crate) fn lookup(session: i64) -> Arc<ProcessorShared> {
    match SESSIONS.get(&session) {
        Some(entry) => entry.value().clone(),
        None => panic!("no processor registered for session {}", session),
    }
}

#[cfg(test)]
pub(crate) fn is_registered(session: i64) -> bool {
    SESSIONS.contains_key(&session)
}
