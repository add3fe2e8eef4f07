//! Capability gating for privileged debug/ops operations.
//!
//! Administrative actions (skip a branch, clear applied rewards) run through
//! the same public interfaces as production behavior; the only difference is
//! that they demand an `AdminAccess` token constructed at the composition
//! root behind an explicit debug capability flag.

/// Proof of administrative capability. Not serializable on purpose: the token
/// cannot arrive over the wire, it can only be constructed in-process.
#[derive(Debug)]
pub struct AdminAccess {
    _private: (),
}

impl AdminAccess {
    /// Grant the capability. Call sites should be limited to the composition
    /// root of debug and test tooling.
    #[must_use]
    pub const fn grant() -> Self {
        Self { _private: () }
    }
}
