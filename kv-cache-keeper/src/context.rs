//! Process-wide state owned by the control loop and lent to every operation.

use crate::naming::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    /// Session scoping every file name; fixed after startup
    pub session: Session,

    /// Restore target for files whose name carries no slot id
    pub default_slot: u32,
}

impl Context {
    pub fn new(session: Session, default_slot: u32) -> Self {
        Self {
            session,
            default_slot,
        }
    }
}
