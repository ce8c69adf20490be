mod core;
mod dates;
mod tx;

pub(crate) use self::core::ExecutionSlot;
pub use self::core::Connection;
pub use tx::Completion;
