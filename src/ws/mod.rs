pub mod awareness;
pub mod connctx;
pub mod membership;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod update_check;
pub mod ydoc;
