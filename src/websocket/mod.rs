pub mod frame;
pub mod handler;
pub mod msg_awareness_handler;
pub mod msg_execute_handler;
pub mod msg_sync_handler;
