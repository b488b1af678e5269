pub mod conversation;
pub mod event;
pub mod owner;
pub mod record;
pub mod retrieval;
pub mod task;
