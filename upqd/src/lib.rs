pub mod connectivity;
pub mod daemon;
pub mod notify;
pub mod queue;
pub mod session;
pub mod shell_cache;
pub mod sync;
pub mod worker;
