pub mod init;
pub mod refresh;
pub mod activity;
pub mod sync;
pub mod pending;
pub mod probe;
