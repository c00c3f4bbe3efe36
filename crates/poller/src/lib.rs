pub mod cycle;
pub mod poller;
pub mod reconnect;
pub mod source;
