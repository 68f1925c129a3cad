pub mod backoff;
pub mod poller;
