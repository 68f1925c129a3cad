pub mod response;
pub mod retry;
pub mod upload;
