pub mod retry;
pub mod text;

pub use retry::{retry_on_transient, IsTransient, RetryConfig, RetryResult};
pub use text::truncate_utf8;
