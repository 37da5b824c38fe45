mod gemini;
mod key_rotator;
mod openai;
mod rate_limiter;
mod retry;
mod traits;

pub use gemini::GeminiProvider;
pub use key_rotator::KeyRotator;
pub use openai::OpenAiProvider;
pub use rate_limiter::RateLimiter;
pub use retry::{with_retry, RetryPolicy};
pub use traits::CompletionProvider;
