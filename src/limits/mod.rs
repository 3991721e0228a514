pub mod circuit_breaker;
pub mod cooldown;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::CircuitBreaker;
pub use cooldown::WalletCooldown;
pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;
