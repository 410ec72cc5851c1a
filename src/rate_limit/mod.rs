pub mod block;
pub mod engine;
pub mod limiter;
pub mod middleware;
pub mod sliding_window;
pub mod token_bucket;
pub mod violations;
pub mod window;

pub use block::{BlockGate, BlockStatus};
pub use engine::{DecisionEngine, FailMode, Standing};
pub use limiter::{Algorithm, RateLimiter};
pub use middleware::{rate_limit_middleware, RateLimitState};
pub use sliding_window::SlidingWindowRateLimiter;
pub use token_bucket::TokenBucketRateLimiter;
pub use violations::{ViolationOutcome, ViolationTracker};
pub use window::WindowedCounter;
