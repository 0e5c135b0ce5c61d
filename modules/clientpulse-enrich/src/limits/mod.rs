pub mod jobs;
pub mod rate;

pub use jobs::{GlobalJobLimiter, JobLimiterStats, JobPermit};
pub use rate::{GlobalRateStats, RateLimitConfig, RatePermit, RateStats, ResourceRateLimiter};
