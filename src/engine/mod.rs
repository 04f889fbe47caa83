mod breaker;
mod dependency;
mod executor;
mod middleware;
mod pool;
mod progress;
mod scheduler;
mod selector;
mod worker;

#[cfg(test)]
mod tests;

pub use breaker::Circuit;
pub use dependency::DependencyResolver;
pub use executor::Executor;
pub use middleware::{
    breaker_middleware, retry_middleware, verify_middleware, Handler, Middleware, MiddlewareChain,
    SharedHandler, TransportHandler,
};
pub use pool::ClientPool;
pub use progress::ProgressTracker;
pub use scheduler::Scheduler;
pub use selector::{ApiRequestConfig, ApiSelector};
pub use worker::{substitute_bindings, Worker};
