pub mod calendar;
pub mod engine;
pub mod policy;

pub use calendar::working_days;
pub use engine::LifecycleEngine;
pub use policy::LeavePolicy;
