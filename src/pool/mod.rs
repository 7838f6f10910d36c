pub mod throttle_pool;
pub mod vcenter_pool;

pub use throttle_pool::ThrottlePool;
pub use vcenter_pool::{ClientLease, RestLease, VCenterPool};
