pub mod gps;
pub mod mock;
pub mod traits;

pub use gps::{poll_fix, GpsFix, GpsPoller};
pub use mock::MockDevice;
pub use traits::DeviceFacade;
