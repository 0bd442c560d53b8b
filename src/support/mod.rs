pub mod frame;
pub mod random;
pub mod shutdown;

pub use frame::{Frame, FrameError};
pub use shutdown::ShutdownSignal;
