//! Wire protocol for the realtime endpoint
//!
//! Frames are JSON objects carried as WebSocket text messages. The `kind`
//! field is both the control-frame discriminator and, for every other
//! value, the name of the application channel the frame belongs to.

mod codec;
mod frame;

pub use codec::*;
pub use frame::*;
