mod logger;
pub use logger::*;

#[cfg(feature = "stream")]
mod stream;
#[cfg(feature = "stream")]
pub use stream::{LogStreamLayer, StreamConfig, stream_layer};
