mod null;
mod relay;

pub use null::*;
pub use relay::*;
