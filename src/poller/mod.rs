pub mod cold;
pub mod cycle;
pub mod hot;

pub use cold::ColdPoller;
pub use cycle::PollEngine;
pub use hot::HotPoller;
