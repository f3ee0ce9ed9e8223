mod live;
mod stats;

pub use live::{display_state, LiveFrame, LiveView};
pub use stats::LiveViewStats;
