pub mod screenshot_flow;
pub mod task_ctx;

pub use screenshot_flow::{FlowPolicy, ScreenshotFlow};
pub use task_ctx::TaskCtx;
