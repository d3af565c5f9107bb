//! 基础设施层（Infrastructure Layer）
//!
//! 持有稀缺资源（页面、数据库连接、浏览器实例），只暴露能力，不认识业务流程。

pub mod browser_transport;
pub mod http_transport;
pub mod js_executor;
pub mod order_store;
pub mod resource_pool;
pub mod ui_advancer;

pub use browser_transport::BrowserTransport;
pub use http_transport::HttpTransport;
pub use js_executor::JsExecutor;
pub use order_store::{OrderStore, StatusCounts};
pub use resource_pool::{Lease, ReleaseOutcome, ResourceFactory, ResourcePool};
pub use ui_advancer::UiPageAdvancer;
