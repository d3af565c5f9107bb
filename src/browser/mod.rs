//! 浏览器启动、连接与 Cookie 注入

pub mod connection;
pub mod factory;
pub mod headless;
pub mod session;

pub use connection::connect_to_browser;
pub use factory::{BrowserFactory, BrowserResource};
pub use headless::launch_headless_browser;
pub use session::{inject_cookies, navigate, BrowserSession};
