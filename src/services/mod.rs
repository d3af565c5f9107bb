pub mod exporter;
pub mod failed_page_log;
pub mod image_trim;
pub mod order_parser;
pub mod page_fetcher;
pub mod screenshot_service;

pub use exporter::export_report;
pub use failed_page_log::FailedPageLog;
pub use page_fetcher::{FetchPolicy, PageAdvancer, PageCursor, PageFetcher, PageTransport};
pub use screenshot_service::{OrderCapture, ScreenshotService};
