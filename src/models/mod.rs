pub mod cookie;
pub mod order;

pub use cookie::{extract_wdtoken, parse_cookie_string, CookiePair};
pub use order::{OrderKey, OrderRecord, ProcessingStatus, StoredOrder, TaskOutcome};
