pub mod page_manager;

pub use page_manager::{DEFAULT_PAGE_SIZE, PageManager};
