//! Progress-callback trait for per-page detection events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to observe
//! a job while its pages are detected and normalized.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2doc::{ConversionConfig, ConversionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct RegionCounter {
//!     regions: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for RegionCounter {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, region_count: usize) {
//!         self.regions.fetch_add(region_count, Ordering::SeqCst);
//!         eprintln!("page {}/{}: {} regions", page_num, total_pages, region_count);
//!     }
//! }
//!
//! let counter = Arc::new(RegionCounter { regions: AtomicUsize::new(0) });
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it works through the selected pages.
///
/// Pages are detected concurrently, so `on_page_start`, `on_page_complete`
/// and `on_page_error` may run on different threads at once and in any page
/// order. Every method defaults to a no-op.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once, after loading, with the number of selected pages.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page is sent to the detector.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — number of selected pages
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page has been detected and normalized.
    ///
    /// # Arguments
    /// * `page_num`     — 1-indexed page number
    /// * `total_pages`  — number of selected pages
    /// * `region_count` — regions produced for the page, before merging
    fn on_page_complete(&self, page_num: usize, total_pages: usize, region_count: usize) {
        let _ = (page_num, total_pages, region_count);
    }

    /// Called when a page is degraded (detector failure, timeout or
    /// malformed detections). The job continues without it.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page has been attempted.
    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A callback that ignores every event.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
