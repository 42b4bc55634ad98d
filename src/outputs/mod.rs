//! Output files written alongside the warehouse load.
//!
//! # Submodules
//!
//! - [`json`]: Writes a JSON snapshot of each successful run
//!
//! # Output Structure
//!
//! ```text
//! json_output_dir/
//! └── 2025-05-06/
//!     ├── news_scraper_results_091500.json
//!     └── news_scraper_results_211500.json
//! ```

pub mod json;
