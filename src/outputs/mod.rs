//! Everything produced after summarization.
//!
//! # Submodules
//!
//! - [`wordcloud`]: cleans batch summaries and renders the keyword image
//! - [`email`]: turns a final summary and image into a MIME message
//! - [`gmail`]: OAuth2 credential handling and delivery through the Gmail API
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── wordcloud_kulfold_2025-06-12.png
//! ├── wordcloud_belfold_2025-06-12.png
//! ├── wordcloud_gazdasag_2025-06-12.png
//! └── final_kulfold_2025-06-12.txt   # only with --save-summaries
//! ```
//!
//! Re-running on the same day overwrites the files.

pub mod email;
pub mod gmail;
pub mod wordcloud;
