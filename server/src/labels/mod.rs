//! Labels module
//!
//! Global object identifiers across the acquisition grid, their RGB encoding
//! for ID layers, the border-object display policy and outline extraction
//! from label matrices.

pub mod assign;
pub mod border;
pub mod outline;
pub mod rgb;
pub mod types;

pub use assign::{GlobalIdAssigner, SiteAssignment};
pub use border::{border_labels, mask_border_children, mask_labels, parent_of};
pub use outline::extract_outlines;
pub use rgb::{MAX_RGB_ID, decode, encode, encode_raster};
pub use types::{LabelError, LabelOutline, PixelBounds};
