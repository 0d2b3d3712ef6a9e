//! PDF writing for signing revisions.
//!
//! ```text
//! PdfDocument + new/replaced objects
//!     ↓
//! [IncrementalUpdate] (appends objects and a cross-reference section)
//!     ↓
//! [ObjectSerializer] (serializes PDF objects)
//!     ↓
//! original bytes ++ new revision
//! ```

mod incremental;
mod object_serializer;

pub use incremental::{IncrementalOutput, IncrementalUpdate};
pub use object_serializer::ObjectSerializer;
