//! Canvas nodes
//!
//! Free-form nodes that connect to anything.

mod default;
mod note;

pub use default::DefaultHandler;
pub use note::NoteHandler;
