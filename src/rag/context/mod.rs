//! Context assembly and prompt construction

pub mod builder;
pub mod templates;

pub use builder::ContextAssembler;
pub use templates::{strip_role_markers, ChatTemplate, NO_DATA_REPLY};
