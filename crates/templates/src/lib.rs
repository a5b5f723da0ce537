pub mod builtin;
pub mod error;
pub mod loader;
pub mod models;
pub mod render;
pub mod validate;

pub use error::TemplateError;
pub use models::*;
pub use render::{quote_list, render_extract_query, QueryVars};
pub use validate::validate_template;
