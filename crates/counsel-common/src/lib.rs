pub mod error;
pub mod message;

pub use error::{Error, Result};
pub use message::{ClientRequest, CounselRequest, RequestDefaults, ServerEvent};
