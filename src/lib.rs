#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::non_ascii_literal,
    clippy::verbose_bit_mask,
)]

pub mod error;
pub mod idc;
pub mod loaders;
pub mod resources;
pub mod segments;
pub(crate) mod bytes;
pub(crate) mod io;
pub(crate) mod string;
pub(crate) mod types;
mod executable;

pub use crate::error::{Error, Result};
pub use crate::executable::{Executable, LoadOptions};
pub use crate::resources::{ResourceFork, ResourceId};
pub use crate::types::os_type::*;
pub use crate::types::reader::*;

#[must_use]
pub fn name(with_version: bool) -> String {
    let mut name = "Macloader".to_string();
    if with_version {
        name.push(' ');
        name.push_str(env!("CARGO_PKG_VERSION"));
    }
    name
}
