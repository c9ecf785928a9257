#![allow(unreachable_pub)]

mod error;
mod item;
mod meta;
mod redirect;
mod response;
mod result;
mod throttle;

pub use error::ErrorKind;
pub(crate) use error::panic_message;
pub use item::Payload;
pub use meta::ResponseMeta;
pub use redirect::{RedirectKind, RedirectStack, RedirectStep};
pub use response::Response;
pub use result::{FetchResult, ResolveResult};
pub use throttle::{Throttle, ThrottleFn};

/// The trawl `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
