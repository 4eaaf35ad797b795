pub mod codec;
pub mod error;
pub mod file_list;
pub mod types;

pub use codec::{decode, encode};
pub use error::{CodecError, CodecResult};
pub use file_list::{FileInfo, FileList};
pub use types::{FileOffer, Request, RequestKind, RequestPayload};
