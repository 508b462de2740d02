pub mod apdu;
pub mod codec;
pub mod engine;
pub mod image;
pub mod session;
pub mod status;
pub mod tlv;
pub mod tree;

pub mod prelude {
    pub use super::apdu::Apdu;
    pub use super::codec::prelude::*;
    pub use super::engine::SmartcardEngine;
    pub use super::image::prelude::*;
    pub use super::session::Session;
    pub use super::status::StatusWord;
    pub use super::tlv::prelude::*;
    pub use super::tree::prelude::*;
}
