pub mod rsa;
pub mod xtea;

pub use self::rsa::{RsaCipher, RsaKeyError};
