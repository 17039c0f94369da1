use bincode::{Decode, Encode};
use derive_more::From;

/// Opaque display icon attached to a wrapper.
///
/// The tree never produces or inspects icons, it only carries them along.
#[derive(Debug, Clone, PartialEq, Eq, From, Encode, Decode)]
pub struct Icon(Vec<u8>);

impl Icon {
    pub fn new(image_bytes: impl Into<Vec<u8>>) -> Self {
        Self(image_bytes.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}
