use crate::common::stream;
use crate::common::MemoryStream;
use std::collections::HashMap;
use thiserror::Error;

/// The result type for service operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for service operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("unknown service {0:?}")]
    UnknownService(String),

    #[error(transparent)]
    Stream(Box<stream::Error>),
}

from_error_boxed!(Error::Stream, stream::Error);

/// A named byte-stream-to-byte-stream transform (compression, encryption, ...).
/// File objects look transforms up by name; the core treats them as opaque.
pub trait Transform {
    fn name(&self) -> &str;

    /// Applies the forward transform (compress, encrypt, ...).
    fn apply(&self, input: &MemoryStream) -> Result<MemoryStream>;

    /// Applies the inverse transform (decompress, decrypt, ...).
    fn invert(&self, input: &MemoryStream) -> Result<MemoryStream>;
}

/// A registry of transforms looked up by name. Registries are explicit values
/// owned by the application, not process-wide singletons.
#[derive(Default)]
pub struct TransformRegistry {
    services: HashMap<String, Box<dyn Transform>>,
}

impl TransformRegistry {
    /// Constructs an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transform under its own name, replacing any previous
    /// registration with the same name.
    pub fn register(&mut self, service: Box<dyn Transform>) {
        self.services.insert(service.name().to_owned(), service);
    }

    /// Looks up the transform registered as `name`.
    pub fn get(&self, name: &str) -> Result<&dyn Transform> {
        self.services
            .get(name)
            .map(|s| s.as_ref())
            .ok_or_else(|| Error::UnknownService(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct XorTransform;

    impl Transform for XorTransform {
        fn name(&self) -> &str {
            "xor"
        }
        fn apply(&self, input: &MemoryStream) -> Result<MemoryStream> {
            let bytes: Vec<u8> = input.as_bytes().iter().map(|b| b ^ 0x5a).collect();
            Ok(MemoryStream::from(bytes))
        }
        fn invert(&self, input: &MemoryStream) -> Result<MemoryStream> {
            self.apply(input)
        }
    }

    #[test]
    fn test_registry() -> Result<()> {
        let mut registry = TransformRegistry::new();
        registry.register(Box::new(XorTransform));

        let service = registry.get("xor")?;
        let input = MemoryStream::from(&b"data"[..]);
        let encoded = service.apply(&input)?;
        assert_ne!(encoded.as_bytes(), input.as_bytes());
        assert_eq!(service.invert(&encoded)?, input);

        assert!(matches!(registry.get("none"), Err(Error::UnknownService(_))));
        Ok(())
    }
}
