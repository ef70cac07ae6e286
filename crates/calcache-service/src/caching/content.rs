use super::CacheError;

/// The value stored for an item, a permutation or a key-value entry.
///
/// [`Failed`](Self::Failed) is the negative-cache marker written when a refresh produced
/// nothing and there was no previous value to fall back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Opaque payload produced by a refresh or transform callback.
    Data(Vec<u8>),
    /// A refresh that failed.
    Failed,
}

impl Content {
    const MAGIC: &'static [u8] = b"cal";
    const VERSION: u8 = 1;
    const DATA_MARKER: u8 = b'd';
    const FAILED_MARKER: u8 = b'f';

    /// Returns the payload, or `None` for the failure marker.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            Self::Failed => None,
        }
    }

    /// Consumes the content and returns the payload, or `None` for the failure marker.
    pub fn into_data(self) -> Option<Vec<u8>> {
        match self {
            Self::Data(data) => Some(data),
            Self::Failed => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Serializes the content into its versioned storage envelope.
    ///
    /// The layout is `b"cal"`, one version byte, one kind byte, then the payload.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.data().unwrap_or_default();
        let mut buf = Vec::with_capacity(Self::MAGIC.len() + 2 + payload.len());
        buf.extend_from_slice(Self::MAGIC);
        buf.push(Self::VERSION);
        match self {
            Self::Data(data) => {
                buf.push(Self::DATA_MARKER);
                buf.extend_from_slice(data);
            }
            Self::Failed => buf.push(Self::FAILED_MARKER),
        }
        buf
    }

    /// Parses a storage envelope written by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        let rest = bytes
            .strip_prefix(Self::MAGIC)
            .ok_or_else(|| CacheError::Codec("missing envelope header".into()))?;
        let (&version, rest) = rest
            .split_first()
            .ok_or_else(|| CacheError::Codec("truncated envelope".into()))?;
        if version != Self::VERSION {
            return Err(CacheError::Codec(format!(
                "unsupported envelope version {version}"
            )));
        }
        match rest.split_first() {
            Some((&Self::DATA_MARKER, payload)) => Ok(Self::Data(payload.to_vec())),
            Some((&Self::FAILED_MARKER, [])) => Ok(Self::Failed),
            Some((&Self::FAILED_MARKER, _)) => {
                Err(CacheError::Codec("failure marker with payload".into()))
            }
            Some((kind, _)) => Err(CacheError::Codec(format!(
                "unknown content kind {:?}",
                char::from(*kind)
            ))),
            None => Err(CacheError::Codec("truncated envelope".into())),
        }
    }
}
