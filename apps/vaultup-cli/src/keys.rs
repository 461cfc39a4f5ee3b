use vaultup_protocol::DestinationId;
use vaultup_transfer::KeyMaterial;
use vaultup_upload_queue::{BoxFuture, KeyError, KeyMaterialProvider};

/// Derives the destination key from a passphrase.
pub struct PassphraseKeys {
    passphrase: String,
}

impl PassphraseKeys {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
        }
    }
}

impl KeyMaterialProvider for PassphraseKeys {
    fn derive_key<'a>(
        &'a self,
        destination: &'a DestinationId,
    ) -> BoxFuture<'a, Result<KeyMaterial, KeyError>> {
        Box::pin(async move {
            if destination.as_str().trim().is_empty() {
                return Err(KeyError::InvalidDestination("empty destination".into()));
            }
            if self.passphrase.is_empty() {
                return Err(KeyError::Derivation("empty passphrase".into()));
            }
            Ok(KeyMaterial::derive(
                self.passphrase.as_bytes(),
                destination.as_str(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn key_is_bound_to_destination() {
        let keys = PassphraseKeys::new("correct horse");
        let a = keys.derive_key(&DestinationId::new("a")).await.unwrap();
        let b = keys.derive_key(&DestinationId::new("b")).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(a, KeyMaterial::derive(b"correct horse", "a"));
    }

    #[tokio::test]
    async fn rejects_empty_inputs() {
        assert!(matches!(
            PassphraseKeys::new("pw").derive_key(&DestinationId::new(" ")).await,
            Err(KeyError::InvalidDestination(_))
        ));
        assert!(matches!(
            PassphraseKeys::new("").derive_key(&DestinationId::new("d")).await,
            Err(KeyError::Derivation(_))
        ));
    }
}
