//! TLS client configuration.
//!
//! The runtime does not load certificate material itself. The caller hands
//! in a fully prepared `rustls::ClientConfig`, trust store included and
//! carrying a client credential when the deployment uses mutual TLS; how
//! that material gets off disk is the job of the embedding application's
//! configuration layer. At connect time the configured hostname goes into
//! SNI and rustls negotiates TLS 1.2+.

use rustls::ClientConfig;
use std::sync::Arc;

/// TLS material for a client connection.
#[derive(Clone)]
pub struct TlsConfig {
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Wrap a caller-prepared rustls configuration.
    pub fn new(client_config: Arc<ClientConfig>) -> Self {
        Self { client_config }
    }

    pub(crate) fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::RootCertStore;

    #[test]
    fn clones_share_the_caller_supplied_config() {
        let config = ClientConfig::builder()
            .with_root_certificates(RootCertStore::empty())
            .with_no_client_auth();
        let tls = TlsConfig::new(Arc::new(config));
        let copy = tls.clone();
        assert!(Arc::ptr_eq(&tls.client_config(), &copy.client_config()));
    }
}
