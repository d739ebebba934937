//! Root CA and leaf certificate management.

use std::sync::Arc;

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, PKCS_RSA_SHA256,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use weft_api::meta::{
    ROOT_CA_SECRET_NAME, SECRET_KEY_CA_CERT, SECRET_KEY_TLS_CERT, SECRET_KEY_TLS_KEY,
};
use weft_api::{DynamicObject, ObjectKey, OwnerReference, Secret};
use weft_store::{ObjectStore, StoreError};

use crate::error::TlsError;

/// CA and leaf validity. Rotation is an explicit operation, not a schedule.
const VALIDITY_DAYS: i64 = 10 * 365;
const KEY_BITS: usize = 2048;

/// What a leaf certificate is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafUsage {
    /// Presented by a function or provider runtime.
    Server,
    /// Presented by a client dialing a runtime (the engine, or a provider's
    /// webhook client).
    Client,
}

/// The root certificate authority, loaded from or persisted to its secret.
pub struct CertificateAuthority {
    certificate: Certificate,
    key_pair: KeyPair,
    cert_pem: String,
}

impl CertificateAuthority {
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }
}

pub struct TlsBootstrap {
    store: Arc<dyn ObjectStore>,
    namespace: String,
}

impl TlsBootstrap {
    pub fn new(store: Arc<dyn ObjectStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Load the root CA from its secret, generating and persisting it when
    /// the secret is absent or incomplete.
    pub async fn ensure_ca(&self) -> Result<CertificateAuthority, TlsError> {
        let key = self.secret_key(ROOT_CA_SECRET_NAME);
        let existing = match self.store.get(&key).await {
            Ok(obj) => Some(self.decode_secret(obj)?),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };

        if let Some(secret) = &existing {
            if let (Some(cert), Some(key_pem)) = (
                secret.get(SECRET_KEY_TLS_CERT),
                secret.get(SECRET_KEY_TLS_KEY),
            ) {
                return load_ca(cert, key_pem);
            }
        }

        tracing::info!(secret = ROOT_CA_SECRET_NAME, "Generating root certificate authority");
        let key_pem = generate_rsa_key()?;
        let key_pair = KeyPair::from_pem_and_sign_algo(&key_pem, &PKCS_RSA_SHA256)?;

        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params
            .distinguished_name
            .push(DnType::CommonName, "crossplane-root-ca");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.not_before = time::OffsetDateTime::now_utc();
        params.not_after = params.not_before + time::Duration::days(VALIDITY_DAYS);
        let certificate = params.self_signed(&key_pair)?;
        let cert_pem = certificate.pem();

        let mut secret = existing.unwrap_or_else(|| {
            Secret::new(ROOT_CA_SECRET_NAME, self.namespace.clone())
        });
        secret.insert(SECRET_KEY_TLS_CERT, cert_pem.as_str());
        secret.insert(SECRET_KEY_TLS_KEY, key_pem.as_str());
        self.write_secret(secret, None).await?;

        Ok(CertificateAuthority {
            certificate,
            key_pair,
            cert_pem,
        })
    }

    /// Ensure `secret_name` holds a complete leaf signed by `ca`.
    ///
    /// Regenerates only when any of `tls.crt`, `tls.key` or `ca.crt` is
    /// missing; all three keys are written in one update. Returns whether a
    /// write happened.
    pub async fn ensure_leaf(
        &self,
        ca: &CertificateAuthority,
        secret_name: &str,
        dns_names: &[String],
        usage: LeafUsage,
        owner: Option<&DynamicObject>,
    ) -> Result<bool, TlsError> {
        let key = self.secret_key(secret_name);
        let existing = match self.store.get(&key).await {
            Ok(obj) => Some(self.decode_secret(obj)?),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };

        if let Some(secret) = &existing {
            let complete = secret.get(SECRET_KEY_TLS_CERT).is_some()
                && secret.get(SECRET_KEY_TLS_KEY).is_some()
                && secret.get(SECRET_KEY_CA_CERT).is_some();
            if complete {
                return Ok(false);
            }
        }

        tracing::info!(secret = secret_name, ?usage, "Issuing leaf certificate");
        let key_pem = generate_rsa_key()?;
        let key_pair = KeyPair::from_pem_and_sign_algo(&key_pem, &PKCS_RSA_SHA256)?;

        let mut params = CertificateParams::new(dns_names.to_vec())?;
        if let Some(first) = dns_names.first() {
            params.distinguished_name.push(DnType::CommonName, first);
        }
        params.not_before = time::OffsetDateTime::now_utc();
        params.not_after = params.not_before + time::Duration::days(VALIDITY_DAYS);
        params.extended_key_usages.push(match usage {
            LeafUsage::Server => ExtendedKeyUsagePurpose::ServerAuth,
            LeafUsage::Client => ExtendedKeyUsagePurpose::ClientAuth,
        });
        let certificate = params.signed_by(&key_pair, &ca.certificate, &ca.key_pair)?;

        let mut secret = existing
            .unwrap_or_else(|| Secret::new(secret_name, self.namespace.clone()));
        secret.insert(SECRET_KEY_TLS_CERT, certificate.pem().as_str());
        secret.insert(SECRET_KEY_TLS_KEY, key_pem.as_str());
        secret.insert(SECRET_KEY_CA_CERT, ca.cert_pem.as_str());
        self.write_secret(secret, owner).await?;
        Ok(true)
    }

    fn secret_key(&self, name: &str) -> ObjectKey {
        ObjectKey::namespaced(Secret::type_ref(), self.namespace.clone(), name)
    }

    fn decode_secret(&self, obj: DynamicObject) -> Result<Secret, TlsError> {
        obj.try_into_typed(&Secret::type_ref())
            .map_err(|e| TlsError::Store(StoreError::Invalid {
                message: e.to_string(),
            }))
    }

    async fn write_secret(
        &self,
        secret: Secret,
        owner: Option<&DynamicObject>,
    ) -> Result<(), TlsError> {
        let mut desired = weft_api::to_dynamic(&secret);
        if let Some(owner) = owner {
            desired
                .set_controller_ref(OwnerReference::controller(owner))
                .map_err(|e| TlsError::Crypto(e.to_string()))?;
        }
        let key = desired.key().expect("tls secrets are named");
        match self.store.get(&key).await {
            Ok(existing) => {
                desired.metadata.resource_version = existing.metadata.resource_version.clone();
                desired.metadata.uid = existing.metadata.uid.clone();
                // Keep owner references an earlier caller recorded.
                if desired.metadata.owner_references.is_empty() {
                    desired.metadata.owner_references = existing.metadata.owner_references;
                }
                self.store.update(&desired).await?;
            }
            Err(err) if err.is_not_found() => {
                self.store.create(&desired).await?;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }
}

fn generate_rsa_key() -> Result<String, TlsError> {
    let mut rng = rand::thread_rng();
    let private_key =
        RsaPrivateKey::new(&mut rng, KEY_BITS).map_err(|e| TlsError::Crypto(e.to_string()))?;
    let pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| TlsError::Crypto(e.to_string()))?;
    Ok(pem.to_string())
}

fn load_ca(cert: &[u8], key: &[u8]) -> Result<CertificateAuthority, TlsError> {
    let cert_pem = String::from_utf8(cert.to_vec())
        .map_err(|e| TlsError::Crypto(format!("CA certificate is not PEM: {e}")))?;
    let key_pem = String::from_utf8(key.to_vec())
        .map_err(|e| TlsError::Crypto(format!("CA key is not PEM: {e}")))?;

    let key_pair = KeyPair::from_pem_and_sign_algo(&key_pem, &PKCS_RSA_SHA256)?;
    // Rebuild a signing handle from the stored certificate. The re-signed
    // handle shares the stored subject and key, so leaves chain to the
    // persisted ca.crt.
    let params = CertificateParams::from_ca_cert_pem(&cert_pem)?;
    let certificate = params.self_signed(&key_pair)?;

    Ok(CertificateAuthority {
        certificate,
        key_pair,
        cert_pem,
    })
}
