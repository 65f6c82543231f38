//! Password authentication schemes.
//!
//! - MD5: `"md5" + hex(md5(hex(md5(password + user)) + salt))`. The proxy
//!   verifies it for clients and computes it for upstream servers.
//! - SCRAM-SHA-256 (RFC 5802), client side only, for upstream servers that
//!   require it.
//!
//! SASLprep normalization is not applied; ASCII credentials are unaffected.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::ProtocolError;

/// SASL mechanism name for SCRAM-SHA-256.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

fn md5_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// The stored form of an MD5 password: `"md5" + hex(md5(password + user))`.
///
/// This is what `pg_authid.rolpassword` holds for MD5 roles.
pub fn md5_stored_password(user: &str, password: &str) -> String {
    format!("md5{}", md5_hex(&[password.as_bytes(), user.as_bytes()]))
}

/// The value a client sends in response to an MD5 challenge.
pub fn md5_password_response(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let inner = md5_hex(&[password.as_bytes(), user.as_bytes()]);
    md5_salted(&inner, salt)
}

/// Salt an already computed `hex(md5(password + user))`.
///
/// Accepts the inner hash with or without its `md5` prefix.
pub fn md5_salted(inner_hex: &str, salt: &[u8; 4]) -> String {
    let inner = inner_hex.strip_prefix("md5").unwrap_or(inner_hex);
    format!("md5{}", md5_hex(&[inner.as_bytes(), salt]))
}

/// Constant-time string comparison for secrets.
pub fn secure_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

type HmacSha256 = Hmac<Sha256>;

/// SCRAM-SHA-256 client exchange.
///
/// ```text
/// client-first  ->  n,,n=<user>,r=<nonce>
/// server-first  <-  r=<nonce+server>,s=<salt>,i=<iterations>
/// client-final  ->  c=biws,r=<nonce+server>,p=<proof>
/// server-final  <-  v=<signature>
/// ```
pub struct ScramClient {
    password: String,
    nonce: String,
    client_first_bare: String,
    expected_server_signature: Option<[u8; 32]>,
}

impl ScramClient {
    pub fn new(user: &str, password: &str) -> Self {
        let nonce_bytes: [u8; 18] = rand::rng().random();
        Self::with_nonce(user, password, BASE64.encode(nonce_bytes))
    }

    fn with_nonce(user: &str, password: &str, nonce: String) -> Self {
        Self {
            password: password.to_string(),
            client_first_bare: format!("n={},r={}", user, nonce),
            nonce,
            expected_server_signature: None,
        }
    }

    /// Payload of the SASLInitialResponse.
    pub fn client_first(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare).into_bytes()
    }

    /// Consume the server-first message and produce the client-final message.
    pub fn client_final(&mut self, server_first: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let server_first = std::str::from_utf8(server_first)
            .map_err(|_| ProtocolError::Auth("SCRAM: server-first is not UTF-8".into()))?;

        let mut server_nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in server_first.split(',') {
            if let Some(v) = attr.strip_prefix("r=") {
                server_nonce = Some(v);
            } else if let Some(v) = attr.strip_prefix("s=") {
                salt = Some(
                    BASE64
                        .decode(v)
                        .map_err(|_| ProtocolError::Auth("SCRAM: invalid salt".into()))?,
                );
            } else if let Some(v) = attr.strip_prefix("i=") {
                iterations = Some(
                    v.parse::<u32>()
                        .map_err(|_| ProtocolError::Auth("SCRAM: invalid iteration count".into()))?,
                );
            }
        }

        let (Some(server_nonce), Some(salt), Some(iterations)) = (server_nonce, salt, iterations)
        else {
            return Err(ProtocolError::Auth(
                "SCRAM: server-first is missing attributes".into(),
            ));
        };
        if !server_nonce.starts_with(&self.nonce) {
            return Err(ProtocolError::Auth("SCRAM: server nonce mismatch".into()));
        }

        let mut salted = [0u8; 32];
        pbkdf2_hmac::<Sha256>(self.password.as_bytes(), &salt, iterations, &mut salted);

        let without_proof = format!("c=biws,r={server_nonce}");
        let auth_message = format!("{},{},{}", self.client_first_bare, server_first, without_proof);

        let client_key = hmac(&salted, b"Client Key")?;
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();
        let client_signature = hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();

        let server_key = hmac(&salted, b"Server Key")?;
        self.expected_server_signature = Some(hmac(&server_key, auth_message.as_bytes())?);

        Ok(format!("{without_proof},p={}", BASE64.encode(proof)).into_bytes())
    }

    /// Check the server-final message.
    pub fn verify_server_final(&self, server_final: &[u8]) -> Result<(), ProtocolError> {
        let server_final = std::str::from_utf8(server_final)
            .map_err(|_| ProtocolError::Auth("SCRAM: server-final is not UTF-8".into()))?;

        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(ProtocolError::Auth(format!("SCRAM: server error: {err}")));
        }

        let signature = server_final
            .split(',')
            .find_map(|attr| attr.strip_prefix("v="))
            .ok_or_else(|| ProtocolError::Auth("SCRAM: server-final has no signature".into()))
            .and_then(|v| {
                BASE64
                    .decode(v)
                    .map_err(|_| ProtocolError::Auth("SCRAM: invalid server signature".into()))
            })?;

        let expected = self
            .expected_server_signature
            .ok_or_else(|| ProtocolError::Auth("SCRAM: server-final before server-first".into()))?;

        if bool::from(signature.as_slice().ct_eq(&expected)) {
            Ok(())
        } else {
            Err(ProtocolError::Auth("SCRAM: server signature mismatch".into()))
        }
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<[u8; 32], ProtocolError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ProtocolError::Auth(format!("SCRAM: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_vector() {
        let salt = [0x31, 0x32, 0x33, 0x34];
        let inner = md5_hex(&[b"secret", b"alice"]);
        let expected = format!("md5{}", md5_hex(&[inner.as_bytes(), b"1234"]));

        assert_eq!(md5_password_response("alice", "secret", &salt), expected);
        assert_eq!(expected.len(), 35);
    }

    #[test]
    fn test_md5_known_value() {
        // SELECT 'md5' || md5('secret' || 'alice');
        assert_eq!(
            md5_stored_password("alice", "secret"),
            format!("md5{:x}", Md5::digest(b"secretalice"))
        );
    }

    #[test]
    fn test_md5_salted_from_stored_matches_plaintext() {
        let salt = *b"abcd";
        let stored = md5_stored_password("bob", "pw");
        assert_eq!(
            md5_salted(&stored, &salt),
            md5_password_response("bob", "pw", &salt)
        );
    }

    #[test]
    fn test_md5_salt_changes_response() {
        assert_ne!(
            md5_password_response("alice", "secret", b"1234"),
            md5_password_response("alice", "secret", b"1235")
        );
    }

    #[test]
    fn test_secure_eq() {
        assert!(secure_eq("md5abc", "md5abc"));
        assert!(!secure_eq("md5abc", "md5abd"));
        assert!(!secure_eq("md5abc", "md5ab"));
    }

    // RFC 7677 section 3 test vector.
    #[test]
    fn test_scram_rfc7677_vector() {
        let mut client =
            ScramClient::with_nonce("user", "pencil", "rOprNGfwEbeRWgbNEkqO".to_string());
        assert_eq!(client.client_first(), b"n,,n=user,r=rOprNGfwEbeRWgbNEkqO".to_vec());

        let server_first =
            b"r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        let client_final = client.client_final(server_first).unwrap();
        assert_eq!(
            String::from_utf8(client_final).unwrap(),
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );

        client
            .verify_server_final(b"v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap();
        assert!(client.verify_server_final(b"v=AAAA").is_err());
    }

    #[test]
    fn test_scram_rejects_foreign_nonce() {
        let mut client = ScramClient::with_nonce("user", "pencil", "abc".to_string());
        let err = client.client_final(b"r=xyz,s=QUJD,i=4096").unwrap_err();
        assert!(err.to_string().contains("nonce"));
    }
}
