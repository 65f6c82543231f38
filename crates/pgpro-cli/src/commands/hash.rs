//! `pgpro hash`: MD5 password values.

use anyhow::{Context, Result, bail};
use pgpro_protocol::auth::{md5_password_response, md5_stored_password};

/// Without a salt, the `md5...` form to store in the users file. With one,
/// the response a client sends to that challenge.
pub fn hash(user: &str, password: &str, salt: Option<&str>) -> Result<String> {
    let Some(salt) = salt else {
        return Ok(md5_stored_password(user, password));
    };

    let bytes = hex::decode(salt).context("salt must be hex")?;
    let Ok(salt) = <[u8; 4]>::try_from(bytes.as_slice()) else {
        bail!("salt must be exactly 4 bytes, got {}", bytes.len());
    };
    Ok(md5_password_response(user, password, &salt))
}
