use rand::{rngs::OsRng, RngCore};
use tracing::error;

use crate::error::TokenError;

pub const TOKEN_BYTE_LEN: usize = 16;

/// Mints a bearer token: 16 bytes from the OS CSPRNG as 32 lowercase hex chars.
pub fn generate_token() -> Result<String, TokenError> {
    let mut bytes = [0u8; TOKEN_BYTE_LEN];
    OsRng.try_fill_bytes(&mut bytes).map_err(|e| {
        error!(error = %e, "os rng failure");
        TokenError(e)
    })?;
    Ok(hex::encode(bytes))
}
