//! Request key construction.
//!
//! Cache and dedup entries share one key space, so a key must embed every
//! parameter that affects the result.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::Error;

/// Build a request key from an operation name and its parameters.
///
/// The parameters are serialized to JSON and hashed, so keys stay short and
/// free of separator characters regardless of the parameter shape.
pub fn request_key<P: Serialize + ?Sized>(operation: &str, params: &P) -> Result<String, Error> {
    let json = serde_json::to_vec(params)?;
    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update(b"\n");
    hasher.update(&json);
    Ok(format!("{operation}:{}", hex::encode(hasher.finalize())))
}
