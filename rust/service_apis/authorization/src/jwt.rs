use data_encoding::{BASE32_NOPAD, BASE64URL_NOPAD};
use nkeys::KeyPair;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};
use thiserror::Error;

const HEADER_TYPE: &str = "JWT";
const HEADER_ALGORITHM: &str = "ed25519-nkey";

#[derive(Error, Debug)]
pub enum JwtError {
    #[error("malformed token: {0}")]
    Malformed(&'static str),

    #[error("unsupported token header: {0}")]
    UnsupportedHeader(String),

    #[error("token serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("token encoding failed: {0}")]
    Encoding(String),

    #[error("signature verification failed: {0}")]
    Signature(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct ClaimsHeader {
    #[serde(rename = "typ")]
    header_type: String,
    #[serde(rename = "alg")]
    algorithm: String,
}

/// Encode `claims` as an `ed25519-nkey` JWT signed by `signer`.
///
/// The `jti` claim is stamped from a SHA-512/256 of the claims body the
/// way nsc does, so identical claims produce identical ids.
pub fn encode_jwt<T: Serialize>(claims: &T, signer: &KeyPair) -> Result<String, JwtError> {
    let header = ClaimsHeader {
        header_type: HEADER_TYPE.to_string(),
        algorithm: HEADER_ALGORITHM.to_string(),
    };

    let mut body = serde_json::to_value(claims)?;
    let object = body
        .as_object_mut()
        .ok_or(JwtError::Malformed("claims must serialize to an object"))?;
    object.remove("jti");
    let digest = Sha512_256::digest(serde_json::to_vec(&body)?);
    let jwt_id = BASE32_NOPAD.encode(&digest);
    body.as_object_mut()
        .expect("still an object")
        .insert("jti".to_string(), serde_json::Value::String(jwt_id));

    let encoded_header = BASE64URL_NOPAD.encode(&serde_json::to_vec(&header)?);
    let encoded_body = BASE64URL_NOPAD.encode(&serde_json::to_vec(&body)?);
    let signing_input = format!("{encoded_header}.{encoded_body}");

    let signature = signer
        .sign(signing_input.as_bytes())
        .map_err(|e| JwtError::Encoding(e.to_string()))?;
    let encoded_signature = BASE64URL_NOPAD.encode(&signature);

    Ok(format!("{signing_input}.{encoded_signature}"))
}

/// Decode a token, verifying the signature against the embedded issuer.
pub fn decode_jwt<T: DeserializeOwned>(token: &str) -> Result<T, JwtError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(JwtError::Malformed("expected three dot-separated parts"));
    }

    let header: ClaimsHeader = decode_segment(parts[0])?;
    if header.header_type != HEADER_TYPE {
        return Err(JwtError::UnsupportedHeader(header.header_type));
    }
    if header.algorithm != HEADER_ALGORITHM {
        return Err(JwtError::UnsupportedHeader(header.algorithm));
    }

    let body: serde_json::Value = decode_segment(parts[1])?;
    let issuer = body
        .get("iss")
        .and_then(|v| v.as_str())
        .ok_or(JwtError::Malformed("missing issuer claim"))?;

    let verifier =
        KeyPair::from_public_key(issuer).map_err(|e| JwtError::Signature(e.to_string()))?;
    let signature = BASE64URL_NOPAD
        .decode(parts[2].as_bytes())
        .map_err(|_| JwtError::Malformed("signature is not base64url"))?;
    let signing_input = &token[..parts[0].len() + 1 + parts[1].len()];
    verifier
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|e| JwtError::Signature(e.to_string()))?;

    Ok(serde_json::from_value(body)?)
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, JwtError> {
    let raw = BASE64URL_NOPAD
        .decode(segment.as_bytes())
        .map_err(|_| JwtError::Malformed("segment is not base64url"))?;
    Ok(serde_json::from_slice(&raw)?)
}
