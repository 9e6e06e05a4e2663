use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::Password;

/// Splits a `Basic <base64(user:pass)>` Authorization value. The password
/// may itself contain colons.
pub fn decode_basic_auth_header(header: &str) -> Result<(String, Password), anyhow::Error> {
    let encoded = header
        .strip_prefix("Basic ")
        .ok_or_else(|| anyhow::anyhow!("Authorization header is not basic auth"))?;

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| anyhow::anyhow!("Invalid basic auth encoding: {}", e))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|e| anyhow::anyhow!("Invalid basic auth encoding: {}", e))?;

    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("Invalid basic auth format"))?;

    Ok((username.to_string(), Password::new(password)))
}

pub fn encode_basic_auth_header(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", username, password))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_roundtrip_keeps_colons_in_password() {
        let header = encode_basic_auth_header("admin", "pa:ss");
        let (user, password) = decode_basic_auth_header(&header).unwrap();
        assert_eq!(user, "admin");
        assert_eq!(password.expose(), "pa:ss");
    }

    #[test]
    fn test_decode_rejects_bearer_and_garbage() {
        assert!(decode_basic_auth_header("Bearer abc").is_err());
        assert!(decode_basic_auth_header("Basic !!!").is_err());
        assert!(decode_basic_auth_header(&format!("Basic {}", STANDARD.encode("nocolon"))).is_err());
    }
}
