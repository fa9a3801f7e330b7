//! Entity id construction

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Service id: base64 of the name plus `.1` for normal services, `.0`
/// for conjectured ones (e.g. a database seen only from its callers).
pub fn service_id(name: &str, is_normal: bool) -> String {
    format!("{}.{}", BASE64.encode(name), u8::from(is_normal))
}

/// Splits a service id back into name and normal flag.
pub fn parse_service_id(id: &str) -> Option<(String, bool)> {
    let (encoded, flag) = id.rsplit_once('.')?;
    let is_normal = match flag {
        "1" => true,
        "0" => false,
        _ => return None,
    };
    let name = String::from_utf8(BASE64.decode(encoded).ok()?).ok()?;
    Some((name, is_normal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_id_encodes_name_and_flag() {
        assert_eq!(service_id("svc", true), "c3Zj.1");
        assert_eq!(service_id("mysql:3306", false), "bXlzcWw6MzMwNg==.0");
        assert_eq!(parse_service_id("c3Zj.1"), Some(("svc".to_string(), true)));
        assert_eq!(parse_service_id("c3Zj"), None);
    }
}
