//! Canonical parameter encoding and HMAC-SHA512 signing for the redirect
//! payment gateway.
//!
//! Both sides of the exchange must produce byte-identical signable strings,
//! so every step here is deterministic: empty values are dropped, keys are
//! sorted by byte order and values are form-urlencoded (space as `+`).

use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::collections::BTreeMap;
use url::form_urlencoded;

use crate::errors::ServiceError;

type HmacSha512 = Hmac<Sha512>;

/// Sorted, non-empty parameter set. Values are kept raw and encoded on render,
/// which makes [`canonicalize`] idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalParams(BTreeMap<String, String>);

impl CanonicalParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Raw key/value pairs as a JSON object, for audit storage
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    }
}

impl IntoIterator for CanonicalParams {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Drops empty values and sorts by key. Later duplicates replace earlier ones.
pub fn canonicalize<I, K, V>(params: I) -> CanonicalParams
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    CanonicalParams(
        params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.is_empty())
            .collect(),
    )
}

/// `application/x-www-form-urlencoded` encoding of a single component
pub fn encode_component(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// `key=value` pairs joined with `&`, in canonical order
pub fn build_signable_string(params: &CanonicalParams) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// HMAC-SHA512 over `data`, rendered as upper-case hex
pub fn sign(data: &str, secret: &str) -> Result<String, ServiceError> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("invalid gateway key: {e}")))?;
    mac.update(data.as_bytes());
    Ok(hex::encode_upper(mac.finalize().into_bytes()))
}

/// Recomputes the signature and compares case-sensitively in constant time
pub fn verify(data: &str, secret: &str, provided: &str) -> bool {
    match sign(data, secret) {
        Ok(expected) => constant_time_eq(&expected, provided),
        Err(_) => false,
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_matches_known_hmac_sha512_vector() {
        let sig = sign("The quick brown fox jumps over the lazy dog", "key").unwrap();
        assert_eq!(
            sig,
            "B42AF09057BAC1E2D41708E48A902E09B5FF7F12AB428A4FE86653C73DD248FB\
             82F948A549F7B791A5B41915EE4D1EC3935357E4E2317250D0372AFA2EBEEB3A"
        );
    }

    #[test]
    fn signable_string_is_sorted_encoded_and_skips_empty() {
        let params = canonicalize(vec![
            ("vnp_TmnCode", "DEMO0001"),
            ("vnp_OrderInfo", "ORDER:3f2c"),
            ("vnp_BankCode", ""),
            ("vnp_Command", "pay"),
            ("vnp_Amount", "14000000"),
        ]);
        let data = build_signable_string(&params);
        assert_eq!(
            data,
            "vnp_Amount=14000000&vnp_Command=pay&vnp_OrderInfo=ORDER%3A3f2c&vnp_TmnCode=DEMO0001"
        );
        assert_eq!(
            sign(&data, "SECRETKEY123").unwrap(),
            "55C58ABC4A2F320488FED1347932684AC9593522DC6BADF5FEF9B83EF4A02E50\
             065CB77B231C380456820A6E336FE2BB6A991CD1C432F834586651FF7FC5A74B"
        );
    }

    #[test]
    fn spaces_encode_as_plus() {
        assert_eq!(encode_component("Thanh toan don hang"), "Thanh+toan+don+hang");
    }

    #[test]
    fn verify_is_case_sensitive() {
        let sig = sign("a=1", "secret").unwrap();
        assert!(verify("a=1", "secret", &sig));
        assert!(!verify("a=1", "secret", &sig.to_lowercase()));
        assert!(!verify("a=2", "secret", &sig));
        assert!(!verify("a=1", "other", &sig));
        assert!(!verify("a=1", "secret", ""));
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let once = canonicalize(vec![("b", "x y"), ("a", "1"), ("c", "")]);
        let twice = canonicalize(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn keys_sort_by_byte_order() {
        let params = canonicalize(vec![("vnp_b", "1"), ("vnp_B", "2"), ("vnp_a", "3")]);
        let keys: Vec<_> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["vnp_B", "vnp_a", "vnp_b"]);
    }
}
