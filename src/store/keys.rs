// Key layout. Every record lives under `<namespace>/<id>`; identifiers never
// contain '/', which is rejected at the boundary.

pub const INTENT: &str = "intent/";
pub const INTENT_PAIR: &str = "intent_pair/";
pub const DIGEST: &str = "digest/";
pub const INTENT_DIGEST: &str = "intent_digest/";
pub const RECEIPT: &str = "receipt/";
pub const PRODUCT: &str = "product/";
pub const USER: &str = "user/";
pub const MERCHANT: &str = "merchant/";
pub const WEBHOOK: &str = "webhook/";

pub fn intent(id: &str) -> Vec<u8> {
    format!("{INTENT}{id}").into_bytes()
}

/// Uniqueness index: one live intent per (product, user)
pub fn intent_pair(product_id: &str, user_id: &str) -> Vec<u8> {
    format!("{INTENT_PAIR}{product_id}/{user_id}").into_bytes()
}

pub fn digest(digest: &str) -> Vec<u8> {
    format!("{DIGEST}{digest}").into_bytes()
}

/// Reverse index used to cascade digest deletion
pub fn intent_digest(intent_id: &str, digest: &str) -> Vec<u8> {
    format!("{INTENT_DIGEST}{intent_id}/{digest}").into_bytes()
}

pub fn intent_digest_prefix(intent_id: &str) -> Vec<u8> {
    format!("{INTENT_DIGEST}{intent_id}/").into_bytes()
}

pub fn receipt(id: &str) -> Vec<u8> {
    format!("{RECEIPT}{id}").into_bytes()
}

pub fn product(id: &str) -> Vec<u8> {
    format!("{PRODUCT}{id}").into_bytes()
}

pub fn user(id: &str) -> Vec<u8> {
    format!("{USER}{id}").into_bytes()
}

pub fn merchant(id: &str) -> Vec<u8> {
    format!("{MERCHANT}{id}").into_bytes()
}

pub fn webhook(id: &str) -> Vec<u8> {
    format!("{WEBHOOK}{id}").into_bytes()
}

pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.contains('/')
}
