use std::collections::HashMap;
use std::sync::RwLock;

use lazy_static::lazy_static;

use crate::protocol::Response;

/// A registered custom verifier: pure function of the response, `Err`
/// carries the failure message.
pub type CustomVerifyFn = fn(&Response) -> Result<(), String>;

lazy_static! {
    static ref REGISTRY: RwLock<HashMap<String, CustomVerifyFn>> = RwLock::new(HashMap::new());
}

/// Registers a custom verifier under `name`. Registration happens during
/// executor construction; the table is read-only afterwards.
pub fn register_custom(name: &str, verifier: CustomVerifyFn) {
    if let Ok(mut registry) = REGISTRY.write() {
        registry.insert(name.to_owned(), verifier);
    }
}

#[must_use]
pub fn lookup_custom(name: &str) -> Option<CustomVerifyFn> {
    REGISTRY.read().ok()?.get(name).copied()
}
