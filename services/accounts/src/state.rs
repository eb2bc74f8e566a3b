use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use crate::notify::Notifier;
use crate::store::DirectoryStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DirectoryStore>,
    pub notifier: Arc<dyn Notifier>,
    pub decoding_key: Arc<DecodingKey>,
    pub validation: Validation,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DirectoryStore>,
        notifier: Arc<dyn Notifier>,
        jwt_secret: &str,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            store,
            notifier,
            decoding_key: Arc::new(DecodingKey::from_secret(jwt_secret.as_bytes())),
            validation,
        }
    }
}
