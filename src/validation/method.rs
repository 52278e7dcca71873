use std::sync::Arc;

use super::{Rejection, Validator};
use crate::protocol::{Message, MethodAllowList};
use crate::session::Session;

/// Accepts allow-listed methods and responses (non-empty id, no method).
pub struct MethodValidator {
    allow_list: Arc<MethodAllowList>,
}

impl MethodValidator {
    pub fn new(allow_list: Arc<MethodAllowList>) -> Self {
        Self { allow_list }
    }
}

impl Validator for MethodValidator {
    fn name(&self) -> &'static str {
        "method"
    }

    fn validate(&self, _session: &Session, message: &Message) -> Result<(), Rejection> {
        match message.method.as_deref() {
            Some(method) if self.allow_list.contains(method) => Ok(()),
            Some(method) => Err(Rejection::InvalidMethod(method.to_string())),
            None if message.is_response() => Ok(()),
            None => Err(Rejection::InvalidMethod(String::new())),
        }
    }
}
