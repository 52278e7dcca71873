use super::{Rejection, Validator};
use crate::protocol::Message;
use crate::session::Session;

/// Bounds the request id length and the serialized `params` region.
pub struct SizeValidator {
    max_id_bytes: usize,
    max_params_bytes: usize,
}

impl SizeValidator {
    pub fn new(max_id_bytes: usize, max_params_bytes: usize) -> Self {
        Self {
            max_id_bytes,
            max_params_bytes,
        }
    }
}

impl Validator for SizeValidator {
    fn name(&self) -> &'static str {
        "size"
    }

    fn validate(&self, _session: &Session, message: &Message) -> Result<(), Rejection> {
        if let Some(id) = &message.id {
            let len = id.byte_len();
            if len > self.max_id_bytes {
                return Err(Rejection::IdTooLong {
                    len,
                    max: self.max_id_bytes,
                });
            }
        }

        let size = message
            .params_size()
            .map_err(|e| Rejection::MalformedParams(e.to_string()))?;
        match size {
            Some(size) if size > self.max_params_bytes => Err(Rejection::ParamsTooLarge {
                size,
                max: self.max_params_bytes,
            }),
            _ => Ok(()),
        }
    }
}
