use crate::error::ApiError;
use validator::Validate;

const MAX_ID_LENGTH: usize = 128;

pub fn validate<T: Validate>(value: &T) -> Result<(), ApiError> {
    value
        .validate()
        .map_err(|err| ApiError::Validation(err.to_string()))
}

/// Trimmed document id taken from the URL. A `/` would address a different
/// document.
pub fn path_id<'a>(name: &str, value: &'a str) -> Result<&'a str, ApiError> {
    let value = value.trim();
    if value.is_empty() || value.len() > MAX_ID_LENGTH {
        return Err(ApiError::Validation(format!(
            "{name} must be 1-{MAX_ID_LENGTH} characters"
        )));
    }
    if value.contains('/') {
        return Err(ApiError::Validation(format!("{name} must not contain '/'")));
    }
    Ok(value)
}
