use crate::domain::ConfigError;
use std::path::PathBuf;

/// Load and parse an environment variable.
/// Returns Ok(()) if the variable doesn't exist (keeps default).
pub fn load_env_var<T>(name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = std::env::var(name) {
        *target = value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: name.to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}

pub fn load_env_string(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        *target = value;
    }
}

pub fn load_env_path(name: &str, target: &mut PathBuf) {
    if let Ok(value) = std::env::var(name) {
        *target = PathBuf::from(value);
    }
}

/// Off unless the variable is exactly `true`.
pub fn load_env_flag_opt_in(name: &str, target: &mut bool) {
    if let Ok(value) = std::env::var(name) {
        *target = value.trim() == "true";
    }
}

/// On unless the variable is exactly `false`.
pub fn load_env_flag_opt_out(name: &str, target: &mut bool) {
    if let Ok(value) = std::env::var(name) {
        *target = value.trim() != "false";
    }
}

/// Parse a size such as `20m`, `512k`, `1g` or a plain byte count.
pub fn parse_size(raw: &str) -> Result<u64, String> {
    let trimmed = raw.trim().to_lowercase();
    let (digits, multiplier) = match trimmed.chars().last() {
        Some('k') => (&trimmed[..trimmed.len() - 1], 1024),
        Some('m') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('g') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        _ => (trimmed.as_str(), 1),
    };
    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{raw}': {e}"))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{raw}' overflows"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("20m").unwrap(), 20 * 1024 * 1024);
        assert_eq!(parse_size("512K").unwrap(), 512 * 1024);
        assert_eq!(parse_size("1g").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert!(parse_size("m").is_err());
        assert!(parse_size("twenty").is_err());
    }

    #[test]
    fn test_load_env_var_invalid_value() {
        temp_env::with_var("SHOPRA_TEST_NUMBER", Some("abc"), || {
            let mut target = 3u32;
            let err = load_env_var("SHOPRA_TEST_NUMBER", &mut target).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }));
            assert_eq!(target, 3);
        });
    }

    #[test]
    fn test_flags() {
        temp_env::with_vars(
            [("SHOPRA_TEST_IN", Some("yes")), ("SHOPRA_TEST_OUT", Some("no"))],
            || {
                let mut opt_in = true;
                load_env_flag_opt_in("SHOPRA_TEST_IN", &mut opt_in);
                assert!(!opt_in);

                let mut opt_out = false;
                load_env_flag_opt_out("SHOPRA_TEST_OUT", &mut opt_out);
                assert!(opt_out);
            },
        );
    }
}
