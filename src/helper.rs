use std::str::FromStr;

/// Read an environment variable, treating an empty value as unset.
pub fn env_opt_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Parse the value of the given environment variable, or use `default` when it is unset.
pub fn parse_from_env_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match env_opt_var(key) {
        Some(value) => value.trim().parse::<T>().map_err(|_| {
            anyhow::anyhow!(
                "invalid value {value} for ${key}, expect type: {}",
                std::any::type_name::<T>()
            )
        }),
        None => {
            tracing::debug!("{key} not set, using default");
            Ok(default)
        }
    }
}

#[test]
fn parse_env_values() {
    std::env::set_var("FOLIO_TEST_PORT", "8081");
    std::env::set_var("FOLIO_TEST_BAD", "yes please");
    std::env::set_var("FOLIO_TEST_EMPTY", "");

    assert_eq!(parse_from_env_or("FOLIO_TEST_PORT", 1_u16).unwrap(), 8081);
    assert!(parse_from_env_or("FOLIO_TEST_BAD", false).is_err());
    assert_eq!(parse_from_env_or("FOLIO_TEST_EMPTY", 7_u64).unwrap(), 7);
    assert_eq!(env_opt_var("FOLIO_TEST_EMPTY"), None);
    assert_eq!(env_opt_var("FOLIO_TEST_UNSET_FOR_SURE"), None);
}
