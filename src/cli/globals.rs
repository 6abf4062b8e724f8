use secrecy::SecretString;

/// Signing material shared across the server, kept out of logs and debug
/// output by `SecretString`.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub access_secret: SecretString,
    pub refresh_secret: SecretString,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(access_secret: SecretString, refresh_secret: SecretString) -> Self {
        Self {
            access_secret,
            refresh_secret,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_global_args() {
        let args = GlobalArgs::new(
            SecretString::from("s1gn1ng-access".to_string()),
            SecretString::from("s1gn1ng-refresh".to_string()),
        );
        assert_eq!(args.access_secret.expose_secret(), "s1gn1ng-access");
        assert_eq!(args.refresh_secret.expose_secret(), "s1gn1ng-refresh");

        // SecretString keeps the value out of debug output.
        let redacted = format!("{args:?}");
        assert!(!redacted.contains("s1gn1ng"));
    }
}
