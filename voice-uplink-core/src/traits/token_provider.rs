/// Supplies the bearer token for upload requests.
///
/// Tokens are fetched once per upload; refreshing is the provider's concern.
pub trait TokenProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        (!self.0.is_empty()).then(|| self.0.clone())
    }
}

/// Reads the token from an environment variable on every call.
#[derive(Debug, Clone)]
pub struct EnvToken {
    pub var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenProvider for EnvToken {
    fn bearer_token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_static_token_is_absent() {
        assert_eq!(StaticToken(String::new()).bearer_token(), None);
        assert_eq!(StaticToken("abc".into()).bearer_token(), Some("abc".into()));
    }

    #[test]
    fn unset_env_token_is_absent() {
        let provider = EnvToken::new("VOICE_UPLINK_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert_eq!(provider.bearer_token(), None);
    }
}
