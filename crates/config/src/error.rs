use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error deserializing config from environment: {0}")]
    Env(#[from] envy::Error),
}
