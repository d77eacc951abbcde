use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("invalid service type '{0}': expected a single letter A-Z")]
    InvalidServiceType(String),
    #[error("invalid counter '{0}': expected a number between 1 and 99")]
    InvalidCounter(String),
}
