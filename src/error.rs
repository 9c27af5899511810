use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimulatorError {
    #[error("Not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid clock state: {0}")]
    InvalidClockState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Webhook delivery exhausted after {attempts} attempts")]
    DeliveryExhausted { attempts: u32 },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type SimResult<T> = Result<T, SimulatorError>;
