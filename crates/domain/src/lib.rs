pub mod auth;
pub mod booking;
pub mod customize;
pub mod error;
pub mod idempotency;
pub mod identity;
pub mod itinerary;
pub mod payment;
pub mod ports;
pub mod reservation;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
