use std::sync::Arc;

use musafir_domain::ports::bookings::BookingRepository;
use musafir_domain::ports::itineraries::ItineraryRepository;
use musafir_domain::ports::payments::PaymentRepository;
use musafir_domain::ports::reservations::ReservationRepository;

use crate::config::AppConfig;
use crate::db::{self, DbConfig};

pub mod memory;
pub mod surreal;

pub use memory::{
    InMemoryBookingRepository, InMemoryItineraryRepository, InMemoryPaymentRepository,
    InMemoryReservationRepository,
};
pub use surreal::{
    SurrealBookingRepository, SurrealItineraryRepository, SurrealPaymentRepository,
    SurrealReservationRepository,
};

/// Explicitly constructed store handles, passed down instead of a
/// process-wide singleton so tests can swap in in-memory stores.
#[derive(Clone)]
pub struct Repositories {
    pub itineraries: Arc<dyn ItineraryRepository>,
    pub reservations: Arc<dyn ReservationRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub bookings: Arc<dyn BookingRepository>,
}

impl Repositories {
    pub fn memory() -> Self {
        Self {
            itineraries: Arc::new(InMemoryItineraryRepository::new()),
            reservations: Arc::new(InMemoryReservationRepository::new()),
            payments: Arc::new(InMemoryPaymentRepository::new()),
            bookings: Arc::new(InMemoryBookingRepository::new()),
        }
    }

    pub async fn surreal(config: &DbConfig) -> anyhow::Result<Self> {
        let client = db::connect(config).await?;
        surreal::ensure_schema(&client).await?;
        Ok(Self {
            itineraries: Arc::new(SurrealItineraryRepository::with_client(client.clone())),
            reservations: Arc::new(SurrealReservationRepository::with_client(client.clone())),
            payments: Arc::new(SurrealPaymentRepository::with_client(client.clone())),
            bookings: Arc::new(SurrealBookingRepository::with_client(client)),
        })
    }

    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        match config.data_backend.as_str() {
            "surreal" => Self::surreal(&DbConfig::from_app_config(config)).await,
            _ => Ok(Self::memory()),
        }
    }
}
