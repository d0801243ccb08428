use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod bookings;
pub mod gateway;
pub mod itineraries;
pub mod payments;
pub mod reservations;
