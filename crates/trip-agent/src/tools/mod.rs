//! The search tools the travel agent can use.

mod flights;
mod hotels;
mod serpapi;

pub use flights::{FlightsFinder, FlightsInput, NO_FLIGHTS};
pub use hotels::{HotelsFinder, HotelsInput, NO_HOTELS};
pub use serpapi::{SearchError, SerpApiClient};
