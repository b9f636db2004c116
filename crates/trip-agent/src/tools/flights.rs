use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use trip_agent_core::tool::{Tool, ToolResult};

use super::serpapi::{SearchParams, SerpApiClient};

/// Returned to the model when the search has no best flights.
pub const NO_FLIGHTS: &str = "No flights found.";

/// The arguments of [`FlightsFinder`].
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct FlightsInput {
    #[schemars(description = "Departure airport code (IATA)")]
    departure_airport: Option<String>,
    #[schemars(description = "Arrival airport code (IATA)")]
    arrival_airport: Option<String>,
    #[schemars(
        description = "Parameter defines the outbound date. The format is YYYY-MM-DD. e.g. 2024-06-22"
    )]
    outbound_date: Option<String>,
    #[schemars(
        description = "Parameter defines the return date. The format is YYYY-MM-DD. e.g. 2024-06-28"
    )]
    return_date: Option<String>,
    #[schemars(
        description = "Parameter defines the number of adults. Default to 1."
    )]
    adults: Option<u32>,
    #[schemars(
        description = "Parameter defines the number of children. Default to 0."
    )]
    children: Option<u32>,
    #[schemars(
        description = "Parameter defines the number of infants in seat. Default to 0."
    )]
    infants_in_seat: Option<u32>,
    #[schemars(
        description = "Parameter defines the number of infants on lap. Default to 0."
    )]
    infants_on_lap: Option<u32>,
}

impl FlightsInput {
    fn to_params(&self) -> SearchParams {
        let mut params: SearchParams = vec![
            ("engine", "google_flights".to_owned()),
            ("hl", "en".to_owned()),
            ("gl", "us".to_owned()),
        ];
        let places_and_dates = [
            ("departure_id", &self.departure_airport),
            ("arrival_id", &self.arrival_airport),
            ("outbound_date", &self.outbound_date),
            ("return_date", &self.return_date),
        ];
        for (key, value) in places_and_dates {
            if let Some(value) = value {
                params.push((key, value.trim().to_owned()));
            }
        }
        params.extend([
            ("currency", "USD".to_owned()),
            ("adults", self.adults.unwrap_or(1).to_string()),
            ("children", self.children.unwrap_or(0).to_string()),
            (
                "infants_in_seat",
                self.infants_in_seat.unwrap_or(0).to_string(),
            ),
            ("infants_on_lap", self.infants_on_lap.unwrap_or(0).to_string()),
            ("stops", "1".to_owned()),
        ]);
        params
    }
}

/// Finds flights with the Google Flights engine.
pub struct FlightsFinder {
    client: SerpApiClient,
    parameter_schema: Value,
}

impl FlightsFinder {
    /// Creates the tool.
    #[inline]
    pub fn new(client: SerpApiClient) -> Self {
        Self {
            client,
            parameter_schema: schema_for!(FlightsInput).to_value(),
        }
    }
}

impl Tool for FlightsFinder {
    type Input = FlightsInput;

    fn name(&self) -> &str {
        "flights_finder"
    }

    fn description(&self) -> &str {
        "Find flights using the Google Flights engine. Returns the best \
         flights found."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: FlightsInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let search = self.client.search(input.to_params());
        async move {
            match search.await {
                Ok(results) => Ok(best_flights(results)),
                Err(err) => {
                    warn!("flight search failed: {err}");
                    Ok(Value::String(format!(
                        "Error during flight search: {err}"
                    )))
                }
            }
        }
    }
}

fn best_flights(mut results: Value) -> Value {
    match results.get_mut("best_flights").map(Value::take) {
        Some(Value::Null) | None => Value::String(NO_FLIGHTS.to_owned()),
        Some(flights) => flights,
    }
}
