use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use trip_agent_core::tool::{Tool, ToolResult};

use super::serpapi::{SearchParams, SerpApiClient};

/// Returned to the model when the search has no properties.
pub const NO_HOTELS: &str = "No hotels found for the given criteria. Try \
                             adjusting your search parameters.";

const MAX_HOTELS: usize = 5;

/// The arguments of [`HotelsFinder`].
#[derive(Debug, Deserialize, JsonSchema)]
pub struct HotelsInput {
    #[schemars(description = "Location of the hotel (e.g., 'Amsterdam').")]
    q: String,
    #[schemars(
        description = "Check-in date in YYYY-MM-DD format (e.g., 2024-12-01)."
    )]
    check_in_date: String,
    #[schemars(
        description = "Check-out date in YYYY-MM-DD format (e.g., 2024-12-02)."
    )]
    check_out_date: String,
    #[schemars(description = "Number of adults. Default is 1.")]
    adults: Option<u32>,
    #[schemars(description = "Number of children. Default is 0.")]
    children: Option<u32>,
    #[schemars(description = "Number of rooms. Default is 1.")]
    rooms: Option<u32>,
}

impl HotelsInput {
    fn to_params(&self) -> SearchParams {
        vec![
            ("engine", "google_hotels".to_owned()),
            ("q", self.q.trim().to_owned()),
            ("check_in_date", self.check_in_date.trim().to_owned()),
            ("check_out_date", self.check_out_date.trim().to_owned()),
            ("currency", "USD".to_owned()),
            ("adults", self.adults.unwrap_or(1).to_string()),
            ("children", self.children.unwrap_or(0).to_string()),
            ("rooms", self.rooms.unwrap_or(1).to_string()),
        ]
    }
}

/// Finds hotels with the Google Hotels engine and returns the top five.
pub struct HotelsFinder {
    client: SerpApiClient,
    parameter_schema: Value,
}

impl HotelsFinder {
    /// Creates the tool.
    #[inline]
    pub fn new(client: SerpApiClient) -> Self {
        Self {
            client,
            parameter_schema: schema_for!(HotelsInput).to_value(),
        }
    }
}

impl Tool for HotelsFinder {
    type Input = HotelsInput;

    fn name(&self) -> &str {
        "hotels_finder"
    }

    fn description(&self) -> &str {
        "Find hotels using the Google Hotels engine with the provided \
         parameters. Returns the top 5 hotels."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: HotelsInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let search = self.client.search(input.to_params());
        async move {
            match search.await {
                Ok(results) => Ok(top_hotels(results)),
                Err(err) => {
                    warn!("hotel search failed: {err}");
                    Ok(Value::String(format!(
                        "Error during hotel search: {err}"
                    )))
                }
            }
        }
    }
}

fn top_hotels(mut results: Value) -> Value {
    match results.get_mut("properties").map(Value::take) {
        Some(Value::Array(mut properties)) if !properties.is_empty() => {
            properties.truncate(MAX_HOTELS);
            Value::Array(properties)
        }
        Some(Value::Object(properties)) if !properties.is_empty() => {
            Value::Object(properties)
        }
        _ => Value::String(NO_HOTELS.to_owned()),
    }
}
