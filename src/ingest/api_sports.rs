//! API-Sports client for the american-football endpoints

use crate::ingest::http::HttpClient;
use crate::ingest::rate_limit::{RateLimitHeaders, RateLimiter};
use crate::{OddsValueError, Result};
use log::warn;
use serde_json::Value;

const MAX_ATTEMPTS: u32 = 5;
const RETRY_COOLDOWN_S: f64 = 60.0;

pub struct ApiSportsClient {
    http: HttpClient,
    api_key: String,
    pub rate_limiter: RateLimiter,
}

impl ApiSportsClient {
    pub fn new(base_url: &str, api_key: String) -> Result<Self> {
        Ok(ApiSportsClient {
            http: HttpClient::new(base_url)?,
            api_key,
            rate_limiter: RateLimiter::new(),
        })
    }

    /// GET an endpoint, pacing requests and retrying through 429s.
    ///
    /// A populated "errors" body is terminal; API-Sports reports quota and
    /// parameter problems there with a 200 status.
    pub fn get(&mut self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.rate_limiter.before_request();

            let headers = [("x-apisports-key", self.api_key.as_str())];
            match self.http.get_json_with_headers(path, params, &headers) {
                Ok((data, response_headers)) => {
                    self.rate_limiter
                        .after_response(RateLimitHeaders::from_headers(&response_headers));

                    if let Some(errors) = data.get("errors") {
                        if errors_present(errors) {
                            return Err(OddsValueError::ProviderResponse(format!(
                                "api-sports returned errors: {}",
                                errors
                            )));
                        }
                    }
                    return Ok(data);
                }
                Err(OddsValueError::RateLimited) if attempt < MAX_ATTEMPTS => {
                    warn!(
                        "HTTP 429 from api-sports (attempt {}/{}); backing off {:.0}s",
                        attempt, MAX_ATTEMPTS, RETRY_COOLDOWN_S
                    );
                    self.rate_limiter.cooldown(RETRY_COOLDOWN_S);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// GET an endpoint and return the items of its "response" array
    pub fn get_response_items(
        &mut self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<Value>> {
        let payload = self.get(path, params)?;
        let items = payload
            .get("response")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                OddsValueError::Parse(format!("Expected 'response' list in {} payload", path))
            })?;
        Ok(items.iter().filter(|i| i.is_object()).cloned().collect())
    }
}

/// API-Sports sends "errors" as [] when clear, or a populated list/object
fn errors_present(errors: &Value) -> bool {
    match errors {
        Value::Null => false,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_errors_present() {
        assert!(!errors_present(&json!([])));
        assert!(!errors_present(&json!({})));
        assert!(!errors_present(&json!(null)));
        assert!(errors_present(&json!({"token": "invalid key"})));
        assert!(errors_present(&json!(["requests limit reached"])));
    }
}
