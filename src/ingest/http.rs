//! Thin blocking HTTP wrapper with uniform provider error handling

use crate::{OddsValueError, Result};
use log::debug;
use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

/// Provider-agnostic JSON client over a pooled blocking reqwest client
pub struct HttpClient {
    base_url: String,
    client: Client,
}

impl HttpClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(HttpClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn get(
        &self,
        path: &str,
        params: &[(&str, String)],
        headers: &[(&str, &str)],
    ) -> Result<reqwest::blocking::Response> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!("GET {}", url);

        let mut request = self.client.get(&url).query(params);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send()?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(OddsValueError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(OddsValueError::HttpStatus {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response)
    }

    /// GET a JSON object, also returning the response headers
    pub fn get_json_with_headers(
        &self,
        path: &str,
        params: &[(&str, String)],
        headers: &[(&str, &str)],
    ) -> Result<(Value, HeaderMap)> {
        let response = self.get(path, params, headers)?;
        let response_headers = response.headers().clone();
        let data: Value = response
            .json()
            .map_err(|_| OddsValueError::Parse("Response was not valid JSON".to_string()))?;
        if !data.is_object() {
            return Err(OddsValueError::Parse(format!(
                "Expected JSON object, got {}",
                json_type_name(&data)
            )));
        }
        Ok((data, response_headers))
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
