//! HTTP client for the per-program gas oracle.

use crate::{
    source::{
        GasOracle,
        OracleError,
    },
    types::GasCost,
};
use alloy_primitives::Address;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::trace;
use url::Url;

/// Queries `GET {base_url}?address=0x…` and expects
/// `{"gasWithoutCache": n, "gasWithCache": n}` back.
///
/// ```no_run
/// use smart_cache_indexer::{GasOracle, HttpGasOracle};
/// use alloy_primitives::address;
///
/// # async fn run() -> Result<(), smart_cache_indexer::OracleError> {
/// let oracle = HttpGasOracle::new("http://localhost:8080/gas")?;
/// let cost = oracle
///     .gas_cost(address!("0x00000000000000000000000000000000000000aa"))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpGasOracle {
    client: Client,
    base_url: Url,
}

/// Gas figures arrive either as JSON numbers or as decimal strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GasValue {
    Number(u64),
    Text(String),
}

impl GasValue {
    fn into_u128(self) -> Result<u128, OracleError> {
        match self {
            Self::Number(n) => Ok(u128::from(n)),
            Self::Text(text) => {
                text.trim().parse().map_err(|_| {
                    OracleError::InvalidResponse(format!("not a gas amount: {text:?}"))
                })
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GasCostResponse {
    gas_without_cache: GasValue,
    gas_with_cache: GasValue,
}

impl HttpGasOracle {
    pub fn new(oracle_url: &str) -> Result<Self, OracleError> {
        let base_url = Url::parse(oracle_url)?;
        let client = Client::builder()
            .build()
            .map_err(|err| OracleError::Http(err.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// Same as [`new`](Self::new), with a transport-level timeout per request.
    pub fn with_timeout(oracle_url: &str, timeout: Duration) -> Result<Self, OracleError> {
        let base_url = Url::parse(oracle_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| OracleError::Http(err.to_string()))?;

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl GasOracle for HttpGasOracle {
    async fn gas_cost(&self, program: Address) -> Result<GasCost, OracleError> {
        trace!(target: "smart_cache_indexer::oracle", %program, "Querying gas oracle");

        let response = self
            .client
            .get(self.base_url.clone())
            .query(&[("address", program.to_string())])
            .send()
            .await
            .map_err(|err| OracleError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status(status.as_u16()));
        }

        let body: GasCostResponse = response
            .json()
            .await
            .map_err(|err| OracleError::InvalidResponse(err.to_string()))?;

        let gas_without_cache = body.gas_without_cache.into_u128()?;
        let gas_with_cache = body.gas_with_cache.into_u128()?;
        if gas_with_cache > gas_without_cache {
            return Err(OracleError::InvalidResponse(format!(
                "gasWithCache {gas_with_cache} exceeds gasWithoutCache {gas_without_cache}"
            )));
        }

        Ok(GasCost::new(gas_without_cache, gas_with_cache))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::program;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::{
        Mock,
        MockServer,
        ResponseTemplate,
        matchers::{
            method,
            query_param,
        },
    };

    async fn serve(body: ResponseTemplate) -> (MockServer, HttpGasOracle) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("address", program(7).to_string()))
            .respond_with(body)
            .expect(1)
            .mount(&server)
            .await;
        let oracle = HttpGasOracle::new(&server.uri()).unwrap();
        (server, oracle)
    }

    #[tokio::test]
    async fn test_numeric_response() {
        let (server, oracle) = serve(ResponseTemplate::new(200).set_body_json(json!({
            "gasWithoutCache": 1000,
            "gasWithCache": 200
        })))
        .await;

        let cost = oracle.gas_cost(program(7)).await.unwrap();

        assert_eq!(cost, GasCost::new(1000, 200));
        server.verify().await;
    }

    #[tokio::test]
    async fn test_string_response() {
        let (_server, oracle) = serve(ResponseTemplate::new(200).set_body_json(json!({
            "gasWithoutCache": "98765432109876543210",
            "gasWithCache": "5"
        })))
        .await;

        let cost = oracle.gas_cost(program(7)).await.unwrap();

        assert_eq!(cost, GasCost::new(98_765_432_109_876_543_210, 5));
    }

    #[tokio::test]
    async fn test_error_status() {
        let (_server, oracle) = serve(ResponseTemplate::new(503)).await;

        assert_eq!(
            oracle.gas_cost(program(7)).await,
            Err(OracleError::Status(503))
        );
    }

    #[tokio::test]
    async fn test_with_cache_above_without_cache_is_rejected() {
        let (_server, oracle) = serve(ResponseTemplate::new(200).set_body_json(json!({
            "gasWithoutCache": 10,
            "gasWithCache": 11
        })))
        .await;

        assert_matches!(
            oracle.gas_cost(program(7)).await,
            Err(OracleError::InvalidResponse(_))
        );
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let (_server, oracle) = serve(ResponseTemplate::new(200).set_body_json(json!({
            "gasWithoutCache": -1,
            "gasWithCache": "lots"
        })))
        .await;

        assert_matches!(
            oracle.gas_cost(program(7)).await,
            Err(OracleError::InvalidResponse(_))
        );
    }

    #[test]
    fn test_invalid_url() {
        assert_matches!(
            HttpGasOracle::new("not a url"),
            Err(OracleError::InvalidUrl(_))
        );
    }
}
