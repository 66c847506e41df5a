use std::time::Duration;

use reqwest::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Client, Url,
};

use super::ilp::{LineTransport, TransportError};

/// Line protocol over HTTP, using the v2 write endpoint that InfluxDB 2.x
/// serves and QuestDB accepts as well.
///
/// A non-2xx answer is a rejection of the whole batch; the response body is
/// kept in the error since it names the offending line.
pub struct HttpLineTransport {
    client: Client,
    write_url: Url,
    token: Option<String>,
}

impl HttpLineTransport {
    pub fn new(
        base_url: &str,
        org: &str,
        bucket: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build().map_err(TransportError::Http)?;
        Ok(Self {
            client,
            write_url: write_url(base_url, org, bucket)?,
            token,
        })
    }
}

/// `{base}/api/v2/write?org=..&bucket=..&precision=ns`. An empty org is left
/// out, QuestDB has no notion of one.
pub fn write_url(base_url: &str, org: &str, bucket: &str) -> Result<Url, TransportError> {
    let endpoint = format!("{}/api/v2/write", base_url.trim_end_matches('/'));
    let mut url = Url::parse(&endpoint).map_err(|e| TransportError::InvalidUrl(format!("{base_url}: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        if !org.is_empty() {
            query.append_pair("org", org);
        }
        query.append_pair("bucket", bucket).append_pair("precision", "ns");
    }
    Ok(url)
}

#[async_trait::async_trait]
impl LineTransport for HttpLineTransport {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let mut request = self
            .client
            .post(self.write_url.clone())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(payload.to_vec());
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Token {token}"));
        }

        let response = request.send().await.map_err(TransportError::Http)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected(format!("{status}: {}", body.trim())));
        }

        metrics::counter!("ilp_bytes_total").increment(payload.len() as u64);
        Ok(())
    }
}
