use super::RecordWriter;
use crate::agent_modules::config::InfluxConfig;
use crate::agent_modules::error::WriteError;
use crate::version::user_agent;
use async_trait::async_trait;
use envflux_common::Record;
use reqwest::{Client, header};
use std::time::Duration;

const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Writes batches through the InfluxDB v2 `/api/v2/write` endpoint as line protocol.
pub struct InfluxWriter {
    client: Client,
    write_url: String,
    org: String,
    bucket: String,
    token: String,
}

impl InfluxWriter {
    pub fn new(config: &InfluxConfig) -> Result<Self, WriteError> {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(WRITE_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            write_url: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            token: config.token.clone(),
        })
    }

    pub fn write_url(&self) -> &str {
        &self.write_url
    }
}

pub fn encode_batch(batch: &[Record]) -> String {
    batch
        .iter()
        .map(Record::to_line_protocol)
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl RecordWriter for InfluxWriter {
    async fn write(&self, batch: &[Record]) -> Result<(), WriteError> {
        let response = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "s"),
            ])
            .header(header::AUTHORIZATION, format!("Token {}", self.token))
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(encode_batch(batch))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(WriteError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_write_url_strips_trailing_slash() {
        let writer = InfluxWriter::new(&InfluxConfig {
            url: "http://influx:8086/".to_string(),
            token: "t".to_string(),
            org: "home".to_string(),
            bucket: "solar".to_string(),
        })
        .unwrap();
        assert_eq!(writer.write_url(), "http://influx:8086/api/v2/write");
    }

    #[test]
    fn test_encode_batch_one_line_per_record() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let batch = vec![
            Record::new("a", ts).field("x", 1i64),
            Record::new("b", ts).field("y", 2i64),
        ];
        assert_eq!(encode_batch(&batch), "a x=1i 1700000000\nb y=2i 1700000000");
    }
}
