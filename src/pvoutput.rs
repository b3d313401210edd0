use crate::config::Config;
use crate::error::UploadError;
use chrono::{DateTime, TimeZone};
use tracing::debug;

/// One live status sample for PVOutput's addstatus service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// `YYYYMMDD`
    pub date: String,
    /// `HH:MM`
    pub time: String,
    pub solar_power: Option<String>,
    pub house_power: String,
}

impl Status {
    pub fn at<Tz: TimeZone>(
        now: &DateTime<Tz>,
        solar_power: Option<String>,
        house_power: String,
    ) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        Self {
            date: now.format("%Y%m%d").to_string(),
            time: now.format("%H:%M").to_string(),
            solar_power,
            house_power,
        }
    }

    fn form(&self) -> Vec<(&'static str, &str)> {
        let mut params = vec![("d", self.date.as_str()), ("t", self.time.as_str())];
        if let Some(solar) = &self.solar_power {
            params.push(("v2", solar.as_str()));
        }
        params.push(("v4", self.house_power.as_str()));
        params
    }
}

pub struct PvOutputClient {
    url: String,
    system_id: String,
    api_key: String,
    client: reqwest::Client,
}

impl PvOutputClient {
    /// `host` without a scheme is reached over plain HTTP.
    pub fn new(host: &str, service: &str, system_id: &str, api_key: &str) -> Self {
        let host = host.trim_end_matches('/');
        let url = if host.contains("://") {
            format!("{host}{service}")
        } else {
            format!("http://{host}{service}")
        };
        Self {
            url,
            system_id: system_id.to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, anyhow::Error> {
        anyhow::ensure!(!cfg.host.is_empty(), "config is missing <host>");
        anyhow::ensure!(!cfg.system_id.is_empty(), "config is missing <systemid>");
        anyhow::ensure!(!cfg.api_key.is_empty(), "config is missing <apikey>");
        Ok(Self::new(&cfg.host, &cfg.service, &cfg.system_id, &cfg.api_key))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Posts the status once and returns the response body. Anything but
    /// `200 OK` is a rejection.
    pub async fn post_status(&self, status: &Status) -> Result<String, UploadError> {
        let params = status.form();
        debug!("Connecting to {}", self.url);
        debug!("sending: {params:?}");

        let response = self
            .client
            .post(&self.url)
            .header("Accept", "text/plain")
            .header("X-Pvoutput-SystemId", &self.system_id)
            .header("X-Pvoutput-Apikey", &self.api_key)
            .form(&params)
            .send()
            .await?;

        let code = response.status();
        let body = response.text().await?;
        if code != reqwest::StatusCode::OK {
            return Err(UploadError::Rejected {
                status: code.as_u16(),
                reason: code.canonical_reason().unwrap_or_default().to_string(),
                body,
            });
        }
        Ok(body)
    }
}

#[cfg(test)]
mod test_pvoutput {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use mockito::Matcher;

    fn status() -> Status {
        let now = NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(9, 5, 42)
            .unwrap()
            .and_utc();
        Status::at(&now, Some("300".to_string()), "1000".to_string())
    }

    #[test]
    fn test_status_formats_date_and_time() {
        let status = status();
        assert_eq!(status.date, "20261016");
        assert_eq!(status.time, "09:05");
        assert_eq!(
            status.form(),
            vec![("d", "20261016"), ("t", "09:05"), ("v2", "300"), ("v4", "1000")]
        );
    }

    #[test]
    fn test_status_without_solar() {
        let status = Status::at(&Utc::now(), None, "1000".to_string());
        assert!(status.form().iter().all(|(key, _)| *key != "v2"));
    }

    #[test]
    fn test_url_scheme_defaults_to_http() {
        let client = PvOutputClient::new("pvoutput.org", "/service/r2/addstatus.jsp", "1", "k");
        assert_eq!(client.url(), "http://pvoutput.org/service/r2/addstatus.jsp");

        let client = PvOutputClient::new("https://pvoutput.org/", "/service/r2/addstatus.jsp", "1", "k");
        assert_eq!(client.url(), "https://pvoutput.org/service/r2/addstatus.jsp");
    }

    #[tokio::test]
    async fn test_post_status_ok() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("POST", "/service/r2/addstatus.jsp")
            .match_header("X-Pvoutput-SystemId", "34100")
            .match_header("X-Pvoutput-Apikey", "test_key")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("d".into(), "20261016".into()),
                Matcher::UrlEncoded("t".into(), "09:05".into()),
                Matcher::UrlEncoded("v2".into(), "300".into()),
                Matcher::UrlEncoded("v4".into(), "1000".into()),
            ]))
            .with_status(200)
            .with_body("OK 200: Added Status")
            .create_async()
            .await;

        let client = PvOutputClient::new(&server.url(), "/service/r2/addstatus.jsp", "34100", "test_key");
        let body = client.post_status(&status()).await.unwrap();

        assert_eq!(body, "OK 200: Added Status");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_status_rejected() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/service/r2/addstatus.jsp")
            .with_status(401)
            .with_body("Unauthorized 401: Invalid API Key")
            .create_async()
            .await;

        let client = PvOutputClient::new(&server.url(), "/service/r2/addstatus.jsp", "34100", "bad");
        let err = client.post_status(&status()).await.unwrap_err();

        match err {
            UploadError::Rejected {
                status,
                reason,
                body,
            } => {
                assert_eq!(status, 401);
                assert_eq!(reason, "Unauthorized");
                assert_eq!(body, "Unauthorized 401: Invalid API Key");
            }
            other => panic!("Expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let cfg = Config::from_xml("<config><host>pvoutput.org</host></config>").unwrap();
        assert!(PvOutputClient::from_config(&cfg).is_err());

        let cfg = Config::from_xml(
            "<config><host>pvoutput.org</host><systemid>1</systemid><apikey>k</apikey></config>",
        )
        .unwrap();
        let client = PvOutputClient::from_config(&cfg).unwrap();
        assert_eq!(client.url(), "http://pvoutput.org/service/r2/addstatus.jsp");
    }
}
