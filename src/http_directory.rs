use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use log::{info, warn, debug};
use url::Url;

use crate::config::CollectorConfig;
use crate::directory::{DirectorySearch, SearchError};
use crate::member::Member;

/// Used when a rate-limit response carries no usable wait hint.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Talks to the participant gateway that fronts the platform session.
pub struct HttpDirectory {
    client: Client,
    api_base: Url,
    api_id: String,
    api_hash: String,
    channel: String,
    search_limit: u32,
    photos_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct Account {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Channel {
    pub id: i64,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Deserialize)]
struct ParticipantsPage {
    #[serde(default)]
    users: Vec<Member>,
}

#[derive(Debug, Deserialize)]
struct FloodWait {
    retry_after: u64,
}

impl HttpDirectory {
    pub fn new(config: &CollectorConfig) -> Result<Self, SearchError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(concat!("channel-collector/", env!("CARGO_PKG_VERSION"))));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()?;

        let api_base = Url::parse(&config.api_base)
            .map_err(|e| SearchError::Decode(format!("invalid api_base '{}': {}", config.api_base, e)))?;

        Ok(HttpDirectory {
            client,
            api_base,
            api_id: config.api_id.clone(),
            api_hash: config.api_hash.clone(),
            channel: config.channel_name().to_string(),
            search_limit: config.search_limit,
            photos_dir: config.photos_dir(),
        })
    }

    /// Confirms the session is usable and returns the authorized account.
    pub fn authorize(&self) -> Result<Account, SearchError> {
        let resp = self.get(self.endpoint("me")?).send()?;
        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SearchError::NotAuthorized),
            status if !status.is_success() => Err(SearchError::Status(status.as_u16())),
            _ => decode(resp),
        }
    }

    pub fn resolve_channel(&self) -> Result<Channel, SearchError> {
        let path = format!("channels/{}", urlencoding::encode(&self.channel));
        let resp = self.get(self.endpoint(&path)?).send()?;
        match resp.status() {
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => Err(SearchError::ChannelNotFound(self.channel.clone())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SearchError::NotAuthorized),
            status if !status.is_success() => Err(SearchError::Status(status.as_u16())),
            _ => decode(resp),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, SearchError> {
        // join() replaces the last segment unless the base ends with '/'
        let mut base = self.api_base.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path)
            .map_err(|e| SearchError::Decode(format!("invalid endpoint '{}': {}", path, e)))
    }

    fn get(&self, url: Url) -> RequestBuilder {
        self.client
            .get(url)
            .basic_auth(&self.api_id, Some(&self.api_hash))
    }

    /// Gateway credentials go only to the gateway's own origin; photos served
    /// from a CDN are fetched anonymously.
    fn photo_request(&self, url: Url) -> RequestBuilder {
        if url.origin() == self.api_base.origin() {
            self.get(url)
        } else {
            self.client.get(url)
        }
    }

    fn download(&self, member: &Member, photo_url: &str) -> Result<String, SearchError> {
        let url = Url::parse(photo_url).map_err(|e| SearchError::Decode(e.to_string()))?;
        let resp = self.photo_request(url).send()?;
        if !resp.status().is_success() {
            return Err(SearchError::Status(resp.status().as_u16()));
        }
        let bytes = resp.bytes()?;
        if bytes.is_empty() {
            return Err(SearchError::Decode("empty photo body".to_string()));
        }

        let file_name = format!("{}.jpg", member.id);
        fs::create_dir_all(&self.photos_dir)?;
        fs::write(self.photos_dir.join(&file_name), &bytes)?;
        Ok(format!("photos/{}", file_name))
    }
}

impl DirectorySearch for HttpDirectory {
    fn search(&self, token: &str) -> Result<Vec<Member>, SearchError> {
        let path = format!("channels/{}/participants", urlencoding::encode(&self.channel));
        let mut url = self.endpoint(&path)?;
        url.query_pairs_mut()
            .append_pair("q", token)
            .append_pair("offset", "0")
            .append_pair("limit", &self.search_limit.to_string());

        debug!("GET {}", url);
        let resp = self.get(url).send()?;
        let status = resp.status();

        if is_flood_status(status) {
            let header = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = resp.text().unwrap_or_default();
            return Err(SearchError::RateLimited {
                retry_after: retry_after(header.as_deref(), &body),
            });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SearchError::NotAuthorized);
        }
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }

        let page: ParticipantsPage = decode(resp)?;
        info!("Search '{}' returned {} participants", token, page.users.len());
        Ok(page.users)
    }

    fn fetch_avatar(&self, member: &Member) -> Option<String> {
        let photo_url = member.photo_url.as_deref()?;
        match self.download(member, photo_url) {
            Ok(path) => Some(path),
            Err(e) => {
                debug!("No photo for {}: {}", member.id, e);
                None
            }
        }
    }
}

fn is_flood_status(status: StatusCode) -> bool {
    // 420 is the platform's own FLOOD_WAIT code
    status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 420
}

fn decode<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, SearchError> {
    let text = resp.text()?;
    serde_json::from_str(&text).map_err(|e| SearchError::Decode(e.to_string()))
}

/// Wait hint from the `Retry-After` header, then the JSON body, then the default.
fn retry_after(header: Option<&str>, body: &str) -> Duration {
    if let Some(secs) = header.and_then(|h| h.trim().parse::<u64>().ok()) {
        return Duration::from_secs(secs);
    }
    if let Ok(flood) = serde_json::from_str::<FloodWait>(body) {
        return Duration::from_secs(flood.retry_after);
    }
    warn!("Rate limited without a wait hint, assuming {}s", DEFAULT_RETRY_AFTER_SECS);
    Duration::from_secs(DEFAULT_RETRY_AFTER_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::AUTHORIZATION;

    fn directory(api_base: &str) -> HttpDirectory {
        let config = CollectorConfig {
            api_base: api_base.to_string(),
            api_id: "1".to_string(),
            api_hash: "hash".to_string(),
            channel: "rust_ru".to_string(),
            ..CollectorConfig::default()
        };
        HttpDirectory::new(&config).unwrap()
    }

    #[test]
    fn test_retry_after_prefers_header() {
        assert_eq!(retry_after(Some("17"), r#"{"retry_after": 3}"#), Duration::from_secs(17));
    }

    #[test]
    fn test_retry_after_falls_back_to_body_then_default() {
        assert_eq!(retry_after(Some("soon"), r#"{"retry_after": 3}"#), Duration::from_secs(3));
        assert_eq!(retry_after(None, "not json"), Duration::from_secs(DEFAULT_RETRY_AFTER_SECS));
    }

    #[test]
    fn test_flood_status_codes() {
        assert!(is_flood_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_flood_status(StatusCode::from_u16(420).unwrap()));
        assert!(!is_flood_status(StatusCode::OK));
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let dir = directory("https://gateway.example/api/v1");
        let url = dir.endpoint("channels/rust_ru/participants").unwrap();
        assert_eq!(url.as_str(), "https://gateway.example/api/v1/channels/rust_ru/participants");

        let dir = directory("https://gateway.example/api/v1/");
        assert_eq!(dir.endpoint("me").unwrap().as_str(), "https://gateway.example/api/v1/me");
    }

    #[test]
    fn test_participants_page_parsing() {
        let page: ParticipantsPage = serde_json::from_str(
            r#"{"users": [{"id": 1, "username": "a", "bot": true}, {"id": 2, "first_name": "Ёжик", "premium": true}]}"#,
        )
        .unwrap();
        assert_eq!(page.users.len(), 2);
        assert!(page.users[0].bot);
        assert_eq!(page.users[1].first_name.as_deref(), Some("Ёжик"));
    }

    fn member_with_photo(id: i64, photo_url: Option<&str>) -> Member {
        Member {
            id,
            username: None,
            first_name: None,
            last_name: None,
            phone: None,
            bot: false,
            premium: false,
            photo_url: photo_url.map(String::from),
        }
    }

    #[test]
    fn test_fetch_avatar_without_photo_is_none() {
        let dir = directory("https://gateway.example/api/");
        assert_eq!(dir.fetch_avatar(&member_with_photo(9, None)), None);
    }

    #[test]
    fn test_fetch_avatar_failures_are_none() {
        let out = tempfile::tempdir().unwrap();
        let config = CollectorConfig {
            api_base: "https://gateway.example/api/".to_string(),
            channel: "rust_ru".to_string(),
            output_dir: out.path().to_path_buf(),
            ..CollectorConfig::default()
        };
        let dir = HttpDirectory::new(&config).unwrap();

        assert_eq!(dir.fetch_avatar(&member_with_photo(10, Some("not a url"))), None);
        // nothing listens on port 1
        assert_eq!(dir.fetch_avatar(&member_with_photo(11, Some("http://127.0.0.1:1/11.jpg"))), None);
        assert!(!config.photos_dir().join("10.jpg").exists());
        assert!(!config.photos_dir().join("11.jpg").exists());
    }

    #[test]
    fn test_photo_request_sends_credentials_only_to_gateway() {
        let dir = directory("https://gateway.example/api/");

        let own = dir
            .photo_request(Url::parse("https://gateway.example/photos/1.jpg").unwrap())
            .build()
            .unwrap();
        assert!(own.headers().contains_key(AUTHORIZATION));

        let cdn = dir
            .photo_request(Url::parse("https://cdn.example/photos/1.jpg").unwrap())
            .build()
            .unwrap();
        assert!(!cdn.headers().contains_key(AUTHORIZATION));

        let other_port = dir
            .photo_request(Url::parse("https://gateway.example:8443/photos/1.jpg").unwrap())
            .build()
            .unwrap();
        assert!(!other_port.headers().contains_key(AUTHORIZATION));
    }
}
