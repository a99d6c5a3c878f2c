use crate::entities::InfoHash;
use crate::errors::DomainError;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};

/// `magnet:?xt=urn:btih:<hex>&dn=<name>&tr=<tracker url>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub tracker: Option<String>,
}

impl MagnetLink {
    pub fn new(info_hash: InfoHash) -> Self {
        Self {
            info_hash,
            display_name: None,
            tracker: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_tracker(mut self, tracker: impl Into<String>) -> Self {
        self.tracker = Some(tracker.into());
        self
    }

    pub fn parse(uri: &str) -> Result<Self, DomainError> {
        let query = uri
            .strip_prefix("magnet:?")
            .ok_or_else(|| DomainError::InvalidLocator("missing magnet:? prefix".to_string()))?;

        let mut info_hash = None;
        let mut display_name = None;
        let mut tracker = None;

        for part in query.split('&') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = decode(value)?;
            match key {
                "xt" => {
                    let hex = value.strip_prefix("urn:btih:").ok_or_else(|| {
                        DomainError::InvalidLocator(format!("unsupported xt '{}'", value))
                    })?;
                    info_hash = Some(
                        InfoHash::from_hex(hex)
                            .map_err(|e| DomainError::InvalidLocator(e.to_string()))?,
                    );
                }
                "dn" if display_name.is_none() => display_name = Some(value),
                "tr" if tracker.is_none() => tracker = Some(value),
                _ => {}
            }
        }

        Ok(Self {
            info_hash: info_hash
                .ok_or_else(|| DomainError::InvalidLocator("missing xt parameter".to_string()))?,
            display_name,
            tracker,
        })
    }

    pub fn to_uri(&self) -> String {
        let mut uri = format!("magnet:?xt=urn:btih:{}", self.info_hash.to_hex());
        if let Some(name) = &self.display_name {
            uri.push_str("&dn=");
            uri.extend(utf8_percent_encode(name, NON_ALPHANUMERIC));
        }
        if let Some(tracker) = &self.tracker {
            uri.push_str("&tr=");
            uri.extend(utf8_percent_encode(tracker, NON_ALPHANUMERIC));
        }
        uri
    }
}

impl std::fmt::Display for MagnetLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl std::str::FromStr for MagnetLink {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn decode(value: &str) -> Result<String, DomainError> {
    let value = value.replace('+', " ");
    percent_decode_str(&value)
        .decode_utf8()
        .map(|v| v.into_owned())
        .map_err(|e| DomainError::InvalidLocator(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_identity_name_and_tracker() {
        let uri = format!(
            "magnet:?xt=urn:btih:{}&dn=My%20Movie.mkv&tr=http%3A%2F%2F127.0.0.1%3A8000",
            "ab".repeat(20)
        );

        let link = MagnetLink::parse(&uri).unwrap();

        assert_eq!(link.info_hash.to_hex(), "ab".repeat(20));
        assert_eq!(link.display_name.as_deref(), Some("My Movie.mkv"));
        assert_eq!(link.tracker.as_deref(), Some("http://127.0.0.1:8000"));
    }

    #[test]
    fn formatted_links_parse_back() {
        let link = MagnetLink::new(InfoHash([3u8; 20]))
            .with_name("a b&c")
            .with_tracker("http://tracker:8000");

        assert_eq!(MagnetLink::parse(&link.to_uri()).unwrap(), link);
    }

    #[test]
    fn rejects_links_without_an_identity() {
        assert!(matches!(
            MagnetLink::parse("magnet:?dn=x"),
            Err(DomainError::InvalidLocator(_))
        ));
        assert!(matches!(
            MagnetLink::parse("http://example.com"),
            Err(DomainError::InvalidLocator(_))
        ));
        assert!(matches!(
            MagnetLink::parse("magnet:?xt=urn:btih:zz"),
            Err(DomainError::InvalidLocator(_))
        ));
    }
}
